//! Error types for GEMM configuration and validation.
//!
//! Only configuration-time problems are reported here. Violations inside the
//! hot path (bad strides, iterator overshoot) are programming errors and
//! panic instead.

use thiserror::Error;

use crate::tensor::{DataLayout, DataType};

/// Errors reported by `validate` / `configure` and by the config parser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GemmError {
    /// No strategy handles this element type.
    #[error("Unsupported data type: {0:?}")]
    UnsupportedDataType(DataType),

    /// A tensor does not have the data type the operator expects.
    #[error("Data type mismatch for {tensor}: expected {expected:?}, found {found:?}")]
    DataTypeMismatch {
        tensor: &'static str,
        expected: DataType,
        found: DataType,
    },

    /// Shapes of A, B and C are not consistent with each other.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Columns of A differ from rows of B.
    #[error("Inner dimension mismatch: A has K={a_k}, B has K={b_k}")]
    InnerDimensionMismatch { a_k: usize, b_k: usize },

    /// A and C must share a data layout.
    #[error("Layout mismatch: A is {a:?}, C is {c:?}")]
    LayoutMismatch { a: DataLayout, c: DataLayout },

    /// The requested kernel is not compiled in or not supported by this CPU.
    #[error("Kernel not available: {0}")]
    UnsupportedKernel(String),

    /// alpha/beta cannot be represented in the accumulator type.
    #[error("Scale {value} cannot be represented by the {strategy} accumulator")]
    InvalidScale { value: f32, strategy: &'static str },

    /// `run` or `prepare` called before `configure`.
    #[error("Operator used before configure()")]
    NotConfigured,

    /// A tensor passed to `run` does not match the configured one.
    #[error("Tensor {0} does not match the configured shape or type")]
    TensorMismatch(&'static str),

    /// Bad configuration value (environment variable or builder input).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for GEMM operations.
pub type Result<T> = std::result::Result<T, GemmError>;
