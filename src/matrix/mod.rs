//! Naive reference implementations.
//!
//! These are the correctness baselines the blocked GEMM is compared
//! against, and the fallback for degenerate sizes in the convenience API.

pub mod naive_ikj;

pub use naive_ikj::{reference_gemm, reference_gemm_lowp, transpose};
