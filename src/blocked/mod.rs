//! Cache-blocked GEMM stages.
//!
//! The product is broken into blocks of N columns and K depth that fit in
//! L2/L1, and each block runs through three stages:
//! - `transform_a`: pack the rows of A for one K block into kernel panels
//! - `transform_b`: reshape one block of B into kernel panels
//! - `matrix_multiply`: run the micro-kernel over the panels and merge the
//!   tile into C with alpha/beta
//!
//! `params` holds the problem sizes and the block-size heuristics.

pub mod matrix_multiply;
pub mod params;
pub mod transform_a;
pub mod transform_b;

pub use matrix_multiply::{MatrixMultiplyWorkload, MatrixMultiplyWrapper};
pub use params::{BlockSizes, GemmParams};
pub use transform_a::{TransformAWorkload, TransformAWrapper};
pub use transform_b::{TransformBWorkload, TransformBWrapper};
