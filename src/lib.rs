//! Cache-blocked, interleaved GEMM with NEON/AVX2 micro-kernels.
//!
//! The engine computes `C = alpha * A * B + beta * C` for batched and
//! multi-matrix operands. It is the same recipe every fast BLAS uses:
//! block the problem for L1/L2, repack A and B into the exact panel layout
//! the micro-kernel streams through, and let a small register-blocked
//! kernel do the arithmetic. What sits on top is the scheduling: the
//! product is cut into workloads, and threads take disjoint row ranges of
//! the output through every workload.
//!
//! ## Usage
//!
//! ```
//! use interleaved_gemm::multiply_u8;
//!
//! let a = vec![1u8; 64 * 64];
//! let b = vec![2u8; 64 * 64];
//! let mut c = vec![0u32; 64 * 64];
//!
//! multiply_u8(&a, &b, &mut c, 64, 64, 64).unwrap();
//! assert!(c.iter().all(|&v| v == 128));
//! ```
//!
//! For tensors, batches, NHWC inputs or a B that is reused across runs, use
//! the operator directly:
//!
//! ```
//! use interleaved_gemm::{DataType, Gemm, GemmConfig, GemmInfo, Tensor, TensorShape};
//!
//! let a = Tensor::from_slice(TensorShape::new(&[3, 2]), &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! let b = Tensor::from_slice(TensorShape::new(&[2, 3]), &[7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]);
//! let mut c = Tensor::new(TensorShape::new(&[2, 2]), DataType::F32);
//!
//! let mut gemm = Gemm::new(DataType::F32, GemmConfig::default()).unwrap();
//! gemm.configure(&a, &b, &mut c, GemmInfo::default()).unwrap();
//! gemm.run(&a, &b, &mut c).unwrap();
//! assert_eq!(c.to_vec::<f32>(), vec![58.0, 64.0, 139.0, 154.0]);
//! ```
//!
//! ## What's inside
//!
//! - `u8 → u32` 4x4 kernel (NEON widening multiply-accumulate, K unrolled by 16)
//! - `f32` 4x4 kernel (AVX2+FMA, NEON, portable)
//! - Block sizes derived from L1/L2 cache sizes
//! - Workload-based threading with a shared ring for on-the-fly B reshaping
//! - Quantized output stage with offsets and fixed-point requantization

pub mod blocked;
pub mod config;
pub mod error;
pub mod gemm;
pub mod kernels;
pub mod lowp;
pub mod matrix;
pub mod tensor;
pub mod threaded;
pub mod window;

pub use config::{GemmConfig, GemmInfo, KernelPreference};
pub use error::{GemmError, Result};
pub use gemm::{Gemm, GemmInterleaved};
pub use kernels::{CpuInfo, F32Gemm4x4, Isa, Strategy, U8Gemm4x4};
pub use lowp::{GemmLowp, LowpOutputStage};
pub use tensor::{DataLayout, DataType, Tensor, TensorInfo, TensorShape};

use blocked::params::{BlockSizes, GemmParams, batch_window};
use kernels::Accumulator;
use threaded::choose_thread_count;

/// `u8` matrix multiply into `u32`: C = A * B
///
/// Matrices are row-major: A is m×k, B is k×n, C is m×n. Accumulation
/// wraps modulo 2^32.
///
/// # Errors
///
/// [`GemmError::UnsupportedKernel`] if `INTERLEAVED_GEMM_KERNEL` asks for a
/// kernel this CPU can't run.
///
/// # Panics
///
/// Panics if the slice sizes don't match m, n, k.
pub fn multiply_u8(a: &[u8], b: &[u8], c: &mut [u32], m: usize, n: usize, k: usize) -> Result<()> {
    let config = GemmConfig::default();
    let threads = config.num_threads;
    multiply_with::<U8Gemm4x4>(a, b, c, m, n, k, 1.0, 0.0, config, threads)
}

/// `f32` matrix multiply: C = alpha * A * B + beta * C
///
/// Thread count adapts to matrix size, up to `num_threads`: small matrices
/// use fewer threads because the overhead isn't worth it.
///
/// # Errors
///
/// - [`GemmError::InvalidScale`] if `alpha` or `beta` is not finite
/// - [`GemmError::UnsupportedKernel`] if `INTERLEAVED_GEMM_KERNEL` asks for a
///   kernel this CPU can't run
///
/// # Panics
///
/// Panics if the slice sizes don't match m, n, k.
#[allow(clippy::too_many_arguments)]
pub fn multiply_f32(
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
    num_threads: usize,
) -> Result<()> {
    multiply_with::<F32Gemm4x4>(a, b, c, m, n, k, alpha, beta, GemmConfig::default(), num_threads)
}

/// Shared body of the slice API. Degenerate sizes go through the reference.
///
/// Errors are the operator's own: scales the accumulator can't hold and
/// kernels the CPU lacks.
#[allow(clippy::too_many_arguments)]
fn multiply_with<S>(
    a: &[S::Operand],
    b: &[S::Operand],
    c: &mut [S::Result],
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    beta: f32,
    config: GemmConfig,
    max_threads: usize,
) -> Result<()>
where
    S: Strategy,
    S::Result: From<S::Operand>,
{
    assert_eq!(a.len(), m * k, "A: expected {}x{}={} elements", m, k, m * k);
    assert_eq!(b.len(), k * n, "B: expected {}x{}={} elements", k, n, k * n);
    assert_eq!(c.len(), m * n, "C: expected {}x{}={} elements", m, n, m * n);

    if m == 0 || n == 0 || k == 0 {
        let scale = |value| {
            <S::Result as Accumulator>::from_scale(value).ok_or(GemmError::InvalidScale {
                value,
                strategy: S::NAME,
            })
        };
        matrix::reference_gemm(a, b, c, m, n, k, scale(alpha)?, scale(beta)?);
        return Ok(());
    }

    let params = GemmParams {
        m,
        n,
        k,
        batches: 1,
        multis: 1,
    };
    let cpu = CpuInfo::detect().with_cache_sizes(config.l1_cache_size, config.l2_cache_size);
    let num_windows = batch_window::<S>(&params, &BlockSizes::for_strategy::<S>(&params, &cpu, &config))
        .num_iterations_total();
    let threads = choose_thread_count(m, n, k, num_windows, max_threads.max(1));

    let a = Tensor::from_slice(TensorShape::new(&[k, m]), a);
    let b = Tensor::from_slice(TensorShape::new(&[n, k]), b);
    let mut out = Tensor::from_slice(TensorShape::new(&[n, m]), c);

    let info = GemmInfo::with_scale(alpha, beta);
    let mut gemm = GemmInterleaved::<S>::with_cpu_info(config.with_threads(threads), cpu);
    gemm.configure(&a, &b, &mut out, info)?;
    gemm.run(&a, &b, &mut out)?;
    c.copy_from_slice(out.as_slice::<S::Result>());
    Ok(())
}
