//! Runtime configuration for the GEMM operators.
//!
//! Settings can come from the builder methods or from the environment:
//!
//! ```text
//! INTERLEAVED_GEMM_THREADS=4        # worker threads (default: available cores)
//! INTERLEAVED_GEMM_KERNEL=portable  # auto | portable | neon | avx2
//! ```

use std::str::FromStr;

use crate::error::GemmError;

/// Default L1 data cache size used to derive `k_block`.
pub const DEFAULT_L1_CACHE_SIZE: usize = 32 * 1024;
/// Default L2 cache size used to derive `x_block`.
pub const DEFAULT_L2_CACHE_SIZE: usize = 512 * 1024;

const THREADS_ENV: &str = "INTERLEAVED_GEMM_THREADS";
const KERNEL_ENV: &str = "INTERLEAVED_GEMM_KERNEL";

/// Which micro-kernel implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelPreference {
    /// Best implementation the CPU supports.
    #[default]
    Auto,
    /// Scalar code, available everywhere.
    Portable,
    /// AArch64 NEON.
    Neon,
    /// x86_64 AVX2 + FMA.
    Avx2,
}

impl KernelPreference {
    pub fn name(&self) -> &'static str {
        match self {
            KernelPreference::Auto => "auto",
            KernelPreference::Portable => "portable",
            KernelPreference::Neon => "neon",
            KernelPreference::Avx2 => "avx2",
        }
    }
}

impl FromStr for KernelPreference {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(KernelPreference::Auto),
            "portable" | "scalar" => Ok(KernelPreference::Portable),
            "neon" => Ok(KernelPreference::Neon),
            "avx2" => Ok(KernelPreference::Avx2),
            other => Err(GemmError::InvalidConfig(format!("unknown kernel '{}'", other))),
        }
    }
}

/// Per-operation GEMM parameters: `C = alpha * op(A) * B + beta * C`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmInfo {
    pub alpha: f32,
    pub beta: f32,
    /// Reshape B once and keep it (B is constant across runs, e.g. weights).
    pub pretranspose_b: bool,
    /// A is stored as `[M, K]` columns-by-rows instead of `[K, M]`.
    pub transpose_a: bool,
}

impl Default for GemmInfo {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.0,
            pretranspose_b: true,
            transpose_a: false,
        }
    }
}

impl GemmInfo {
    pub fn with_scale(alpha: f32, beta: f32) -> Self {
        Self {
            alpha,
            beta,
            ..Default::default()
        }
    }

    pub fn pretranspose_b(mut self, pretranspose: bool) -> Self {
        self.pretranspose_b = pretranspose;
        self
    }

    pub fn transpose_a(mut self, transpose: bool) -> Self {
        self.transpose_a = transpose;
        self
    }
}

/// Execution settings shared by every GEMM an operator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmConfig {
    /// Maximum worker threads; the scheduler may use fewer.
    pub num_threads: usize,
    pub kernel: KernelPreference,
    pub l1_cache_size: usize,
    pub l2_cache_size: usize,
    /// Force the N block size (rounded to the kernel's output width).
    pub x_block: Option<usize>,
    /// Force the K block size (rounded to the kernel's K unroll).
    pub k_block: Option<usize>,
}

impl Default for GemmConfig {
    fn default() -> Self {
        let num_threads = std::env::var(THREADS_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });

        let kernel = std::env::var(KERNEL_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            num_threads,
            kernel,
            l1_cache_size: DEFAULT_L1_CACHE_SIZE,
            l2_cache_size: DEFAULT_L2_CACHE_SIZE,
            x_block: None,
            k_block: None,
        }
    }
}

impl GemmConfig {
    pub fn single_threaded() -> Self {
        Self::default().with_threads(1)
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_kernel(mut self, kernel: KernelPreference) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_cache_sizes(mut self, l1: usize, l2: usize) -> Self {
        self.l1_cache_size = l1;
        self.l2_cache_size = l2;
        self
    }

    pub fn with_block_sizes(mut self, x_block: usize, k_block: usize) -> Self {
        self.x_block = Some(x_block);
        self.k_block = Some(k_block);
        self
    }
}
