//! Micro-kernel strategies for the interleaved GEMM.
//!
//! A strategy computes one strip of fixed-shape output tiles from operand
//! panels that have been repacked into the layout it asks for. The blocked
//! wrappers in [`crate::blocked`] only talk to kernels through the
//! [`Strategy`] trait, so they never see which instruction set is behind it.
//!
//! Available strategies:
//! - `kernel_u8_4x4`: u8 operands, u32 accumulators, 4×4 tile, K unrolled by 16
//!   (NEON, portable)
//! - `kernel_f32_4x4`: f32 operands and accumulators, 4×4 tile
//!   (AVX2+FMA, NEON, portable)
//!
//! Which implementation runs is decided once per `configure` from
//! [`CpuInfo`] and the configured [`KernelPreference`], through the
//! [`KERNELS`] registry.

pub mod kernel_f32_4x4;
pub mod kernel_u8_4x4;
pub mod transforms;

use std::fmt;
use std::ops::Range;

use tracing::debug;

use crate::config::{DEFAULT_L1_CACHE_SIZE, DEFAULT_L2_CACHE_SIZE, KernelPreference};
use crate::error::{GemmError, Result};
use crate::tensor::{DataType, Element};

pub use kernel_f32_4x4::F32Gemm4x4;
pub use kernel_u8_4x4::U8Gemm4x4;

/// Instruction set a kernel implementation is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isa {
    Portable,
    Neon,
    Avx2Fma,
}

impl Isa {
    pub fn name(&self) -> &'static str {
        match self {
            Isa::Portable => "portable",
            Isa::Neon => "neon",
            Isa::Avx2Fma => "avx2",
        }
    }

    fn matches(&self, preference: KernelPreference) -> bool {
        matches!(
            (self, preference),
            (_, KernelPreference::Auto)
                | (Isa::Portable, KernelPreference::Portable)
                | (Isa::Neon, KernelPreference::Neon)
                | (Isa::Avx2Fma, KernelPreference::Avx2)
        )
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the running CPU can do, plus the cache sizes block sizes are tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    pub has_neon: bool,
    pub has_avx2: bool,
    pub has_fma: bool,
    pub l1_cache_size: usize,
    pub l2_cache_size: usize,
}

impl CpuInfo {
    /// Query the host CPU.
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut info = Self::portable();

        #[cfg(target_arch = "x86_64")]
        {
            info.has_avx2 = is_x86_feature_detected!("avx2");
            info.has_fma = is_x86_feature_detected!("fma");
        }

        #[cfg(target_arch = "aarch64")]
        {
            info.has_neon = std::arch::is_aarch64_feature_detected!("neon");
        }

        info
    }

    /// A CPU with no SIMD extensions.
    pub fn portable() -> Self {
        Self {
            has_neon: false,
            has_avx2: false,
            has_fma: false,
            l1_cache_size: DEFAULT_L1_CACHE_SIZE,
            l2_cache_size: DEFAULT_L2_CACHE_SIZE,
        }
    }

    pub fn with_cache_sizes(mut self, l1: usize, l2: usize) -> Self {
        self.l1_cache_size = l1;
        self.l2_cache_size = l2;
        self
    }

    pub fn supports(&self, isa: Isa) -> bool {
        match isa {
            Isa::Portable => true,
            Isa::Neon => self.has_neon,
            Isa::Avx2Fma => self.has_avx2 && self.has_fma,
        }
    }
}

impl Default for CpuInfo {
    fn default() -> Self {
        Self::detect()
    }
}

/// One compiled-in kernel implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDescription {
    pub name: &'static str,
    /// Operand type the kernel consumes.
    pub data_type: DataType,
    pub isa: Isa,
}

/// Every kernel implementation in this build, best first per data type.
pub const KERNELS: &[KernelDescription] = &[
    #[cfg(target_arch = "aarch64")]
    KernelDescription {
        name: "u8_4x4_neon",
        data_type: DataType::U8,
        isa: Isa::Neon,
    },
    KernelDescription {
        name: "u8_4x4_portable",
        data_type: DataType::U8,
        isa: Isa::Portable,
    },
    #[cfg(target_arch = "x86_64")]
    KernelDescription {
        name: "f32_4x4_avx2",
        data_type: DataType::F32,
        isa: Isa::Avx2Fma,
    },
    #[cfg(target_arch = "aarch64")]
    KernelDescription {
        name: "f32_4x4_neon",
        data_type: DataType::F32,
        isa: Isa::Neon,
    },
    KernelDescription {
        name: "f32_4x4_portable",
        data_type: DataType::F32,
        isa: Isa::Portable,
    },
];

/// Pick the kernel for `data_type` on `cpu`.
///
/// `Auto` takes the first registered implementation the CPU supports. An
/// explicit preference fails if that implementation was not compiled in or
/// the CPU lacks the instructions.
pub fn select_kernel(
    data_type: DataType,
    cpu: &CpuInfo,
    preference: KernelPreference,
) -> Result<KernelDescription> {
    let mut candidates = KERNELS.iter().filter(|k| k.data_type == data_type).peekable();
    if candidates.peek().is_none() {
        return Err(GemmError::UnsupportedDataType(data_type));
    }

    let mut compiled_in = false;
    for kernel in candidates.filter(|k| k.isa.matches(preference)) {
        compiled_in = true;
        if cpu.supports(kernel.isa) {
            debug!(kernel = kernel.name, ?preference, "selected gemm kernel");
            return Ok(*kernel);
        }
    }

    let reason = if compiled_in {
        "not supported by this CPU"
    } else {
        "not compiled into this build"
    };
    Err(GemmError::UnsupportedKernel(format!(
        "{:?} {} kernel {}",
        data_type,
        preference.name(),
        reason
    )))
}

/// Accumulator element type of a strategy, where alpha and beta are applied.
pub trait Accumulator: Element {
    const ZERO: Self;
    const ONE: Self;

    /// Convert an alpha/beta value, or `None` if this type cannot hold it.
    fn from_scale(value: f32) -> Option<Self>;

    fn scale(self, factor: Self) -> Self;

    fn accumulate(self, other: Self) -> Self;
}

impl Accumulator for u32 {
    const ZERO: Self = 0;
    const ONE: Self = 1;

    fn from_scale(value: f32) -> Option<Self> {
        if value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f32 {
            Some(value as u32)
        } else {
            None
        }
    }

    // Integer accumulation wraps modulo 2^32, like the SIMD lanes do.
    #[inline(always)]
    fn scale(self, factor: Self) -> Self {
        self.wrapping_mul(factor)
    }

    #[inline(always)]
    fn accumulate(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Accumulator for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    fn from_scale(value: f32) -> Option<Self> {
        value.is_finite().then_some(value)
    }

    #[inline(always)]
    fn scale(self, factor: Self) -> Self {
        self * factor
    }

    #[inline(always)]
    fn accumulate(self, other: Self) -> Self {
        self + other
    }
}

/// A fixed-shape micro-kernel together with the panel layout it consumes.
///
/// The blocking constants tell the wrappers how to size workloads:
/// `kern_k` is K rounded up to `K_UNROLL`, `bblocks` is the N range divided
/// by `OUT_WIDTH`, and each A panel covers `OUT_HEIGHT` rows.
///
/// Panel layout: A panels hold `A_INTERLEAVE` rows; for every group of
/// `K_UNROLL` K values each row stores its `K_UNROLL` values contiguously.
/// B panels hold `B_INTERLEAVE` columns. With `B_TRANSPOSE` they use the same
/// K-contiguous grouping as A, otherwise each K step stores the
/// `B_INTERLEAVE` column values next to each other. Padding is zero.
pub trait Strategy: Copy + Send + Sync + 'static {
    type Operand: Element;
    type Result: Accumulator;

    const NAME: &'static str;
    const OUT_WIDTH: usize;
    const OUT_HEIGHT: usize;
    const K_UNROLL: usize;
    const A_INTERLEAVE: usize;
    const B_INTERLEAVE: usize;
    const B_TRANSPOSE: bool;

    /// Bind the strategy to one of its implementations.
    fn with_isa(isa: Isa) -> Self;

    fn isa(&self) -> Isa;

    /// Resolve the implementation through the registry.
    fn new(cpu: &CpuInfo, preference: KernelPreference) -> Result<Self> {
        let kernel = select_kernel(<Self::Operand as Element>::DATA_TYPE, cpu, preference)?;
        Ok(Self::with_isa(kernel.isa))
    }

    /// Compute `ablocks * bblocks` output tiles.
    ///
    /// Tiles are written to `c` back to back, each `OUT_HEIGHT` rows of
    /// `OUT_WIDTH` values, B blocks fastest. Results overwrite `c`.
    ///
    /// # Safety
    ///
    /// - `kern_k` is a multiple of `K_UNROLL`
    /// - `a` holds `ablocks` A panels of `A_INTERLEAVE * kern_k` elements
    /// - `b` holds `bblocks` B panels of `B_INTERLEAVE * kern_k` elements
    /// - `c` is writable for `ablocks * bblocks * OUT_WIDTH * OUT_HEIGHT` values
    unsafe fn kernel(
        &self,
        a: *const Self::Operand,
        b: *const Self::Operand,
        c: *mut Self::Result,
        ablocks: usize,
        bblocks: usize,
        kern_k: usize,
    );

    /// Repack rows `rows` and columns `depth` of A into panels at `out`.
    ///
    /// A is addressed as `input[row * ld + k]`, or `input[k * ld + row]`
    /// when `transposed`.
    ///
    /// # Safety
    ///
    /// `input` must be readable at every addressed element and `out` must
    /// have room for `ceil(rows / A_INTERLEAVE)` panels of padded depth.
    unsafe fn prepare_a(
        &self,
        out: *mut Self::Operand,
        input: *const Self::Operand,
        ld: usize,
        rows: Range<usize>,
        depth: Range<usize>,
        transposed: bool,
    ) {
        let (row_stride, k_stride) = if transposed { (1, ld) } else { (ld, 1) };
        unsafe {
            transforms::interleave(
                out,
                input,
                row_stride,
                k_stride,
                rows,
                depth,
                Self::A_INTERLEAVE,
                Self::K_UNROLL,
                Self::K_UNROLL,
            )
        }
    }

    /// Repack columns `cols` and rows `depth` of B (`input[k * ld + n]`).
    ///
    /// # Safety
    ///
    /// Same contract as [`Strategy::prepare_a`], with `B_INTERLEAVE` columns
    /// per panel.
    unsafe fn prepare_b(
        &self,
        out: *mut Self::Operand,
        input: *const Self::Operand,
        ld: usize,
        cols: Range<usize>,
        depth: Range<usize>,
    ) {
        let block = if Self::B_TRANSPOSE { Self::K_UNROLL } else { 1 };
        unsafe {
            transforms::interleave(
                out,
                input,
                1,
                ld,
                cols,
                depth,
                Self::B_INTERLEAVE,
                block,
                Self::K_UNROLL,
            )
        }
    }

    /// Fold a strip of tiles produced by [`Strategy::kernel`] into `out`.
    ///
    /// # Safety
    ///
    /// `out` must be writable at `row * ldout + col` for every row in
    /// `rows` and col in `cols`; `input` holds the matching tiles.
    #[allow(clippy::too_many_arguments)]
    unsafe fn merge(
        &self,
        out: *mut Self::Result,
        input: *const Self::Result,
        ldout: usize,
        rows: Range<usize>,
        cols: Range<usize>,
        alpha: Self::Result,
        beta: Self::Result,
    ) {
        unsafe {
            transforms::merge_results(
                out,
                input,
                ldout,
                rows,
                cols,
                alpha,
                beta,
                Self::OUT_WIDTH,
                Self::OUT_HEIGHT,
            )
        }
    }
}
