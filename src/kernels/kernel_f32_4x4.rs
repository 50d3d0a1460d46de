//! 4×4 f32 micro-kernel.

use super::{Isa, Strategy};

/// Single-precision strategy with a 4×4 output tile.
///
/// Panels hold 4 values per K step: A gives one value per row, B one per
/// column. The kernel keeps 4 vector accumulators (one per row of the
/// tile), broadcasts each A value and multiply-adds it with the B vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct F32Gemm4x4 {
    isa: Isa,
}

impl Strategy for F32Gemm4x4 {
    type Operand = f32;
    type Result = f32;

    const NAME: &'static str = "f32_4x4";
    const OUT_WIDTH: usize = 4;
    const OUT_HEIGHT: usize = 4;
    const K_UNROLL: usize = 1;
    const A_INTERLEAVE: usize = 4;
    const B_INTERLEAVE: usize = 4;
    const B_TRANSPOSE: bool = false;

    fn with_isa(isa: Isa) -> Self {
        let isa = match isa {
            #[cfg(target_arch = "x86_64")]
            Isa::Avx2Fma => Isa::Avx2Fma,
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => Isa::Neon,
            _ => Isa::Portable,
        };
        Self { isa }
    }

    fn isa(&self) -> Isa {
        self.isa
    }

    unsafe fn kernel(
        &self,
        a: *const f32,
        b: *const f32,
        c: *mut f32,
        ablocks: usize,
        bblocks: usize,
        kern_k: usize,
    ) {
        let mut out = c;
        for ab in 0..ablocks {
            let a_panel = a.wrapping_add(ab * 4 * kern_k);
            for bb in 0..bblocks {
                let b_panel = b.wrapping_add(bb * 4 * kern_k);
                unsafe {
                    match self.isa {
                        #[cfg(target_arch = "x86_64")]
                        Isa::Avx2Fma => kernel_4x4_avx2(a_panel, b_panel, out, kern_k),
                        #[cfg(target_arch = "aarch64")]
                        Isa::Neon => kernel_4x4_neon(a_panel, b_panel, out, kern_k),
                        _ => kernel_4x4_portable(a_panel, b_panel, out, kern_k),
                    }
                    out = out.add(16);
                }
            }
        }
    }
}

/// Computes one tile: `c[0..16] = A_panel × B_panel`.
///
/// # Safety
///
/// - `a_pack` and `b_pack` point to `k * 4` contiguous f32 values
/// - `c` is writable for 16 f32 values
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_4x4_portable(a_pack: *const f32, b_pack: *const f32, c: *mut f32, k: usize) {
    let a = std::slice::from_raw_parts(a_pack, 4 * k);
    let b = std::slice::from_raw_parts(b_pack, 4 * k);
    let mut acc = [0.0f32; 16];

    for (a_k, b_k) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        for row in 0..4 {
            for col in 0..4 {
                acc[row * 4 + col] = a_k[row].mul_add(b_k[col], acc[row * 4 + col]);
            }
        }
    }

    std::ptr::copy_nonoverlapping(acc.as_ptr(), c, 16);
}

/// AVX2 version: 4 `__m128` accumulators, broadcast A, FMA.
///
/// # Safety
///
/// Same as [`kernel_4x4_portable`]; the CPU must support AVX2 and FMA.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[allow(clippy::identity_op)]
#[allow(clippy::erasing_op)]
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_4x4_avx2(a_pack: *const f32, b_pack: *const f32, c: *mut f32, k: usize) {
    use std::arch::x86_64::*;

    let mut c0 = _mm_setzero_ps();
    let mut c1 = _mm_setzero_ps();
    let mut c2 = _mm_setzero_ps();
    let mut c3 = _mm_setzero_ps();

    for p in 0..k {
        let b_vec = _mm_loadu_ps(b_pack.add(p * 4));

        let a0 = _mm_set1_ps(*a_pack.add(p * 4 + 0));
        let a1 = _mm_set1_ps(*a_pack.add(p * 4 + 1));
        let a2 = _mm_set1_ps(*a_pack.add(p * 4 + 2));
        let a3 = _mm_set1_ps(*a_pack.add(p * 4 + 3));

        c0 = _mm_fmadd_ps(a0, b_vec, c0);
        c1 = _mm_fmadd_ps(a1, b_vec, c1);
        c2 = _mm_fmadd_ps(a2, b_vec, c2);
        c3 = _mm_fmadd_ps(a3, b_vec, c3);
    }

    _mm_storeu_ps(c.add(0 * 4), c0);
    _mm_storeu_ps(c.add(1 * 4), c1);
    _mm_storeu_ps(c.add(2 * 4), c2);
    _mm_storeu_ps(c.add(3 * 4), c3);
}

/// NEON version, same register plan as the AVX2 one.
///
/// # Safety
///
/// Same as [`kernel_4x4_portable`]; the CPU must support NEON.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_4x4_neon(a_pack: *const f32, b_pack: *const f32, c: *mut f32, k: usize) {
    use std::arch::aarch64::*;

    let mut c0 = vdupq_n_f32(0.0);
    let mut c1 = vdupq_n_f32(0.0);
    let mut c2 = vdupq_n_f32(0.0);
    let mut c3 = vdupq_n_f32(0.0);

    for p in 0..k {
        let b_vec = vld1q_f32(b_pack.add(p * 4));
        let a_vec = vld1q_f32(a_pack.add(p * 4));

        c0 = vfmaq_laneq_f32::<0>(c0, b_vec, a_vec);
        c1 = vfmaq_laneq_f32::<1>(c1, b_vec, a_vec);
        c2 = vfmaq_laneq_f32::<2>(c2, b_vec, a_vec);
        c3 = vfmaq_laneq_f32::<3>(c3, b_vec, a_vec);
    }

    vst1q_f32(c, c0);
    vst1q_f32(c.add(4), c1);
    vst1q_f32(c.add(8), c2);
    vst1q_f32(c.add(12), c3);
}
