//! 4×4 u8 → u32 micro-kernel.
//!
//! Panels (both A and B, `B_TRANSPOSE`): for every group of 16 K values, the
//! 4 rows (columns for B) of the panel each store their 16 bytes
//! contiguously, so one group is 64 bytes. An output tile is 16 u32s,
//! row-major.
//!
//! Products are widened u8 → u16 and pairwise-accumulated into u32 lanes,
//! so nothing overflows before the 32-bit accumulators wrap.

use super::{Isa, Strategy};

const GROUP: usize = 16;
const GROUP_BYTES: usize = 4 * GROUP;

/// 8-bit unsigned strategy with a 4×4 output tile and K unrolled by 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U8Gemm4x4 {
    isa: Isa,
}

impl Strategy for U8Gemm4x4 {
    type Operand = u8;
    type Result = u32;

    const NAME: &'static str = "u8_4x4";
    const OUT_WIDTH: usize = 4;
    const OUT_HEIGHT: usize = 4;
    const K_UNROLL: usize = 16;
    const A_INTERLEAVE: usize = 4;
    const B_INTERLEAVE: usize = 4;
    const B_TRANSPOSE: bool = true;

    fn with_isa(isa: Isa) -> Self {
        // Fall back to scalar code for an ISA this strategy has no kernel for.
        let isa = match isa {
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
        a: *const u8,
        b: *const u8,
        c: *mut u32,
        ablocks: usize,
        bblocks: usize,
        kern_k: usize,
    ) {
        debug_assert!(kern_k % GROUP == 0, "kern_k {} is not a multiple of 16", kern_k);
        match self.isa {
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => unsafe { kernel_u8_4x4_neon(a, b, c, ablocks, bblocks, kern_k) },
            _ => unsafe { kernel_u8_4x4_portable(a, b, c, ablocks, bblocks, kern_k) },
        }
    }
}

/// Scalar version of the kernel, bit-exact with the SIMD one.
///
/// # Safety
///
/// See [`Strategy::kernel`].
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_u8_4x4_portable(
    a: *const u8,
    b: *const u8,
    c: *mut u32,
    ablocks: usize,
    bblocks: usize,
    kern_k: usize,
) {
    let panel = 4 * kern_k;
    let mut out = c;

    for ab in 0..ablocks {
        let a_panel = std::slice::from_raw_parts(a.add(ab * panel), panel);
        for bb in 0..bblocks {
            let b_panel = std::slice::from_raw_parts(b.add(bb * panel), panel);
            let mut acc = [0u32; 16];

            for (a_group, b_group) in a_panel
                .chunks_exact(GROUP_BYTES)
                .zip(b_panel.chunks_exact(GROUP_BYTES))
            {
                for row in 0..4 {
                    let a_row = &a_group[row * GROUP..(row + 1) * GROUP];
                    for col in 0..4 {
                        let b_col = &b_group[col * GROUP..(col + 1) * GROUP];
                        // 16 products of at most 255*255 fit in u32.
                        let sum: u32 = a_row
                            .iter()
                            .zip(b_col)
                            .map(|(&x, &y)| x as u32 * y as u32)
                            .sum();
                        acc[row * 4 + col] = acc[row * 4 + col].wrapping_add(sum);
                    }
                }
            }

            std::ptr::copy_nonoverlapping(acc.as_ptr(), out, 16);
            out = out.add(16);
        }
    }
}

/// NEON kernel.
///
/// Keeps the 16 outputs in 16 `uint32x4_t` accumulators. Each K group is a
/// `umull`/`umull2` pair per output followed by `uadalp` into the
/// accumulator. The loop advances two groups at a time; the last one (odd
/// group count) or last two (even count) run detached after the loop.
///
/// # Safety
///
/// See [`Strategy::kernel`]. The CPU must support NEON.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_u8_4x4_neon(
    a: *const u8,
    b: *const u8,
    c: *mut u32,
    ablocks: usize,
    bblocks: usize,
    kern_k: usize,
) {
    use std::arch::aarch64::*;

    let groups = kern_k / GROUP;
    let odd = groups % 2 == 1;
    // Pairs handled by the loop body; the tail takes the rest.
    let looped = if odd { groups / 2 } else { (groups / 2).saturating_sub(1) };
    let panel = 4 * kern_k;
    let mut out = c;

    for ab in 0..ablocks {
        let a_panel = a.add(ab * panel);
        for bb in 0..bblocks {
            let b_panel = b.add(bb * panel);
            let mut acc = [[vdupq_n_u32(0); 4]; 4];
            let mut offset = 0;

            for _ in 0..looped {
                accumulate_group(&mut acc, a_panel.add(offset), b_panel.add(offset));
                accumulate_group(
                    &mut acc,
                    a_panel.add(offset + GROUP_BYTES),
                    b_panel.add(offset + GROUP_BYTES),
                );
                offset += 2 * GROUP_BYTES;
            }

            if odd {
                accumulate_group(&mut acc, a_panel.add(offset), b_panel.add(offset));
            } else if groups > 0 {
                accumulate_group(&mut acc, a_panel.add(offset), b_panel.add(offset));
                accumulate_group(
                    &mut acc,
                    a_panel.add(offset + GROUP_BYTES),
                    b_panel.add(offset + GROUP_BYTES),
                );
            }

            for row in 0..4 {
                for col in 0..4 {
                    *out.add(row * 4 + col) = vaddvq_u32(acc[row][col]);
                }
            }
            out = out.add(16);
        }
    }
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn accumulate_group(
    acc: &mut [[std::arch::aarch64::uint32x4_t; 4]; 4],
    a: *const u8,
    b: *const u8,
) {
    use std::arch::aarch64::*;

    let a_rows = [
        vld1q_u8(a),
        vld1q_u8(a.add(GROUP)),
        vld1q_u8(a.add(2 * GROUP)),
        vld1q_u8(a.add(3 * GROUP)),
    ];
    let b_cols = [
        vld1q_u8(b),
        vld1q_u8(b.add(GROUP)),
        vld1q_u8(b.add(2 * GROUP)),
        vld1q_u8(b.add(3 * GROUP)),
    ];

    for (row, a_row) in a_rows.iter().enumerate() {
        for (col, b_col) in b_cols.iter().enumerate() {
            let lo = vmull_u8(vget_low_u8(*a_row), vget_low_u8(*b_col));
            let hi = vmull_high_u8(*a_row, *b_col);
            acc[row][col] = vpadalq_u16(acc[row][col], lo);
            acc[row][col] = vpadalq_u16(acc[row][col], hi);
        }
    }
}
