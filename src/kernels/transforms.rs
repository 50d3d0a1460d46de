//! Panel packing and result merging shared by every strategy.

use std::ops::Range;

use super::Accumulator;
use crate::tensor::Element;

/// Pack `rows × depth` of a strided matrix into interleaved panels.
///
/// Element `(row, k)` is read from `input[row * row_stride + k * k_stride]`.
/// Rows are taken `interleave` at a time. Within a panel, K is walked in
/// groups of `block`: each row of the panel writes its `block` values for
/// the group, then the next row follows. Depth is zero-padded up to a
/// multiple of `k_unroll` and missing rows of the last panel are zero.
///
/// # Safety
///
/// - `input` must be readable at every `(row, k)` in `rows × depth`
/// - `out` must be writable for
///   `ceil(rows.len() / interleave) * interleave * round_up(depth.len(), k_unroll)`
///   elements
#[allow(clippy::too_many_arguments)]
pub unsafe fn interleave<T: Element>(
    out: *mut T,
    input: *const T,
    row_stride: usize,
    k_stride: usize,
    rows: Range<usize>,
    depth: Range<usize>,
    interleave: usize,
    block: usize,
    k_unroll: usize,
) {
    debug_assert!(k_unroll % block == 0, "K unroll {} is not a multiple of block {}", k_unroll, block);
    let padded = depth.len().next_multiple_of(k_unroll);
    let mut dst = out;

    for y in rows.clone().step_by(interleave) {
        for kb in (0..padded).step_by(block) {
            for r in 0..interleave {
                let row = y + r;
                for kk in 0..block {
                    let k = depth.start + kb + kk;
                    let value = if row < rows.end && k < depth.end {
                        unsafe { *input.add(row * row_stride + k * k_stride) }
                    } else {
                        T::default()
                    };
                    unsafe {
                        dst.write(value);
                        dst = dst.add(1);
                    }
                }
            }
        }
    }
}

/// Fold a strip of kernel tiles into the output.
///
/// `input` holds `ceil(cols.len() / out_width)` tiles of
/// `out_height × out_width` values, row-major. Each in-range element becomes
/// `alpha * tile + beta * out`. With `beta == 0` the old output is never
/// read, so it may hold anything.
///
/// # Safety
///
/// `out` must be readable and writable at `row * ldout + col` for every
/// `row` in `rows` and `col` in `cols`; `rows.len()` is at most `out_height`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn merge_results<T: Accumulator>(
    out: *mut T,
    input: *const T,
    ldout: usize,
    rows: Range<usize>,
    cols: Range<usize>,
    alpha: T,
    beta: T,
    out_width: usize,
    out_height: usize,
) {
    debug_assert!(rows.len() <= out_height);
    let overwrite = beta == T::ZERO;
    let mut tile = input;

    for x0 in cols.clone().step_by(out_width) {
        let width = out_width.min(cols.end - x0);
        for (i, y) in rows.clone().enumerate() {
            for j in 0..width {
                unsafe {
                    let acc = *tile.add(i * out_width + j);
                    let dst = out.add(y * ldout + x0 + j);
                    let value = if overwrite {
                        acc.scale(alpha)
                    } else {
                        acc.scale(alpha).accumulate((*dst).scale(beta))
                    };
                    dst.write(value);
                }
            }
        }
        tile = tile.wrapping_add(out_width * out_height);
    }
}
