use crate::kernels::Accumulator;
use crate::lowp::LowpOutputStage;
use crate::tensor::Element;

/// Reference GEMM using i-k-j loop order: `C = alpha * A * B + beta * C`.
///
/// The innermost loop walks B and the accumulator row sequentially, so this
/// stays usable on the larger test sizes. Products are formed in the
/// accumulator type `R`, which for `u8` operands means `u32` with wrapping
/// arithmetic, the same as the kernels.
///
/// With `beta == 0` the old contents of C are never read.
///
/// # Arguments
///
/// * `a` - Matrix A (m × k), row-major
/// * `b` - Matrix B (k × n), row-major
/// * `c` - Matrix C (m × n), row-major
#[allow(clippy::too_many_arguments)]
pub fn reference_gemm<T, R>(a: &[T], b: &[T], c: &mut [R], m: usize, n: usize, k: usize, alpha: R, beta: R)
where
    T: Element,
    R: Accumulator + From<T>,
{
    assert_eq!(a.len(), m * k, "A: expected {}x{}={} elements", m, k, m * k);
    assert_eq!(b.len(), k * n, "B: expected {}x{}={} elements", k, n, k * n);
    assert_eq!(c.len(), m * n, "C: expected {}x{}={} elements", m, n, m * n);

    let mut row = vec![R::ZERO; n];
    for i in 0..m {
        row.fill(R::ZERO);
        for p in 0..k {
            let a_ip = R::from(a[i * k + p]);
            for j in 0..n {
                row[j] = row[j].accumulate(a_ip.scale(R::from(b[p * n + j])));
            }
        }
        for j in 0..n {
            let dst = &mut c[i * n + j];
            *dst = if beta == R::ZERO {
                row[j].scale(alpha)
            } else {
                row[j].scale(alpha).accumulate(dst.scale(beta))
            };
        }
    }
}

/// Reference for the quantized path: offsets applied to every operand
/// element before multiplying in `i64`, then the output stage.
pub fn reference_gemm_lowp(
    a: &[u8],
    b: &[u8],
    out: &mut [u8],
    m: usize,
    n: usize,
    k: usize,
    stage: &LowpOutputStage,
) {
    assert_eq!(a.len(), m * k, "A: expected {}x{}={} elements", m, k, m * k);
    assert_eq!(b.len(), k * n, "B: expected {}x{}={} elements", k, n, k * n);
    assert_eq!(out.len(), m * n, "output: expected {}x{}={} elements", m, n, m * n);

    for i in 0..m {
        for j in 0..n {
            let mut acc = 0i64;
            for p in 0..k {
                let a_ip = a[i * k + p] as i64 + stage.a_offset as i64;
                let b_pj = b[p * n + j] as i64 + stage.b_offset as i64;
                acc += a_ip * b_pj;
            }
            out[i * n + j] = stage.requantize(acc);
        }
    }
}

/// Row-major `rows × cols` into row-major `cols × rows`.
///
/// Used to build operands stored the other way round, such as a transposed A.
pub fn transpose<T: Copy>(src: &[T], dst: &mut [T], rows: usize, cols: usize) {
    assert_eq!(src.len(), rows * cols, "src: expected {}x{} elements", rows, cols);
    assert_eq!(dst.len(), rows * cols, "dst: expected {}x{} elements", cols, rows);
    for (i, src_row) in src.chunks_exact(cols.max(1)).take(rows).enumerate() {
        for (j, &value) in src_row.iter().enumerate() {
            dst[j * rows + i] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_product() {
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let b = [7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]; // 3x2
        let mut c = [f32::NAN; 4];
        reference_gemm(&a, &b, &mut c, 2, 2, 3, 1.0, 0.0);
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_alpha_beta() {
        let a = [1u8, 2, 3, 4];
        let b = [5u8, 6, 7, 8];
        let mut c = [1u32, 1, 1, 1];
        reference_gemm(&a, &b, &mut c, 2, 2, 2, 2, 3);
        assert_eq!(c, [2 * 19 + 3, 2 * 22 + 3, 2 * 43 + 3, 2 * 50 + 3]);
    }

    #[test]
    fn test_u8_products_wrap() {
        let a = vec![255u8; 70_000];
        let b = vec![255u8; 70_000];
        let mut c = [0u32];
        reference_gemm(&a, &b, &mut c, 1, 1, 70_000, 1, 0);
        assert_eq!(c[0], (255u64 * 255 * 70_000 % (1u64 << 32)) as u32);
    }

    #[test]
    fn test_transpose_twice_restores() {
        let a = [1u8, 2, 3, 4, 5, 6]; // 2x3
        let mut a_t = [0u8; 6];
        transpose(&a, &mut a_t, 2, 3);
        assert_eq!(a_t, [1, 4, 2, 5, 3, 6]);

        let mut back = [0u8; 6];
        transpose(&a_t, &mut back, 3, 2);
        assert_eq!(back, a);
    }
}
