use interleaved_gemm::matrix::{reference_gemm, reference_gemm_lowp, transpose};
use interleaved_gemm::{
    DataLayout, DataType, F32Gemm4x4, Gemm, GemmConfig, GemmError, GemmInfo, GemmInterleaved,
    GemmLowp, KernelPreference, LowpOutputStage, Strategy, Tensor, TensorShape, U8Gemm4x4, multiply_f32,
    multiply_u8,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn assert_matrices_equal(expected: &[f32], actual: &[f32], name: &str) {
    assert_eq!(expected.len(), actual.len(), "{}: length mismatch", name);
    for i in 0..expected.len() {
        let tolerance = 1e-4 * expected[i].abs().max(1.0);
        assert!(
            (expected[i] - actual[i]).abs() < tolerance,
            "{}: mismatch at index {}: expected {}, got {}",
            name,
            i,
            expected[i],
            actual[i]
        );
    }
}

fn assert_exact(expected: &[u32], actual: &[u32], name: &str) {
    assert_eq!(expected.len(), actual.len(), "{}: length mismatch", name);
    for i in 0..expected.len() {
        assert_eq!(
            expected[i], actual[i],
            "{}: mismatch at index {}: expected {}, got {}",
            name, i, expected[i], actual[i]
        );
    }
}

fn random_u8(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.r#gen()).collect()
}

fn random_f32(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn config(threads: usize) -> GemmConfig {
    GemmConfig::default()
        .with_threads(threads)
        .with_kernel(KernelPreference::Auto)
}

/// Row-major `a` (m×k), `b` (k×n) through the u8 operator into a new C.
#[allow(clippy::too_many_arguments)]
fn run_u8(
    a: &[u8],
    b: &[u8],
    c_init: &[u32],
    m: usize,
    n: usize,
    k: usize,
    config: GemmConfig,
    info: GemmInfo,
) -> Vec<u32> {
    let a = Tensor::from_slice(TensorShape::new(&[k, m]), a);
    let b = Tensor::from_slice(TensorShape::new(&[n, k]), b);
    let mut c = Tensor::from_slice(TensorShape::new(&[n, m]), c_init);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config);
    gemm.configure(&a, &b, &mut c, info).unwrap();
    gemm.run(&a, &b, &mut c).unwrap();
    c.to_vec::<u32>()
}

fn expected_u8(a: &[u8], b: &[u8], c_init: &[u32], m: usize, n: usize, k: usize, alpha: u32, beta: u32) -> Vec<u32> {
    let mut c = c_init.to_vec();
    reference_gemm(a, b, &mut c, m, n, k, alpha, beta);
    c
}

// ============================================================
// Worked examples
// ============================================================

#[test]
fn test_8x8x32_two_workloads() {
    let (m, n, k) = (8, 8, 32);
    let mut rng = StdRng::seed_from_u64(1);
    let a = random_u8(&mut rng, m * k);
    let b = random_u8(&mut rng, k * n);

    let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
    let mut c_t = Tensor::new(TensorShape::new(&[n, m]), DataType::U32);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(1).with_block_sizes(4, 32));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default()).unwrap();

    let workloads = gemm.matrix_multiply_workloads();
    assert_eq!(workloads.len(), 2);
    assert_eq!((workloads[0].x0, workloads[0].xmax), (0, 4));
    assert_eq!((workloads[1].x0, workloads[1].xmax), (4, 8));
    assert!(workloads.iter().all(|w| w.kern_k == 32 && w.bblocks == 1));
    assert_eq!(workloads[1].offset_transformed_b, 4 * 32);
    assert_eq!(gemm.transform_a_workloads().len(), 1);

    gemm.run(&a_t, &b_t, &mut c_t).unwrap();
    let expected = expected_u8(&a, &b, &vec![0; m * n], m, n, k, 1, 0);
    assert_exact(&expected, &c_t.to_vec::<u32>(), "8x8x32");
}

#[test]
fn test_2x3_times_3x2() {
    let a = [1u8, 2, 3, 4, 5, 6];
    let b = [7u8, 8, 9, 10, 11, 12];
    let c = run_u8(&a, &b, &[0; 4], 2, 2, 3, config(1), GemmInfo::default());
    assert_eq!(c, vec![58, 64, 139, 154]);
}

#[test]
fn test_split_k_applies_beta_once() {
    let (m, n, k) = (9, 11, 40);
    let mut rng = StdRng::seed_from_u64(2);
    let a = random_u8(&mut rng, m * k);
    let b = random_u8(&mut rng, k * n);
    let c_init: Vec<u32> = (0..m * n).map(|i| 1000 + i as u32).collect();

    let cfg = config(1).with_block_sizes(4, 16);
    let c = run_u8(&a, &b, &c_init, m, n, k, cfg, GemmInfo::with_scale(2.0, 1.0));
    let expected = expected_u8(&a, &b, &c_init, m, n, k, 2, 1);
    assert_exact(&expected, &c, "split K, beta = 1");

    let c = run_u8(&a, &b, &c_init, m, n, k, config(1).with_block_sizes(4, 16), GemmInfo::with_scale(1.0, 3.0));
    let expected = expected_u8(&a, &b, &c_init, m, n, k, 1, 3);
    assert_exact(&expected, &c, "split K, beta = 3");
}

#[test]
fn test_beta_zero_ignores_old_output() {
    let (m, n, k) = (5, 6, 7);
    let mut rng = StdRng::seed_from_u64(3);
    let a = random_f32(&mut rng, m * k);
    let b = random_f32(&mut rng, k * n);

    let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
    let mut c_t = Tensor::from_slice(TensorShape::new(&[n, m]), &vec![f32::NAN; m * n]);
    let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(config(1));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default()).unwrap();
    gemm.run(&a_t, &b_t, &mut c_t).unwrap();

    let mut expected = vec![0.0; m * n];
    reference_gemm(&a, &b, &mut expected, m, n, k, 1.0, 0.0);
    assert_matrices_equal(&expected, &c_t.to_vec::<f32>(), "beta = 0 over NaN");
}

// ============================================================
// Sizes, blocking and threading
// ============================================================

#[test]
fn test_small_odd_sizes() {
    let test_sizes = [
        (1, 1, 1),
        (3, 3, 3),
        (5, 5, 5),
        (7, 7, 7),
        (3, 5, 7),
        (7, 3, 5),
        (11, 13, 17),
    ];
    let mut rng = StdRng::seed_from_u64(4);

    for (m, n, k) in test_sizes {
        let a = random_u8(&mut rng, m * k);
        let b = random_u8(&mut rng, k * n);
        let c = run_u8(&a, &b, &vec![0; m * n], m, n, k, config(1), GemmInfo::default());
        let expected = expected_u8(&a, &b, &vec![0; m * n], m, n, k, 1, 0);
        assert_exact(&expected, &c, &format!("{}x{}x{}", m, n, k));
    }
}

#[test]
fn test_results_independent_of_thread_count() {
    let (m, n, k) = (37, 29, 50);
    let mut rng = StdRng::seed_from_u64(5);
    let a = random_u8(&mut rng, m * k);
    let b = random_u8(&mut rng, k * n);
    let c_init: Vec<u32> = (0..m * n).map(|i| i as u32 * 7).collect();
    let expected = expected_u8(&a, &b, &c_init, m, n, k, 3, 2);

    for threads in 1..=6 {
        for pretranspose in [true, false] {
            let cfg = config(threads).with_block_sizes(8, 16);
            let info = GemmInfo::with_scale(3.0, 2.0).pretranspose_b(pretranspose);
            let c = run_u8(&a, &b, &c_init, m, n, k, cfg, info);
            assert_exact(
                &expected,
                &c,
                &format!("{} threads, pretranspose {}", threads, pretranspose),
            );
        }
    }
}

#[test]
fn test_ring_with_many_workloads() {
    // 8 N blocks × 5 K blocks cycling through a 3-slot ring.
    let (m, n, k) = (64, 60, 72);
    let mut rng = StdRng::seed_from_u64(6);
    let a = random_f32(&mut rng, m * k);
    let b = random_f32(&mut rng, k * n);

    let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
    let mut c_t = Tensor::new(TensorShape::new(&[n, m]), DataType::F32);
    let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(config(4).with_block_sizes(8, 16));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default().pretranspose_b(false))
        .unwrap();
    assert_eq!(gemm.matrix_multiply_workloads().len(), 40);
    assert_eq!(gemm.num_threads(), Some(4));
    let offsets: Vec<_> = gemm
        .matrix_multiply_workloads()
        .iter()
        .map(|w| w.offset_transformed_b)
        .collect();
    assert_eq!(offsets[0..4], [0, 128, 256, 0]);

    gemm.run(&a_t, &b_t, &mut c_t).unwrap();
    let mut expected = vec![0.0; m * n];
    reference_gemm(&a, &b, &mut expected, m, n, k, 1.0, 0.0);
    assert_matrices_equal(&expected, &c_t.to_vec::<f32>(), "ring");
}

#[test]
fn test_threads_capped_by_row_blocks() {
    let a = Tensor::new(TensorShape::new(&[8, 6]), DataType::U8);
    let b = Tensor::new(TensorShape::new(&[8, 8]), DataType::U8);
    let mut c = Tensor::new(TensorShape::new(&[8, 6]), DataType::U32);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(16));
    gemm.configure(&a, &b, &mut c, GemmInfo::default()).unwrap();
    // 6 rows → 2 row blocks of 4.
    assert_eq!(gemm.num_threads(), Some(2));
}

#[test]
fn test_repeated_runs_reuse_pretransposed_b() {
    let (m, n, k) = (12, 10, 20);
    let mut rng = StdRng::seed_from_u64(7);
    let b = random_u8(&mut rng, k * n);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
    let mut c_t = Tensor::new(TensorShape::new(&[n, m]), DataType::U32);

    let a0 = random_u8(&mut rng, m * k);
    let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a0);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(2));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default()).unwrap();
    gemm.prepare(&b_t).unwrap();

    for _ in 0..3 {
        let a = random_u8(&mut rng, m * k);
        let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a);
        gemm.run(&a_t, &b_t, &mut c_t).unwrap();
        let expected = expected_u8(&a, &b, &vec![0; m * n], m, n, k, 1, 0);
        assert_exact(&expected, &c_t.to_vec::<u32>(), "repeated run");
    }
}

// ============================================================
// Layouts, batches and multis
// ============================================================

#[test]
fn test_batches_and_multis() {
    let (m, n, k, batches, multis) = (6, 5, 18, 3, 2);
    let mut rng = StdRng::seed_from_u64(8);
    let a = random_u8(&mut rng, m * k * batches * multis);
    let b = random_u8(&mut rng, k * n * multis);

    let a_t = Tensor::from_slice(TensorShape::new(&[k, m, batches, multis]), &a);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k, multis]), &b);
    let mut c_t = Tensor::new(TensorShape::new(&[n, m, batches, multis]), DataType::U32);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(3).with_block_sizes(4, 16));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default()).unwrap();
    gemm.run(&a_t, &b_t, &mut c_t).unwrap();
    let c = c_t.to_vec::<u32>();

    for multi in 0..multis {
        let b_slice = &b[multi * k * n..(multi + 1) * k * n];
        for batch in 0..batches {
            let idx = multi * batches + batch;
            let a_slice = &a[idx * m * k..(idx + 1) * m * k];
            let expected = expected_u8(a_slice, b_slice, &vec![0; m * n], m, n, k, 1, 0);
            assert_exact(
                &expected,
                &c[idx * m * n..(idx + 1) * m * n],
                &format!("batch {} multi {}", batch, multi),
            );
        }
    }
}

#[test]
fn test_nhwc_rows_span_width_and_height() {
    // [K, W, H, N]: 15 rows per image, 2 images.
    let (k, w, h, images, n) = (12, 3, 5, 2, 7);
    let m = w * h;
    let mut rng = StdRng::seed_from_u64(9);
    let a = random_f32(&mut rng, k * m * images);
    let b = random_f32(&mut rng, k * n);

    let a_t = Tensor::from_slice_with_layout(TensorShape::new(&[k, w, h, images]), DataLayout::Nhwc, &a);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
    let mut c_t = Tensor::from_slice_with_layout(
        TensorShape::new(&[n, w, h, images]),
        DataLayout::Nhwc,
        &vec![0.0f32; n * m * images],
    );
    let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(config(3));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default()).unwrap();
    let params = gemm.params().unwrap();
    assert_eq!((params.m, params.batches, params.multis), (15, 2, 1));
    gemm.run(&a_t, &b_t, &mut c_t).unwrap();
    let c = c_t.to_vec::<f32>();

    for image in 0..images {
        let mut expected = vec![0.0; m * n];
        reference_gemm(&a[image * m * k..(image + 1) * m * k], &b, &mut expected, m, n, k, 1.0, 0.0);
        assert_matrices_equal(&expected, &c[image * m * n..(image + 1) * m * n], "nhwc");
    }
}

#[test]
fn test_transposed_a() {
    let (m, n, k) = (10, 9, 21);
    let mut rng = StdRng::seed_from_u64(10);
    let a = random_u8(&mut rng, m * k);
    let b = random_u8(&mut rng, k * n);
    // Stored as k rows of m: element (row, kk) at kk * m + row.
    let mut a_stored = vec![0u8; m * k];
    transpose(&a, &mut a_stored, m, k);

    let a_t = Tensor::from_slice(TensorShape::new(&[m, k]), &a_stored);
    let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
    let mut c_t = Tensor::new(TensorShape::new(&[n, m]), DataType::U32);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(2).with_block_sizes(4, 16));
    gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::default().transpose_a(true))
        .unwrap();
    gemm.run(&a_t, &b_t, &mut c_t).unwrap();

    let expected = expected_u8(&a, &b, &vec![0; m * n], m, n, k, 1, 0);
    assert_exact(&expected, &c_t.to_vec::<u32>(), "transposed A");
}

// ============================================================
// Float scaling
// ============================================================

#[test]
fn test_f32_alpha_beta() {
    let (m, n, k) = (17, 23, 31);
    let mut rng = StdRng::seed_from_u64(11);
    let a = random_f32(&mut rng, m * k);
    let b = random_f32(&mut rng, k * n);
    let c_init = random_f32(&mut rng, m * n);

    for (alpha, beta) in [(1.0, 0.0), (0.5, 1.0), (-2.0, 0.25)] {
        let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a);
        let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
        let mut c_t = Tensor::from_slice(TensorShape::new(&[n, m]), &c_init);
        let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(config(2).with_block_sizes(8, 8));
        gemm.configure(&a_t, &b_t, &mut c_t, GemmInfo::with_scale(alpha, beta))
            .unwrap();
        gemm.run(&a_t, &b_t, &mut c_t).unwrap();

        let mut expected = c_init.clone();
        reference_gemm(&a, &b, &mut expected, m, n, k, alpha, beta);
        assert_matrices_equal(
            &expected,
            &c_t.to_vec::<f32>(),
            &format!("alpha {} beta {}", alpha, beta),
        );
    }
}

// ============================================================
// Quantized path
// ============================================================

#[test]
fn test_lowp_matches_reference() {
    let (m, n, k) = (13, 9, 40);
    let mut rng = StdRng::seed_from_u64(12);
    let a = random_u8(&mut rng, m * k);
    let b = random_u8(&mut rng, k * n);
    let stage = LowpOutputStage {
        a_offset: -128,
        b_offset: -3,
        output_offset: 20_000,
        output_mult_int: 3,
        shift: 12,
    };

    for pretranspose in [true, false] {
        let a_t = Tensor::from_slice(TensorShape::new(&[k, m]), &a);
        let b_t = Tensor::from_slice(TensorShape::new(&[n, k]), &b);
        let mut out = Tensor::new(TensorShape::new(&[n, m]), DataType::U8);
        let mut gemm = GemmLowp::new(config(2));
        gemm.configure(&a_t, &b_t, &out, stage, pretranspose).unwrap();
        gemm.run(&a_t, &b_t, &mut out).unwrap();

        let mut expected = vec![0u8; m * n];
        reference_gemm_lowp(&a, &b, &mut expected, m, n, k, &stage);
        assert_eq!(out.to_vec::<u8>(), expected, "pretranspose {}", pretranspose);
    }
}

// ============================================================
// Errors
// ============================================================

#[test]
fn test_configure_rejects_mismatched_k() {
    let a = Tensor::new(TensorShape::new(&[8, 4]), DataType::U8);
    let b = Tensor::new(TensorShape::new(&[4, 9]), DataType::U8);
    let mut c = Tensor::new(TensorShape::new(&[4, 4]), DataType::U32);
    let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(1));
    assert_eq!(
        gemm.configure(&a, &b, &mut c, GemmInfo::default()),
        Err(GemmError::InnerDimensionMismatch { a_k: 8, b_k: 9 })
    );
    assert!(!gemm.is_configured());
}

#[test]
fn test_configure_rejects_fractional_integer_scale() {
    let a = Tensor::new(TensorShape::new(&[8, 4]), DataType::U8);
    let b = Tensor::new(TensorShape::new(&[4, 8]), DataType::U8);
    let mut c = Tensor::new(TensorShape::new(&[4, 4]), DataType::U32);
    let mut gemm = Gemm::new(DataType::U8, config(1)).unwrap();
    assert!(matches!(
        gemm.configure(&a, &b, &mut c, GemmInfo::with_scale(0.5, 0.0)),
        Err(GemmError::InvalidScale { .. })
    ));
}

#[test]
fn test_unavailable_kernel_is_an_error() {
    // No u8 kernel exists for AVX2.
    let result = Gemm::new(DataType::U8, config(1).with_kernel(KernelPreference::Avx2));
    assert!(matches!(result, Err(GemmError::UnsupportedKernel(_))));
}

// ============================================================
// Convenience API
// ============================================================

#[test]
fn test_multiply_u8() {
    let (m, n, k) = (33, 17, 70);
    let mut rng = StdRng::seed_from_u64(13);
    let a = random_u8(&mut rng, m * k);
    let b = random_u8(&mut rng, k * n);
    let mut c = vec![0u32; m * n];
    multiply_u8(&a, &b, &mut c, m, n, k).unwrap();
    assert_exact(&expected_u8(&a, &b, &vec![0; m * n], m, n, k, 1, 0), &c, "multiply_u8");
}

#[test]
fn test_multiply_f32() {
    let (m, n, k) = (40, 24, 19);
    let mut rng = StdRng::seed_from_u64(14);
    let a = random_f32(&mut rng, m * k);
    let b = random_f32(&mut rng, k * n);
    let c_init = random_f32(&mut rng, m * n);

    let mut c = c_init.clone();
    multiply_f32(&a, &b, &mut c, m, n, k, 1.5, 0.5, 4).unwrap();
    let mut expected = c_init.clone();
    reference_gemm(&a, &b, &mut expected, m, n, k, 1.5, 0.5);
    assert_matrices_equal(&expected, &c, "multiply_f32");
}

#[test]
fn test_multiply_empty_depth_scales_c() {
    let mut c = vec![2.0f32; 6];
    multiply_f32(&[], &[], &mut c, 2, 3, 0, 1.0, 0.5, 1).unwrap();
    assert_eq!(c, vec![1.0; 6]);
}

#[test]
fn test_multiply_rejects_non_finite_scale() {
    let a = vec![1.0f32; 16];
    let b = vec![1.0f32; 16];
    let mut c = vec![0.0f32; 16];
    let err = multiply_f32(&a, &b, &mut c, 4, 4, 4, f32::NAN, 0.0, 1).unwrap_err();
    assert!(matches!(err, GemmError::InvalidScale { .. }), "got {:?}", err);

    let err = multiply_f32(&[], &[], &mut c, 4, 4, 0, 1.0, f32::INFINITY, 1).unwrap_err();
    assert!(matches!(err, GemmError::InvalidScale { .. }), "got {:?}", err);
}

#[test]
#[should_panic(expected = "A: expected")]
fn test_multiply_checks_lengths() {
    let mut c = vec![0u32; 4];
    let _ = multiply_u8(&[0; 3], &[0; 4], &mut c, 2, 2, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_u8_matches_reference(
        m in 1usize..24,
        n in 1usize..24,
        k in 1usize..48,
        threads in 1usize..5,
        pretranspose in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = random_u8(&mut rng, m * k);
        let b = random_u8(&mut rng, k * n);
        let cfg = config(threads).with_block_sizes(4, 16);
        let c = run_u8(&a, &b, &vec![0; m * n], m, n, k, cfg, GemmInfo::default().pretranspose_b(pretranspose));
        prop_assert_eq!(c, expected_u8(&a, &b, &vec![0; m * n], m, n, k, 1, 0));
    }

    #[test]
    fn test_workloads_cover_each_block_once(
        n in 1usize..40,
        k in 1usize..80,
        multis in 1usize..3,
        x_block in 1usize..20,
        k_block in 1usize..50,
        pretranspose in any::<bool>(),
    ) {
        let m = 5;
        let a = Tensor::new(TensorShape::new(&[k, m, 1, multis]), DataType::U8);
        let b = Tensor::new(TensorShape::new(&[n, k, multis]), DataType::U8);
        let mut c = Tensor::new(TensorShape::new(&[n, m, 1, multis]), DataType::U32);
        let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config(2).with_block_sizes(x_block, k_block));
        gemm.configure(&a, &b, &mut c, GemmInfo::default().pretranspose_b(pretranspose)).unwrap();

        let mut covered = vec![0u32; n * k * multis];
        let mut next_offset = 0;
        for wl in gemm.matrix_multiply_workloads() {
            prop_assert!(wl.x0 < wl.xmax && wl.xmax <= n);
            prop_assert!(wl.k0 < wl.kmax && wl.kmax <= k);
            prop_assert!(wl.multi < multis);
            prop_assert_eq!(wl.kern_k, (wl.kmax - wl.k0).next_multiple_of(U8Gemm4x4::K_UNROLL));
            prop_assert_eq!(wl.bblocks, (wl.xmax - wl.x0).div_ceil(U8Gemm4x4::OUT_WIDTH));
            if pretranspose {
                prop_assert_eq!(wl.offset_transformed_b, next_offset);
                next_offset += wl.bblocks * U8Gemm4x4::OUT_WIDTH * wl.kern_k;
            }
            for x in wl.x0..wl.xmax {
                for kk in wl.k0..wl.kmax {
                    covered[(wl.multi * k + kk) * n + x] += 1;
                }
            }
        }
        prop_assert!(covered.iter().all(|&count| count == 1), "blocks overlap or leave gaps");
    }
}
