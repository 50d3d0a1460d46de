use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use interleaved_gemm::matrix::reference_gemm;
use interleaved_gemm::{
    DataType, F32Gemm4x4, GemmConfig, GemmInfo, GemmInterleaved, Tensor, TensorShape, U8Gemm4x4,
};
use rand::Rng;

const SIZES: [usize; 4] = [64, 128, 256, 512];

fn random_u8(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.r#gen()).collect()
}

fn random_f32(len: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn bench_u8(c: &mut Criterion) {
    let mut group = c.benchmark_group("u8_4x4");
    for &n in &SIZES {
        let a = Tensor::from_slice(TensorShape::new(&[n, n]), &random_u8(n * n));
        let b = Tensor::from_slice(TensorShape::new(&[n, n]), &random_u8(n * n));
        let mut out = Tensor::new(TensorShape::new(&[n, n]), DataType::U32);

        let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(GemmConfig::single_threaded());
        gemm.configure(&a, &b, &mut out, GemmInfo::default()).unwrap();

        group.throughput(Throughput::Elements((2 * n * n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| gemm.run(black_box(&a), black_box(&b), &mut out).unwrap());
        });
    }
    group.finish();
}

fn bench_f32(c: &mut Criterion) {
    let mut group = c.benchmark_group("f32_4x4");
    for &n in &SIZES {
        let a = Tensor::from_slice(TensorShape::new(&[n, n]), &random_f32(n * n));
        let b = Tensor::from_slice(TensorShape::new(&[n, n]), &random_f32(n * n));
        let mut out = Tensor::new(TensorShape::new(&[n, n]), DataType::F32);

        for (name, config) in [
            ("single", GemmConfig::single_threaded()),
            ("threads", GemmConfig::default()),
        ] {
            let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(config);
            gemm.configure(&a, &b, &mut out, GemmInfo::default()).unwrap();
            group.throughput(Throughput::Elements((2 * n * n * n) as u64));
            group.bench_with_input(BenchmarkId::new(name, n), &n, |bench, _| {
                bench.iter(|| gemm.run(black_box(&a), black_box(&b), &mut out).unwrap());
            });
        }
    }
    group.finish();
}

fn bench_ring_vs_pretransposed(c: &mut Criterion) {
    let mut group = c.benchmark_group("b_reshape");
    let n = 256;
    let a = Tensor::from_slice(TensorShape::new(&[n, n]), &random_u8(n * n));
    let b = Tensor::from_slice(TensorShape::new(&[n, n]), &random_u8(n * n));
    let mut out = Tensor::new(TensorShape::new(&[n, n]), DataType::U32);

    for pretranspose in [true, false] {
        let config = GemmConfig::default().with_block_sizes(64, 64);
        let mut gemm = GemmInterleaved::<U8Gemm4x4>::new(config);
        gemm.configure(&a, &b, &mut out, GemmInfo::default().pretranspose_b(pretranspose))
            .unwrap();
        let name = if pretranspose { "pretransposed" } else { "ring" };
        group.bench_function(name, |bench| {
            bench.iter(|| gemm.run(black_box(&a), black_box(&b), &mut out).unwrap());
        });
    }
    group.finish();
}

fn bench_reference(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_f32");
    for &n in &SIZES[..2] {
        let a = random_f32(n * n);
        let b = random_f32(n * n);
        let mut out = vec![0.0f32; n * n];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, &n| {
            bench.iter(|| reference_gemm(black_box(&a), black_box(&b), &mut out, n, n, n, 1.0, 0.0));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_u8, bench_f32, bench_ring_vs_pretransposed, bench_reference);
criterion_main!(benches);
