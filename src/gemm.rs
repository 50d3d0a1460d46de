//! The interleaved GEMM operator: validation, configuration and the
//! multi-threaded run loop tying the wrappers together.

use std::marker::PhantomData;

use tracing::{debug, instrument};

use crate::blocked::matrix_multiply::{MatrixMultiplyWorkload, MatrixMultiplyWrapper};
use crate::blocked::params::{BlockSizes, GemmParams, batch_window, block_walker};
use crate::blocked::transform_a::{TransformAWorkload, TransformAWrapper};
use crate::blocked::transform_b::{
    NUM_BUFFERS, TransformBWorkload, TransformBWrapper, required_size, ring_slot_size,
};
use crate::config::{GemmConfig, GemmInfo};
use crate::error::{GemmError, Result};
use crate::kernels::{
    Accumulator, CpuInfo, F32Gemm4x4, Isa, Strategy, U8Gemm4x4, select_kernel,
};
use crate::tensor::{DataLayout, DataType, Element, Tensor, TensorInfo, TensorShape};
use crate::threaded::{BufferRing, partition, run_workers};
use crate::window::{Coordinates, Window};

/// `C = alpha * A * B + beta * C` for one strategy.
///
/// Usage is `configure` once, then `run` as often as needed. With
/// `pretranspose_b` the reshaped B is built by the first `prepare`/`run` and
/// reused after that, so B must not change between runs.
pub struct GemmInterleaved<S: Strategy> {
    config: GemmConfig,
    cpu_info: CpuInfo,
    state: Option<Configured>,
    _strategy: PhantomData<S>,
}

struct Configured {
    info: GemmInfo,
    isa: Isa,
    params: GemmParams,
    block_sizes: BlockSizes,
    block_walker: Window,
    batch_window: Window,
    num_threads: usize,
    a_info: TensorInfo,
    b_info: TensorInfo,
    c_info: TensorInfo,
    transform_a_workloads: Vec<TransformAWorkload>,
    matrix_multiply_workloads: Vec<MatrixMultiplyWorkload>,
    transform_b_workloads: Vec<TransformBWorkload>,
    transformed_a: Tensor,
    transformed_b: Tensor,
    tmp_c: Tensor,
    b_prepared: bool,
}

impl<S: Strategy> GemmInterleaved<S> {
    pub fn new(config: GemmConfig) -> Self {
        let cpu_info =
            CpuInfo::detect().with_cache_sizes(config.l1_cache_size, config.l2_cache_size);
        Self::with_cpu_info(config, cpu_info)
    }

    /// Use a given CPU description instead of querying the host.
    pub fn with_cpu_info(config: GemmConfig, cpu_info: CpuInfo) -> Self {
        Self {
            config,
            cpu_info,
            state: None,
            _strategy: PhantomData,
        }
    }

    /// Check that A, B and C can be multiplied with this strategy.
    pub fn validate(a: &TensorInfo, b: &TensorInfo, c: &TensorInfo, info: &GemmInfo) -> Result<()> {
        check_type("A", a, <S::Operand as Element>::DATA_TYPE)?;
        check_type("B", b, <S::Operand as Element>::DATA_TYPE)?;
        check_type("C", c, <S::Result as Element>::DATA_TYPE)?;

        for (name, tensor) in [("A", a), ("B", b), ("C", c)] {
            if tensor.is_empty() || tensor.tensor_shape().total_size() == 0 {
                return Err(GemmError::ShapeMismatch(format!("{} is empty", name)));
            }
        }

        if a.data_layout() != c.data_layout() {
            return Err(GemmError::LayoutMismatch {
                a: a.data_layout(),
                c: c.data_layout(),
            });
        }
        if b.data_layout() != DataLayout::Nchw {
            return Err(GemmError::ShapeMismatch("B must be a plain [N, K, multis] tensor".into()));
        }
        if info.transpose_a && a.data_layout() == DataLayout::Nhwc {
            return Err(GemmError::ShapeMismatch("transposed A cannot be NHWC".into()));
        }

        let params = GemmParams::from_tensors(a, c, info.transpose_a);
        if b.dimension(1) != params.k {
            return Err(GemmError::InnerDimensionMismatch {
                a_k: params.k,
                b_k: b.dimension(1),
            });
        }
        if b.dimension(0) != params.n {
            return Err(GemmError::ShapeMismatch(format!(
                "B has N={} but C has N={}",
                b.dimension(0),
                params.n
            )));
        }

        let (a_m, a_batches, a_multis) = match a.data_layout() {
            DataLayout::Nhwc => (a.dimension(1) * a.dimension(2), a.dimension(3), 1),
            DataLayout::Nchw if info.transpose_a => (a.dimension(0), a.dimension(2), a.dimension(3)),
            DataLayout::Nchw => (a.dimension(1), a.dimension(2), a.dimension(3)),
        };
        if (a_m, a_batches, a_multis) != (params.m, params.batches, params.multis) {
            return Err(GemmError::ShapeMismatch(format!(
                "A has M={} batches={} multis={}, C has M={} batches={} multis={}",
                a_m, a_batches, a_multis, params.m, params.batches, params.multis
            )));
        }
        if b.dimension(2) != params.multis {
            return Err(GemmError::ShapeMismatch(format!(
                "B has {} multis, C has {}",
                b.dimension(2),
                params.multis
            )));
        }

        for value in [info.alpha, info.beta] {
            if <S::Result as Accumulator>::from_scale(value).is_none() {
                return Err(GemmError::InvalidScale {
                    value,
                    strategy: S::NAME,
                });
            }
        }
        Ok(())
    }

    /// Bind shapes and parameters, allocate the workspace and build the
    /// workload lists. Not thread-safe; call before any `run`.
    #[instrument(skip_all, fields(strategy = S::NAME))]
    pub fn configure(&mut self, a: &Tensor, b: &Tensor, c: &mut Tensor, info: GemmInfo) -> Result<()> {
        Self::validate(a.info(), b.info(), c.info(), &info)?;
        let isa = S::new(&self.cpu_info, self.config.kernel)?.isa();

        let params = GemmParams::from_tensors(a.info(), c.info(), info.transpose_a);
        let block_sizes = BlockSizes::for_strategy::<S>(&params, &self.cpu_info, &self.config);
        let block_walker = block_walker(&params, &block_sizes);
        let batch_window = batch_window::<S>(&params, &block_sizes);
        let num_threads = self
            .config
            .num_threads
            .min(batch_window.num_iterations_total())
            .max(1);

        let mut transformed_a = Tensor::new(
            TensorShape::new(&[block_sizes.k_block, block_sizes.m_round, params.batches]),
            <S::Operand as Element>::DATA_TYPE,
        );
        let b_shape = if info.pretranspose_b {
            TensorShape::new(&[required_size::<S>(&params)])
        } else {
            TensorShape::new(&[ring_slot_size(&block_sizes), NUM_BUFFERS])
        };
        let mut transformed_b = Tensor::new(b_shape, <S::Operand as Element>::DATA_TYPE);
        let mut tmp_c = Tensor::empty(<S::Result as Element>::DATA_TYPE);

        let mut transform_a_workloads = Vec::new();
        let mut matrix_multiply_workloads = Vec::new();
        let mut transform_b_workloads = Vec::new();
        {
            let prepared_a = transformed_a.view_mut();
            let reshaped_b = transformed_b.view_mut();
            let transform_a = TransformAWrapper::<S>::configure(
                a.view(),
                prepared_a,
                info.transpose_a,
                &block_walker,
                &params,
                isa,
            );
            let transform_b =
                TransformBWrapper::<S>::configure(b.view(), reshaped_b, &block_walker, &block_sizes, &params, isa);
            let matrix_multiply = MatrixMultiplyWrapper::<S>::configure(
                prepared_a,
                reshaped_b,
                &mut tmp_c,
                c.view_mut(),
                &block_walker,
                &block_sizes,
                &params,
                info.pretranspose_b,
                info.alpha,
                info.beta,
                num_threads,
                isa,
            )?;

            transform_a.create_workloads(&mut transform_a_workloads);
            matrix_multiply.create_workloads(&mut matrix_multiply_workloads);
            transform_b.create_workloads(info.pretranspose_b, &mut transform_b_workloads);
        }

        debug!(
            isa = %isa,
            m = params.m,
            n = params.n,
            k = params.k,
            batches = params.batches,
            multis = params.multis,
            workloads = matrix_multiply_workloads.len(),
            num_threads,
            pretranspose_b = info.pretranspose_b,
            "configured interleaved gemm"
        );

        self.state = Some(Configured {
            info,
            isa,
            params,
            block_sizes,
            block_walker,
            batch_window,
            num_threads,
            a_info: a.info().clone(),
            b_info: b.info().clone(),
            c_info: c.info().clone(),
            transform_a_workloads,
            matrix_multiply_workloads,
            transform_b_workloads,
            transformed_a,
            transformed_b,
            tmp_c,
            b_prepared: false,
        });
        Ok(())
    }

    /// Reshape B once when it is pretransposed. Later calls do nothing.
    #[instrument(skip_all, fields(strategy = S::NAME))]
    pub fn prepare(&mut self, b: &Tensor) -> Result<()> {
        let state = self.state.as_mut().ok_or(GemmError::NotConfigured)?;
        if !state.info.pretranspose_b || state.b_prepared {
            return Ok(());
        }
        if *b.info() != state.b_info {
            return Err(GemmError::TensorMismatch("B"));
        }

        let transform_b = TransformBWrapper::<S>::configure(
            b.view(),
            state.transformed_b.view_mut(),
            &state.block_walker,
            &state.block_sizes,
            &state.params,
            state.isa,
        );
        for workload in &state.transform_b_workloads {
            transform_b.transform(workload);
        }
        state.b_prepared = true;
        debug!(elements = state.transformed_b.info().tensor_shape().total_size(), "pretransposed B");
        Ok(())
    }

    /// Compute the product into `c`.
    #[instrument(skip_all, fields(strategy = S::NAME))]
    pub fn run(&mut self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> Result<()> {
        self.prepare(b)?;
        let cpu_info = self.cpu_info;
        let state = self.state.as_mut().ok_or(GemmError::NotConfigured)?;
        for (name, tensor, expected) in [
            ("A", a.info(), &state.a_info),
            ("B", b.info(), &state.b_info),
            ("C", c.info(), &state.c_info),
        ] {
            if tensor != expected {
                return Err(GemmError::TensorMismatch(name));
            }
        }

        let Configured {
            info,
            isa,
            params,
            block_sizes,
            block_walker,
            batch_window,
            num_threads,
            transform_a_workloads,
            matrix_multiply_workloads,
            transform_b_workloads,
            transformed_a,
            transformed_b,
            tmp_c,
            ..
        } = state;

        let prepared_a = transformed_a.view_mut();
        let reshaped_b = transformed_b.view_mut();
        let transform_a =
            TransformAWrapper::<S>::configure(a.view(), prepared_a, info.transpose_a, block_walker, params, *isa);
        let transform_b =
            TransformBWrapper::<S>::configure(b.view(), reshaped_b, block_walker, block_sizes, params, *isa);
        let matrix_multiply = MatrixMultiplyWrapper::<S>::configure(
            prepared_a,
            reshaped_b,
            tmp_c,
            c.view_mut(),
            block_walker,
            block_sizes,
            params,
            info.pretranspose_b,
            info.alpha,
            info.beta,
            *num_threads,
            *isa,
        )?;

        let ring = (!info.pretranspose_b).then(|| BufferRing::new(NUM_BUFFERS, *num_threads));
        let num_windows = batch_window.num_iterations_total();
        let shape = batch_window.shape();
        let batch_window = &*batch_window;
        let transform_a_workloads = &*transform_a_workloads;
        let transform_b_workloads = &*transform_b_workloads;
        let matrix_multiply_workloads = &*matrix_multiply_workloads;

        run_workers(*num_threads, cpu_info, |thread| {
            let _poison = ring.as_ref().map(BufferRing::poison_on_panic);
            let range = partition(num_windows, thread.num_threads, thread.thread_id);
            let start = Coordinates::from_index(&shape, range.start);
            let end = Coordinates::from_index(&shape, range.end);

            let mut next_transform_a = 0;
            let mut current_block = None;
            for (index, workload) in matrix_multiply_workloads.iter().enumerate() {
                // A is repacked whenever the K block or multi changes; the
                // workloads are ordered so this happens once per pair.
                if current_block != Some((workload.k0, workload.multi)) {
                    current_block = Some((workload.k0, workload.multi));
                    let ta = &transform_a_workloads[next_transform_a];
                    debug_assert_eq!((ta.k0, ta.multi), (workload.k0, workload.multi));
                    next_transform_a += 1;
                    transform_a.transform(ta, &thread, batch_window, &start, &end);
                }

                if let Some(ring) = &ring {
                    ring.acquire(index, || transform_b.transform(&transform_b_workloads[index]));
                }
                matrix_multiply.transform(workload, &thread, batch_window, &start, &end);
                if let Some(ring) = &ring {
                    ring.release(index);
                }
            }
        });
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn block_sizes(&self) -> Option<BlockSizes> {
        self.state.as_ref().map(|s| s.block_sizes)
    }

    pub fn params(&self) -> Option<GemmParams> {
        self.state.as_ref().map(|s| s.params)
    }

    /// Threads `run` will use.
    pub fn num_threads(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.num_threads)
    }

    /// Instruction set of the selected kernel.
    pub fn isa(&self) -> Option<Isa> {
        self.state.as_ref().map(|s| s.isa)
    }

    pub fn transform_a_workloads(&self) -> &[TransformAWorkload] {
        self.state.as_ref().map_or(&[], |s| &s.transform_a_workloads)
    }

    pub fn matrix_multiply_workloads(&self) -> &[MatrixMultiplyWorkload] {
        self.state.as_ref().map_or(&[], |s| &s.matrix_multiply_workloads)
    }

    pub fn transform_b_workloads(&self) -> &[TransformBWorkload] {
        self.state.as_ref().map_or(&[], |s| &s.transform_b_workloads)
    }
}

fn check_type(tensor: &'static str, info: &TensorInfo, expected: DataType) -> Result<()> {
    if info.data_type() != expected {
        return Err(GemmError::DataTypeMismatch {
            tensor,
            expected,
            found: info.data_type(),
        });
    }
    Ok(())
}

/// A GEMM operator whose strategy is chosen at runtime from the operand type.
pub enum Gemm {
    U8(GemmInterleaved<U8Gemm4x4>),
    F32(GemmInterleaved<F32Gemm4x4>),
}

impl Gemm {
    /// Operator for `data_type` operands, failing if no kernel for it
    /// (and the configured preference) is available.
    pub fn new(data_type: DataType, config: GemmConfig) -> Result<Self> {
        let cpu_info =
            CpuInfo::detect().with_cache_sizes(config.l1_cache_size, config.l2_cache_size);
        let kernel = select_kernel(data_type, &cpu_info, config.kernel)?;
        match kernel.data_type {
            DataType::U8 => Ok(Gemm::U8(GemmInterleaved::with_cpu_info(config, cpu_info))),
            DataType::F32 => Ok(Gemm::F32(GemmInterleaved::with_cpu_info(config, cpu_info))),
            other => Err(GemmError::UnsupportedDataType(other)),
        }
    }

    pub fn validate(&self, a: &TensorInfo, b: &TensorInfo, c: &TensorInfo, info: &GemmInfo) -> Result<()> {
        match self {
            Gemm::U8(_) => GemmInterleaved::<U8Gemm4x4>::validate(a, b, c, info),
            Gemm::F32(_) => GemmInterleaved::<F32Gemm4x4>::validate(a, b, c, info),
        }
    }

    pub fn configure(&mut self, a: &Tensor, b: &Tensor, c: &mut Tensor, info: GemmInfo) -> Result<()> {
        match self {
            Gemm::U8(gemm) => gemm.configure(a, b, c, info),
            Gemm::F32(gemm) => gemm.configure(a, b, c, info),
        }
    }

    pub fn prepare(&mut self, b: &Tensor) -> Result<()> {
        match self {
            Gemm::U8(gemm) => gemm.prepare(b),
            Gemm::F32(gemm) => gemm.prepare(b),
        }
    }

    pub fn run(&mut self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> Result<()> {
        match self {
            Gemm::U8(gemm) => gemm.run(a, b, c),
            Gemm::F32(gemm) => gemm.run(a, b, c),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self {
            Gemm::U8(_) => U8Gemm4x4::NAME,
            Gemm::F32(_) => F32Gemm4x4::NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelPreference;

    fn portable() -> GemmConfig {
        GemmConfig::single_threaded().with_kernel(KernelPreference::Portable)
    }

    fn infos(m: usize, n: usize, k: usize) -> (TensorInfo, TensorInfo, TensorInfo) {
        (
            TensorInfo::new(TensorShape::new(&[k, m]), DataType::U8),
            TensorInfo::new(TensorShape::new(&[n, k]), DataType::U8),
            TensorInfo::new(TensorShape::new(&[n, m]), DataType::U32),
        )
    }

    #[test]
    fn test_validate_inner_dimension() {
        let (a, _, c) = infos(4, 4, 8);
        let b = TensorInfo::new(TensorShape::new(&[4, 9]), DataType::U8);
        let err = GemmInterleaved::<U8Gemm4x4>::validate(&a, &b, &c, &GemmInfo::default());
        assert_eq!(err, Err(GemmError::InnerDimensionMismatch { a_k: 8, b_k: 9 }));
    }

    #[test]
    fn test_validate_types_and_layouts() {
        let (a, b, _) = infos(4, 4, 8);
        let c = TensorInfo::new(TensorShape::new(&[4, 4]), DataType::F32);
        let err = GemmInterleaved::<U8Gemm4x4>::validate(&a, &b, &c, &GemmInfo::default());
        assert!(matches!(err, Err(GemmError::DataTypeMismatch { tensor: "C", .. })));

        let (a, b, c) = infos(4, 4, 8);
        let c = c.with_layout(DataLayout::Nhwc);
        let err = GemmInterleaved::<U8Gemm4x4>::validate(&a, &b, &c, &GemmInfo::default());
        assert!(matches!(err, Err(GemmError::LayoutMismatch { .. })));
    }

    #[test]
    fn test_validate_rows_and_scale() {
        let (a, b, _) = infos(4, 4, 8);
        let c = TensorInfo::new(TensorShape::new(&[4, 5]), DataType::U32);
        let err = GemmInterleaved::<U8Gemm4x4>::validate(&a, &b, &c, &GemmInfo::default());
        assert!(matches!(err, Err(GemmError::ShapeMismatch(_))));

        let (a, b, c) = infos(4, 4, 8);
        let err = GemmInterleaved::<U8Gemm4x4>::validate(&a, &b, &c, &GemmInfo::with_scale(1.5, 0.0));
        assert!(matches!(err, Err(GemmError::InvalidScale { .. })));
        assert!(GemmInterleaved::<U8Gemm4x4>::validate(&a, &b, &c, &GemmInfo::with_scale(3.0, 1.0)).is_ok());
    }

    #[test]
    fn test_run_before_configure() {
        let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(portable());
        let a = Tensor::new(TensorShape::new(&[4, 4]), DataType::F32);
        let b = a.clone();
        let mut c = a.clone();
        assert_eq!(gemm.run(&a, &b, &mut c), Err(GemmError::NotConfigured));
        assert!(gemm.matrix_multiply_workloads().is_empty());
    }

    #[test]
    fn test_run_rejects_other_shapes() {
        let mut gemm = GemmInterleaved::<F32Gemm4x4>::new(portable());
        let a = Tensor::new(TensorShape::new(&[4, 4]), DataType::F32);
        let b = a.clone();
        let mut c = a.clone();
        gemm.configure(&a, &b, &mut c, GemmInfo::default()).unwrap();
        let bigger = Tensor::new(TensorShape::new(&[4, 8]), DataType::F32);
        let mut c8 = Tensor::new(TensorShape::new(&[4, 8]), DataType::F32);
        assert_eq!(gemm.run(&bigger, &b, &mut c8), Err(GemmError::TensorMismatch("A")));
    }

    #[test]
    fn test_front_end_picks_strategy() {
        let gemm = Gemm::new(DataType::U8, portable()).unwrap();
        assert_eq!(gemm.strategy_name(), "u8_4x4");
        let gemm = Gemm::new(DataType::F32, portable()).unwrap();
        assert_eq!(gemm.strategy_name(), "f32_4x4");
        assert!(matches!(
            Gemm::new(DataType::S32, portable()),
            Err(GemmError::UnsupportedDataType(DataType::S32))
        ));
    }
}
