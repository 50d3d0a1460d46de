//! Kernel dispatch and merging for one block of the output.

use super::params::{BlockSizes, GemmParams};
use crate::error::{GemmError, Result};
use crate::kernels::{Accumulator, Isa, Strategy};
use crate::tensor::{Tensor, TensorAccessor, TensorInfo, TensorRef, TensorShape};
use crate::threaded::ThreadInfo;
use crate::window::{Coordinates, Window, WindowIterator};

/// One (N block, K block, multi) unit of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixMultiplyWorkload {
    pub x0: usize,
    pub xmax: usize,
    pub k0: usize,
    pub kmax: usize,
    pub multi: usize,
    /// Element offset of this block's panels in the transformed B buffer.
    pub offset_transformed_b: usize,
    /// K length the kernel runs, `kmax - k0` rounded up to the K unroll.
    pub kern_k: usize,
    /// Kernel-width column blocks covering `[x0, xmax)`.
    pub bblocks: usize,
}

/// Where each block's reshaped B lives.
///
/// Pretransposed B is one buffer holding every block back to back in
/// workload order. Otherwise B is reshaped on the fly into a ring of
/// `num_buffers` slots of `block_size` elements (`transformed_b` is
/// `[block_size, num_buffers]`), and workload `i` uses slot `i % num_buffers`.
pub(crate) fn assign_b_offsets(
    workloads: impl Iterator<Item = (usize, usize)>,
    b_is_pretransposed: bool,
    transformed_b: &TensorInfo,
) -> Vec<usize> {
    let block_size = transformed_b.dimension(0);
    let num_buffers = transformed_b.dimension(1).max(1);
    let mut offset = 0;
    workloads
        .enumerate()
        .map(|(index, (bblock_elements, kern_k))| {
            if b_is_pretransposed {
                let current = offset;
                offset += bblock_elements * kern_k;
                current
            } else {
                (index % num_buffers) * block_size
            }
        })
        .collect()
}

/// Runs the kernel over blocks of the output and merges the results.
///
/// Each thread owns one row of `tmp_c` (`[x_block * out_height, threads]`)
/// for kernel output, and writes C only for the rows of its batch-window
/// range, so threads with disjoint ranges never touch the same elements.
pub struct MatrixMultiplyWrapper<'a, S: Strategy> {
    prepared_a: TensorAccessor<'a, S::Operand>,
    transformed_b: TensorAccessor<'a, S::Operand>,
    transformed_b_info: &'a TensorInfo,
    tmp_c: TensorAccessor<'a, S::Result>,
    c: TensorAccessor<'a, S::Result>,
    block_walker: Window,
    block_sizes: BlockSizes,
    params: GemmParams,
    b_is_pretransposed: bool,
    alpha: S::Result,
    beta: S::Result,
    isa: Isa,
}

impl<'a, S: Strategy> MatrixMultiplyWrapper<'a, S> {
    /// Bind the operands. `tmp_c` is given its shape here if it has none.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        prepared_a: TensorRef<'a>,
        transformed_b: TensorRef<'a>,
        tmp_c: &'a mut Tensor,
        c: TensorRef<'a>,
        block_walker: &Window,
        block_sizes: &BlockSizes,
        params: &GemmParams,
        b_is_pretransposed: bool,
        alpha: f32,
        beta: f32,
        max_num_threads: usize,
        isa: Isa,
    ) -> Result<Self> {
        let alpha = scale::<S>(alpha)?;
        let beta = scale::<S>(beta)?;

        tmp_c.init_if_empty(TensorShape::new(&[
            block_sizes.x_block * S::OUT_HEIGHT,
            max_num_threads,
        ]));
        if tmp_c.info().dimension(1) < max_num_threads
            || tmp_c.info().dimension(0) < block_sizes.x_block * S::OUT_HEIGHT
        {
            return Err(GemmError::ShapeMismatch(format!(
                "tmp_c {:?} is too small for {} threads",
                tmp_c.info().tensor_shape(),
                max_num_threads
            )));
        }

        Ok(Self {
            prepared_a: TensorAccessor::new(prepared_a),
            transformed_b: TensorAccessor::new(transformed_b),
            transformed_b_info: transformed_b.info(),
            tmp_c: TensorAccessor::new(tmp_c.view_mut()),
            c: TensorAccessor::with_row_batches(c, params.m),
            block_walker: *block_walker,
            block_sizes: *block_sizes,
            params: *params,
            b_is_pretransposed,
            alpha,
            beta,
            isa,
        })
    }

    pub fn create_workloads(&self, workloads: &mut Vec<MatrixMultiplyWorkload>) {
        let mut blocks = Vec::new();
        self.block_walker.for_each(|id| {
            let x0 = id.x() as usize;
            let k0 = id.y() as usize;
            let xmax = (x0 + self.block_sizes.x_block).min(self.params.n);
            let kmax = (k0 + self.block_sizes.k_block).min(self.params.k);
            blocks.push(MatrixMultiplyWorkload {
                x0,
                xmax,
                k0,
                kmax,
                multi: id.z() as usize,
                offset_transformed_b: 0,
                kern_k: (kmax - k0).next_multiple_of(S::K_UNROLL),
                bblocks: (xmax - x0).div_ceil(S::OUT_WIDTH),
            });
        });

        let offsets = assign_b_offsets(
            blocks.iter().map(|w| (w.bblocks * S::OUT_WIDTH, w.kern_k)),
            self.b_is_pretransposed,
            self.transformed_b_info,
        );
        for (mut workload, offset) in blocks.into_iter().zip(offsets) {
            workload.offset_transformed_b = offset;
            workloads.push(workload);
        }
    }

    /// Multiply the rows of `batch_window[start..end)` by one block of B and
    /// merge into C.
    ///
    /// `beta` is applied only for the first K block; later blocks add to
    /// what is already in C.
    pub fn transform(
        &self,
        workload: &MatrixMultiplyWorkload,
        thread_info: &ThreadInfo,
        batch_window: &Window,
        start: &Coordinates,
        end: &Coordinates,
    ) {
        let strategy = S::with_isa(self.isa);
        let b_panels = self
            .transformed_b
            .ptr(0, 0, 0, 0)
            .wrapping_add(workload.offset_transformed_b);
        let tmp_c = self.tmp_c.ptr_mut(0, thread_info.thread_id, 0, 0);
        let ldc = self.c.stride(1);
        let beta = if workload.k0 == 0 { self.beta } else { <S::Result as Accumulator>::ONE };

        let mut a_panel = self.prepared_a.ptr(0, 0, 0, 0);
        let mut current_batch = None;

        let mut iterator = WindowIterator::new(batch_window, start, end, |id| {
            let y = id.x() as usize;
            let batch = id.y() as usize;
            let ymax = (y + S::OUT_HEIGHT).min(self.params.m);

            if current_batch != Some(batch) {
                current_batch = Some(batch);
                a_panel = self.prepared_a.ptr(0, y, batch, 0);
            }

            // SAFETY: the A panels for [y, y + out_height) were packed by the
            // transform-A pass of this range, B panels are ready at this
            // offset, tmp_c row `thread_id` belongs to this thread, and rows
            // [y, ymax) of C belong to this range.
            unsafe {
                strategy.kernel(a_panel, b_panels, tmp_c, 1, workload.bblocks, workload.kern_k);
                a_panel = a_panel.add(S::OUT_HEIGHT * workload.kern_k);
                strategy.merge(
                    self.c.ptr_mut(0, 0, batch, workload.multi),
                    tmp_c,
                    ldc,
                    y..ymax,
                    workload.x0..workload.xmax,
                    self.alpha,
                    beta,
                );
            }
        });
        iterator.iterate_2d(|_, _| {});
    }
}

fn scale<S: Strategy>(value: f32) -> Result<S::Result> {
    <S::Result as Accumulator>::from_scale(value).ok_or(GemmError::InvalidScale {
        value,
        strategy: S::NAME,
    })
}
