//! Reshaping of the right operand into kernel panels.

use super::matrix_multiply::assign_b_offsets;
use super::params::{BlockSizes, GemmParams};
use crate::kernels::{Isa, Strategy};
use crate::tensor::{TensorAccessor, TensorInfo, TensorRef};
use crate::window::Window;

/// Number of slots in the B ring when B is reshaped during the run.
pub const NUM_BUFFERS: usize = 3;

/// One block of B to reshape, in matrix-multiply workload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformBWorkload {
    pub x0: usize,
    pub xmax: usize,
    pub k0: usize,
    pub kmax: usize,
    pub multi: usize,
    /// Element offset of the destination in the transformed B buffer.
    pub offset: usize,
}

/// Elements needed to hold every reshaped block of B at once.
pub fn required_size<S: Strategy>(params: &GemmParams) -> usize {
    params.n.next_multiple_of(S::OUT_WIDTH) * params.k.next_multiple_of(S::K_UNROLL) * params.multis
}

/// Elements of one ring slot: a full x block by a full K block.
pub fn ring_slot_size(sizes: &BlockSizes) -> usize {
    sizes.x_block * sizes.k_block
}

/// Packs B (`[N, K, multis]`) into `transformed_b`.
pub struct TransformBWrapper<'a, S: Strategy> {
    b: TensorAccessor<'a, S::Operand>,
    transformed_b: TensorAccessor<'a, S::Operand>,
    transformed_b_info: &'a TensorInfo,
    block_walker: Window,
    block_sizes: BlockSizes,
    params: GemmParams,
    isa: Isa,
}

impl<'a, S: Strategy> TransformBWrapper<'a, S> {
    pub fn configure(
        b: TensorRef<'a>,
        transformed_b: TensorRef<'a>,
        block_walker: &Window,
        block_sizes: &BlockSizes,
        params: &GemmParams,
        isa: Isa,
    ) -> Self {
        Self {
            b: TensorAccessor::new(b),
            transformed_b: TensorAccessor::new(transformed_b),
            transformed_b_info: transformed_b.info(),
            block_walker: *block_walker,
            block_sizes: *block_sizes,
            params: *params,
            isa,
        }
    }

    /// One workload per block, with the same destination offsets the
    /// matrix-multiply workloads read from.
    pub fn create_workloads(&self, pretransposed: bool, workloads: &mut Vec<TransformBWorkload>) {
        let mut blocks = Vec::new();
        self.block_walker.for_each(|id| {
            let x0 = id.x() as usize;
            let k0 = id.y() as usize;
            blocks.push(TransformBWorkload {
                x0,
                xmax: (x0 + self.block_sizes.x_block).min(self.params.n),
                k0,
                kmax: (k0 + self.block_sizes.k_block).min(self.params.k),
                multi: id.z() as usize,
                offset: 0,
            });
        });

        let offsets = assign_b_offsets(
            blocks.iter().map(|w| {
                (
                    (w.xmax - w.x0).next_multiple_of(S::OUT_WIDTH),
                    (w.kmax - w.k0).next_multiple_of(S::K_UNROLL),
                )
            }),
            pretransposed,
            self.transformed_b_info,
        );
        for (mut workload, offset) in blocks.into_iter().zip(offsets) {
            workload.offset = offset;
            workloads.push(workload);
        }
    }

    /// Reshape one block.
    ///
    /// The destination region must not be read or written by anyone else
    /// while this runs; the B ring in [`crate::threaded`] guarantees that
    /// during a run.
    pub fn transform(&self, workload: &TransformBWorkload) {
        let strategy = S::with_isa(self.isa);
        let ld = self.b.stride(1);
        // SAFETY: the block lies inside B, and `offset` was assigned so that
        // the panels fit in `transformed_b`.
        unsafe {
            strategy.prepare_b(
                self.transformed_b.ptr_mut(0, 0, 0, 0).add(workload.offset),
                self.b.ptr(0, 0, workload.multi, 0),
                ld,
                workload.x0..workload.xmax,
                workload.k0..workload.kmax,
            );
        }
    }
}
