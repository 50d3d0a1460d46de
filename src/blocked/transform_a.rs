//! Repacking of the left operand into kernel panels.

use std::cell::Cell;

use super::params::GemmParams;
use crate::kernels::{Isa, Strategy};
use crate::tensor::{TensorAccessor, TensorRef};
use crate::threaded::ThreadInfo;
use crate::window::{Coordinates, Window, WindowIterator};

/// One K block of one multi to repack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformAWorkload {
    pub k0: usize,
    pub kmax: usize,
    pub multi: usize,
}

/// Repacks A into the layout `S` reads, one K block at a time.
///
/// `transformed_a` is `[k_block, m_round, batches]`: the panels for rows
/// starting at `m` of batch `b` begin at element `(0, m, b)`. There is a
/// single K slot, so the matrix-multiply pass for a K block has to run
/// before the same rows are repacked for the next one.
pub struct TransformAWrapper<'a, S: Strategy> {
    a: TensorAccessor<'a, S::Operand>,
    transformed_a: TensorAccessor<'a, S::Operand>,
    transpose_a: bool,
    k: usize,
    m: usize,
    k_multi_window: Window,
    isa: Isa,
}

impl<'a, S: Strategy> TransformAWrapper<'a, S> {
    /// `block_walker` is the (N, K, multi) block space; the N dimension is
    /// dropped to get the K × multi workloads.
    pub fn configure(
        a: TensorRef<'a>,
        transformed_a: TensorRef<'a>,
        transpose_a: bool,
        block_walker: &Window,
        params: &GemmParams,
        isa: Isa,
    ) -> Self {
        Self {
            a: TensorAccessor::with_row_batches(a, params.m),
            transformed_a: TensorAccessor::new(transformed_a),
            transpose_a,
            k: params.k,
            m: params.m,
            k_multi_window: block_walker.shift_dimensions(1),
            isa,
        }
    }

    pub fn create_workloads(&self, workloads: &mut Vec<TransformAWorkload>) {
        let k_step = self.k_multi_window.x().step() as usize;
        self.k_multi_window.for_each(|id| {
            let k0 = id.x() as usize;
            workloads.push(TransformAWorkload {
                k0,
                kmax: (k0 + k_step).min(self.k),
                multi: id.y() as usize,
            });
        });
    }

    /// Repack the rows of `batch_window[start..end)` for one workload.
    ///
    /// Each batch row of the range is packed with a single panel call
    /// covering `[first_m, last_m)`, where `last_m` is the end of the
    /// current run as reported by the iterator.
    pub fn transform(
        &self,
        workload: &TransformAWorkload,
        thread_info: &ThreadInfo,
        batch_window: &Window,
        start: &Coordinates,
        end: &Coordinates,
    ) {
        let strategy = S::with_isa(self.isa);
        debug_assert!(thread_info.cpu_info.supports(strategy.isa()));

        let ld = self.a.stride(1);
        let last_m = Cell::new(0usize);
        let mut last_batch = None;

        let mut iterator = WindowIterator::new(batch_window, start, end, |id| {
            let batch = id.y() as usize;
            if last_batch == Some(batch) {
                return;
            }
            last_batch = Some(batch);

            let first_m = id.x() as usize;
            let last_m = last_m.get();
            if first_m >= last_m {
                return;
            }
            // SAFETY: rows [first_m, last_m) are inside A, and the panels
            // land in this range's own rows of `transformed_a`.
            unsafe {
                strategy.prepare_a(
                    self.transformed_a.ptr_mut(0, first_m, batch, 0),
                    self.a.ptr(0, 0, batch, workload.multi),
                    ld,
                    first_m..last_m,
                    workload.k0..workload.kmax,
                    self.transpose_a,
                );
            }
        });
        iterator.iterate_2d(|_, run_end| last_m.set((run_end as usize).min(self.m)));
    }
}
