//! Thread dispatch for the interleaved GEMM.
//!
//! Work is split by output rows: the batch window (row blocks × batches) is
//! cut into one contiguous range per thread, and every thread walks all
//! workloads over its own range. A thread therefore owns its output tiles
//! for the whole K reduction, which keeps C free of data races and makes the
//! first-K-block-applies-beta rule hold without extra synchronisation.
//!
//! The only shared mutable state is the B ring used when B is not
//! pretransposed; [`BufferRing`] orders its producers and consumers.

pub mod buffer_ring;

use std::ops::Range;
use std::thread;

use crate::kernels::CpuInfo;

pub use buffer_ring::BufferRing;

/// Identity of the worker running a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread_id: usize,
    pub num_threads: usize,
    pub cpu_info: CpuInfo,
}

/// Pick how many threads a product of this size deserves.
///
/// Small products stay single threaded because spawning costs more than it
/// saves:
/// - < 100M FLOPs: 1 thread
/// - < 300M FLOPs: 2 threads
/// - Otherwise: up to `max_threads`
///
/// Never more threads than there are row blocks to hand out.
pub fn choose_thread_count(m: usize, n: usize, k: usize, num_windows: usize, max_threads: usize) -> usize {
    let flops = 2.0 * (m as f64) * (n as f64) * (k as f64);

    const SINGLE_THREAD_THRESHOLD: f64 = 100_000_000.0;
    const TWO_THREAD_THRESHOLD: f64 = 300_000_000.0;

    let optimal_threads = if flops < SINGLE_THREAD_THRESHOLD {
        1
    } else if flops < TWO_THREAD_THRESHOLD {
        2
    } else {
        max_threads
    };

    optimal_threads.min(num_windows).min(max_threads).max(1)
}

/// Contiguous share of `0..num_windows` for thread `thread_id`.
///
/// The shares of all threads are disjoint, cover the whole range and differ
/// in length by at most one.
pub fn partition(num_windows: usize, num_threads: usize, thread_id: usize) -> Range<usize> {
    let start = thread_id * num_windows / num_threads;
    let end = (thread_id + 1) * num_windows / num_threads;
    start..end
}

/// Run `f` once on each of `num_threads` threads and wait for all of them.
///
/// Thread 0 is the calling thread. A panic in any worker is propagated.
pub fn run_workers<F>(num_threads: usize, cpu_info: CpuInfo, f: F)
where
    F: Fn(ThreadInfo) + Sync,
{
    let num_threads = num_threads.max(1);
    let info = |thread_id| ThreadInfo {
        thread_id,
        num_threads,
        cpu_info,
    };

    if num_threads == 1 {
        f(info(0));
        return;
    }

    thread::scope(|scope| {
        let f = &f;
        for thread_id in 1..num_threads {
            scope.spawn(move || f(info(thread_id)));
        }
        f(info(0));
    });
}
