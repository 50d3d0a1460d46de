//! Problem sizes and cache blocking.

use tracing::debug;

use crate::config::GemmConfig;
use crate::kernels::{CpuInfo, Strategy};
use crate::tensor::{DataLayout, TensorInfo};
use crate::window::{DIM_X, DIM_Y, DIM_Z, Dimension, Window};

/// Sizes of a (batched, multi) GEMM: `multis × batches` products of
/// `[M, K] × [K, N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmParams {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub batches: usize,
    pub multis: usize,
}

impl GemmParams {
    /// Read the sizes from A and the output.
    ///
    /// A is `[K, M, batches, multis]` (`[M, K, ...]` when `transpose_a`), or
    /// `[K, W, H, batches]` in NHWC where `M = W * H`. C has N in dimension 0
    /// and the same row/batch layout as A.
    pub fn from_tensors(a: &TensorInfo, c: &TensorInfo, transpose_a: bool) -> Self {
        let k = if transpose_a { a.dimension(1) } else { a.dimension(0) };
        let n = c.dimension(0);
        match c.data_layout() {
            DataLayout::Nhwc => Self {
                m: c.dimension(1) * c.dimension(2),
                n,
                k,
                batches: c.dimension(3),
                multis: 1,
            },
            DataLayout::Nchw => Self {
                m: c.dimension(1),
                n,
                k,
                batches: c.dimension(2),
                multis: c.dimension(3),
            },
        }
    }
}

/// Block sizes chosen at configure time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    /// Columns of B per block, a multiple of the kernel's output width.
    pub x_block: usize,
    /// Depth per block, a multiple of the kernel's K unroll.
    pub k_block: usize,
    /// M rounded up to the kernel's output height.
    pub m_round: usize,
}

impl BlockSizes {
    /// Derive block sizes so a K block of A and B panels fits half of L1 and
    /// an x block of reshaped B fits 90% of L2, then even the blocks out over
    /// the problem. Explicit sizes in `config` take precedence.
    pub fn for_strategy<S: Strategy>(params: &GemmParams, cpu: &CpuInfo, config: &GemmConfig) -> Self {
        let element = size_of::<S::Operand>();
        let k = params.k.max(1);
        let n = params.n.max(1);

        let k_block = match config.k_block {
            Some(k_block) => k_block.max(1).next_multiple_of(S::K_UNROLL),
            None => {
                let l1_budget = cpu.l1_cache_size / 2;
                let k_block = l1_budget / (element * S::OUT_WIDTH.max(S::OUT_HEIGHT));
                let k_block = (k_block / S::K_UNROLL).max(1) * S::K_UNROLL;
                let num_k_blocks = k.div_ceil(k_block);
                k.div_ceil(num_k_blocks).next_multiple_of(S::K_UNROLL)
            }
        };

        let x_block = match config.x_block {
            Some(x_block) => x_block.max(1).next_multiple_of(S::OUT_WIDTH),
            None => {
                let l2_budget = cpu.l2_cache_size * 9 / 10;
                let panels = k_block * element * (S::OUT_WIDTH + S::OUT_HEIGHT);
                let x_block = l2_budget.saturating_sub(panels) / (element * k_block);
                let x_block = (x_block / S::OUT_WIDTH).max(1) * S::OUT_WIDTH;
                let num_x_blocks = n.div_ceil(x_block);
                n.div_ceil(num_x_blocks).next_multiple_of(S::OUT_WIDTH)
            }
        };

        let sizes = Self {
            x_block,
            k_block,
            m_round: params.m.next_multiple_of(S::OUT_HEIGHT),
        };
        debug!(
            strategy = S::NAME,
            x_block = sizes.x_block,
            k_block = sizes.k_block,
            m_round = sizes.m_round,
            "block sizes"
        );
        sizes
    }
}

/// The (x = N, y = K, z = multi) space of blocks, stepping by block size.
pub fn block_walker(params: &GemmParams, sizes: &BlockSizes) -> Window {
    let mut window = Window::new();
    window.set(
        DIM_X,
        Dimension::new(
            0,
            params.n.next_multiple_of(sizes.x_block) as i32,
            sizes.x_block as i32,
        ),
    );
    window.set(
        DIM_Y,
        Dimension::new(
            0,
            params.k.next_multiple_of(sizes.k_block) as i32,
            sizes.k_block as i32,
        ),
    );
    window.set(DIM_Z, Dimension::new(0, params.multis as i32, 1));
    window
}

/// The (x = M, y = batch) space threads split between them, one step per
/// kernel row block.
pub fn batch_window<S: Strategy>(params: &GemmParams, sizes: &BlockSizes) -> Window {
    let mut window = Window::new();
    window.set(
        DIM_X,
        Dimension::new(
            0,
            sizes.m_round.next_multiple_of(S::OUT_HEIGHT) as i32,
            S::OUT_HEIGHT as i32,
        ),
    );
    window.set(DIM_Y, Dimension::new(0, params.batches as i32, 1));
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{F32Gemm4x4, U8Gemm4x4};
    use crate::tensor::{DataType, TensorShape};

    fn params(m: usize, n: usize, k: usize) -> GemmParams {
        GemmParams {
            m,
            n,
            k,
            batches: 1,
            multis: 1,
        }
    }

    #[test]
    fn test_params_from_nchw_and_nhwc() {
        let a = TensorInfo::new(TensorShape::new(&[32, 6, 2, 3]), DataType::U8);
        let c = TensorInfo::new(TensorShape::new(&[10, 6, 2, 3]), DataType::U32);
        let p = GemmParams::from_tensors(&a, &c, false);
        assert_eq!((p.m, p.n, p.k, p.batches, p.multis), (6, 10, 32, 2, 3));

        let a = TensorInfo::new(TensorShape::new(&[8, 3, 5, 2]), DataType::F32)
            .with_layout(DataLayout::Nhwc);
        let c = TensorInfo::new(TensorShape::new(&[4, 3, 5, 2]), DataType::F32)
            .with_layout(DataLayout::Nhwc);
        let p = GemmParams::from_tensors(&a, &c, false);
        assert_eq!((p.m, p.n, p.k, p.batches, p.multis), (15, 4, 8, 2, 1));
    }

    #[test]
    fn test_block_sizes_respect_kernel_geometry() {
        let cpu = CpuInfo::portable();
        let config = GemmConfig::single_threaded();
        let p = params(100, 1000, 3000);
        let sizes = BlockSizes::for_strategy::<U8Gemm4x4>(&p, &cpu, &config);
        assert_eq!(sizes.k_block % 16, 0);
        assert_eq!(sizes.x_block % 4, 0);
        assert_eq!(sizes.m_round, 100);
        // Half of a 32 KiB L1 over 4-byte wide u8 panels caps K blocks at 4096.
        assert!(sizes.k_block <= 4096);
        assert!(sizes.k_block >= 3000);
    }

    #[test]
    fn test_block_sizes_even_out_k() {
        let cpu = CpuInfo::portable().with_cache_sizes(4096, 64 * 1024);
        let config = GemmConfig::single_threaded();
        let p = params(8, 8, 600);
        let sizes = BlockSizes::for_strategy::<F32Gemm4x4>(&p, &cpu, &config);
        // 2048 / (4 * 4) = 128 → 5 blocks of 120.
        assert_eq!(sizes.k_block, 120);
        assert_eq!(sizes.x_block, 8);
    }

    #[test]
    fn test_overrides_are_rounded() {
        let cpu = CpuInfo::portable();
        let config = GemmConfig::single_threaded().with_block_sizes(5, 20);
        let sizes = BlockSizes::for_strategy::<U8Gemm4x4>(&params(7, 8, 32), &cpu, &config);
        assert_eq!((sizes.x_block, sizes.k_block, sizes.m_round), (8, 32, 8));
    }

    #[test]
    fn test_windows() {
        let p = GemmParams {
            m: 10,
            n: 9,
            k: 40,
            batches: 3,
            multis: 2,
        };
        let sizes = BlockSizes {
            x_block: 4,
            k_block: 16,
            m_round: 12,
        };
        let walker = block_walker(&p, &sizes);
        assert_eq!(walker.shape()[..3], [3, 3, 2]);
        let batches = batch_window::<U8Gemm4x4>(&p, &sizes);
        assert_eq!(batches.shape()[..2], [3, 3]);
    }
}
