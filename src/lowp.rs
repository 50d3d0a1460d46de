//! Quantized `u8 × u8 → u8` GEMM on top of the interleaved `u32` product.
//!
//! Each operand element is shifted by its offset before multiplying. The
//! raw product of the unshifted operands comes from the `u8_4x4` strategy,
//! and the offsets are folded in afterwards from row sums of A and column
//! sums of B:
//!
//! ```text
//! sum((a + ao) * (b + bo)) = sum(a * b) + ao * colsum(b) + bo * rowsum(a) + K * ao * bo
//! ```
//!
//! The result then goes through [`LowpOutputStage::requantize`].

use tracing::{debug, instrument};

use crate::blocked::GemmParams;
use crate::config::{GemmConfig, GemmInfo};
use crate::error::{GemmError, Result};
use crate::gemm::GemmInterleaved;
use crate::kernels::U8Gemm4x4;
use crate::tensor::{DataType, Tensor, TensorAccessor, TensorInfo};

/// Largest K for which the raw `u32` product cannot wrap.
pub const MAX_DEPTH: usize = u32::MAX as usize / (255 * 255);

/// Offsets and fixed-point scale of a quantized product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LowpOutputStage {
    pub a_offset: i32,
    pub b_offset: i32,
    pub output_offset: i32,
    pub output_mult_int: i32,
    pub shift: u32,
}

impl LowpOutputStage {
    /// `((acc + output_offset) * output_mult_int) >> shift`, rounding to
    /// nearest with halves going up, saturated to `[0, 255]`.
    pub fn requantize(&self, acc: i64) -> u8 {
        let scaled = (acc + self.output_offset as i64) * self.output_mult_int as i64;
        let rounded = if self.shift == 0 {
            scaled
        } else {
            (scaled + (1i64 << (self.shift - 1))) >> self.shift
        };
        rounded.clamp(0, 255) as u8
    }
}

/// `u8` GEMM with offsets and requantization to `u8`.
pub struct GemmLowp {
    gemm: GemmInterleaved<U8Gemm4x4>,
    state: Option<LowpState>,
}

struct LowpState {
    stage: LowpOutputStage,
    params: GemmParams,
    output_info: TensorInfo,
    raw: Tensor,
    row_sums: Vec<i64>,
    col_sums: Vec<i64>,
}

impl GemmLowp {
    pub fn new(config: GemmConfig) -> Self {
        Self {
            gemm: GemmInterleaved::new(config),
            state: None,
        }
    }

    /// `output` has the shape and layout C would have, with `u8` elements.
    pub fn validate(a: &TensorInfo, b: &TensorInfo, output: &TensorInfo, stage: &LowpOutputStage) -> Result<()> {
        if output.data_type() != DataType::U8 {
            return Err(GemmError::DataTypeMismatch {
                tensor: "output",
                expected: DataType::U8,
                found: output.data_type(),
            });
        }
        if stage.shift >= 63 {
            return Err(GemmError::InvalidConfig(format!("shift {} is too large", stage.shift)));
        }
        let raw = raw_info(output);
        GemmInterleaved::<U8Gemm4x4>::validate(a, b, &raw, &GemmInfo::default())?;
        let params = GemmParams::from_tensors(a, &raw, false);
        if params.k > MAX_DEPTH {
            return Err(GemmError::ShapeMismatch(format!(
                "K={} overflows the u32 accumulator (max {})",
                params.k, MAX_DEPTH
            )));
        }
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn configure(
        &mut self,
        a: &Tensor,
        b: &Tensor,
        output: &Tensor,
        stage: LowpOutputStage,
        pretranspose_b: bool,
    ) -> Result<()> {
        Self::validate(a.info(), b.info(), output.info(), &stage)?;
        let mut raw = Tensor::with_info(raw_info(output.info()));
        let info = GemmInfo::default().pretranspose_b(pretranspose_b);
        self.gemm.configure(a, b, &mut raw, info)?;

        let params = GemmParams::from_tensors(a.info(), raw.info(), false);
        debug!(?stage, m = params.m, n = params.n, k = params.k, "configured quantized gemm");
        self.state = Some(LowpState {
            stage,
            params,
            output_info: output.info().clone(),
            row_sums: vec![0; params.m * params.batches * params.multis],
            col_sums: vec![0; params.n * params.multis],
            raw,
        });
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn run(&mut self, a: &Tensor, b: &Tensor, output: &mut Tensor) -> Result<()> {
        let state = self.state.as_mut().ok_or(GemmError::NotConfigured)?;
        if *output.info() != state.output_info {
            return Err(GemmError::TensorMismatch("output"));
        }
        self.gemm.run(a, b, &mut state.raw)?;

        let GemmParams {
            m,
            n,
            k,
            batches,
            multis,
        } = state.params;
        let stage = state.stage;

        let a_acc = TensorAccessor::<u8>::with_row_batches(a.view(), m);
        let b_acc = TensorAccessor::<u8>::new(b.view());
        let raw_acc = TensorAccessor::<u32>::with_row_batches(state.raw.view(), m);
        let out_acc = TensorAccessor::<u8>::with_row_batches(output.view_mut(), m);

        if stage.b_offset != 0 {
            for multi in 0..multis {
                for batch in 0..batches {
                    for row in 0..m {
                        // SAFETY: (kk, row, batch, multi) is inside A for every kk < K.
                        let sum: i64 = (0..k).map(|kk| unsafe { *a_acc.ptr(kk, row, batch, multi) } as i64).sum();
                        state.row_sums[(multi * batches + batch) * m + row] = sum;
                    }
                }
            }
        }
        if stage.a_offset != 0 {
            for multi in 0..multis {
                state.col_sums[multi * n..(multi + 1) * n].fill(0);
                for kk in 0..k {
                    for col in 0..n {
                        // SAFETY: B is [N, K, multis].
                        state.col_sums[multi * n + col] += unsafe { *b_acc.ptr(col, kk, multi, 0) } as i64;
                    }
                }
            }
        }

        let ao = stage.a_offset as i64;
        let bo = stage.b_offset as i64;
        let offset_product = k as i64 * ao * bo;
        for multi in 0..multis {
            for batch in 0..batches {
                for row in 0..m {
                    let row_term = bo * state.row_sums[(multi * batches + batch) * m + row];
                    for col in 0..n {
                        let col_term = ao * state.col_sums[multi * n + col];
                        // SAFETY: raw and output share the C geometry.
                        unsafe {
                            let acc = *raw_acc.ptr(col, row, batch, multi) as i64 + row_term + col_term + offset_product;
                            *out_acc.ptr_mut(col, row, batch, multi) = stage.requantize(acc);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn raw_info(output: &TensorInfo) -> TensorInfo {
    TensorInfo::new(*output.tensor_shape(), DataType::U32).with_layout(output.data_layout())
}
