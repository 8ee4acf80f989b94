// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batched matrix multiplication on top of the assembly dispatch.
//!
//! Adjoint operands are transposed into auxiliary slots first; every batch
//! dimension from 2 upwards is collapsed into one, which the backend runs
//! as independent multis.

use crate::gemm_assembly::{AsmGemmInfo, CpuGemmAssemblyDispatch};
use crate::operator::required;
use crate::{CpuActivation, CpuPermute, Operator, OperatorContext};
use cpu_info::CpuInfo;
use memory_manager::{AuxTensorHandler, MemoryInfo, MemoryLifetime, MemoryRequirements, PersistentSlots};
use std::sync::Arc;
use tensor_core::{
    calculate_quantized_multiplier, offset_int_vec, quantized_type_range, return_error_on, validate,
    ActivationFunction, ActivationLayerInfo, ComputeError, DataType, GemmLowpOutputStageInfo,
    GemmLowpOutputStageType, MatMulInfo, PermutationVector, Status, Tensor, TensorInfo, TensorPack, TensorType,
};

const OP: &str = "CpuMatMul";

// Slots 0..=2 belong to the assembly dispatch.
const TRANSPOSED_LHS: u32 = 3;
const TRANSPOSED_RHS: u32 = 4;

const TRANSPOSED_RHS_ALIGNMENT: usize = 64;

/// Backend options of a [`CpuMatMul`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMatMulSettings {
    pub fast_math: bool,
    pub fixed_format: bool,
}

/// Swaps the two innermost dimensions, keeping the batch ones.
fn swap_xy(info: &TensorInfo) -> PermutationVector {
    PermutationVector::new(&[1, 0, 2, 3][..info.num_dimensions().clamp(2, 4)])
}

fn transposed(info: &TensorInfo) -> TensorInfo {
    info.clone().with_shape(info.shape().permuted(&swap_xy(info)))
}

fn collapsed(info: &TensorInfo) -> TensorInfo {
    info.clone().with_shape(info.shape().collapsed_from(2))
}

/// Clamp bounds of a quantized output with `act` folded in.
fn quantized_bounds(act: &ActivationLayerInfo, dst: &TensorInfo) -> Result<(i32, i32), ComputeError> {
    let (lo, hi) = quantized_type_range(dst.data_type())?;
    let q = dst.quantization_info().uniform();
    let quantize = |v: f32| ((v / q.scale).round() as i32 + q.offset).clamp(lo, hi);
    match act.activation() {
        None => Ok((lo, hi)),
        Some(ActivationFunction::Relu) => Ok((q.offset.clamp(lo, hi), hi)),
        Some(ActivationFunction::BoundedRelu) => Ok((quantize(0.0), quantize(act.a()))),
        Some(ActivationFunction::LuBoundedRelu) => Ok((quantize(act.b()), quantize(act.a()))),
        Some(other) => Err(ComputeError::unsupported(
            OP,
            format!("{other:?} cannot be fused into a quantized matmul"),
        )),
    }
}

/// Output stage mapping the `lhs x rhs` accumulators onto `dst`'s quantization.
pub(crate) fn quantized_output_stage(
    lhs: &TensorInfo,
    rhs: &TensorInfo,
    dst: &TensorInfo,
    act: &ActivationLayerInfo,
) -> Result<GemmLowpOutputStageInfo, ComputeError> {
    let (l, r, d) = (
        lhs.quantization_info().uniform(),
        rhs.quantization_info().uniform(),
        dst.quantization_info().uniform(),
    );
    return_error_on!(d.scale == 0.0, OP, "dst has no quantization scale");
    let (multiplier, shift) = calculate_quantized_multiplier(l.scale * r.scale / d.scale)?;
    let (min, max) = quantized_bounds(act, dst)?;
    Ok(GemmLowpOutputStageInfo {
        stage_type: GemmLowpOutputStageType::QuantizeDownFixedpoint,
        gemmlowp_offset: d.offset,
        gemmlowp_multiplier: multiplier,
        gemmlowp_shift: shift,
        gemmlowp_min_bound: min,
        gemmlowp_max_bound: max,
        gemmlowp_multipliers: vec![multiplier],
        gemmlowp_shifts: vec![shift],
        is_quantized_per_channel: false,
        output_data_type: dst.data_type(),
    })
}

fn asm_info_for(
    lhs: &TensorInfo,
    rhs: &TensorInfo,
    dst: &TensorInfo,
    settings: CpuMatMulSettings,
    act: &ActivationLayerInfo,
) -> Result<AsmGemmInfo, ComputeError> {
    let mut info = AsmGemmInfo {
        fast_mode: settings.fast_math,
        fixed_format: settings.fixed_format,
        ..AsmGemmInfo::default()
    };
    if dst.data_type().is_quantized() {
        info.output_stage = quantized_output_stage(lhs, rhs, dst, act)?;
    } else {
        info.activation_info = *act;
    }
    Ok(info)
}

/// `dst = act(op(lhs) x op(rhs))` per batch, `op` being an optional transpose.
///
/// `lhs` is `[K, M, batches..]` and `rhs` `[N, K, batches..]` before their
/// adjoint flags are applied; batch dimensions must match exactly.
#[derive(Default)]
pub struct CpuMatMul {
    ctx: OperatorContext,
    transpose_lhs: Option<CpuPermute>,
    transpose_rhs: Option<CpuPermute>,
    lhs_transposed: TensorInfo,
    rhs_transposed: TensorInfo,
    lhs_3d: TensorInfo,
    rhs_3d: TensorInfo,
    dst_3d: TensorInfo,
    asm_glue: CpuGemmAssemblyDispatch,
    activation: Option<CpuActivation>,
    rhs_constant: bool,
    transposed_rhs: Option<Tensor>,
    persistent: PersistentSlots,
    aux_mem: MemoryRequirements,
    is_prepared: bool,
}

impl CpuMatMul {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self {
            asm_glue: CpuGemmAssemblyDispatch::with_context(ctx.clone()),
            ctx,
            ..Self::default()
        }
    }

    /// Expected `dst` descriptor.
    fn output_info(lhs: &TensorInfo, rhs: &TensorInfo, info: &MatMulInfo) -> TensorInfo {
        let lhs_t = if info.adj_lhs { transposed(lhs) } else { lhs.clone() };
        let n = if info.adj_rhs { rhs.dimension(1) } else { rhs.dimension(0) };
        let mut shape = *lhs_t.shape();
        shape.set(0, n);
        lhs_t.with_shape(shape)
    }

    pub fn validate(
        lhs: &TensorInfo,
        rhs: &TensorInfo,
        dst: &TensorInfo,
        info: &MatMulInfo,
        settings: CpuMatMulSettings,
        act: &ActivationLayerInfo,
        cpu: &CpuInfo,
    ) -> Status {
        validate::data_type_in(
            OP,
            lhs,
            &[
                DataType::F32,
                DataType::F16,
                DataType::BFloat16,
                DataType::QAsymm8,
                DataType::QAsymm8Signed,
            ],
        )?;
        validate::matching_data_types(OP, lhs, rhs)?;
        return_error_on!(
            (info.adj_lhs && lhs.num_dimensions() > 4) || (info.adj_rhs && rhs.num_dimensions() > 4),
            OP,
            "adjoint operands are limited to 4 dimensions"
        );

        let lhs_t = if info.adj_lhs { transposed(lhs) } else { lhs.clone() };
        let rhs_t = if info.adj_rhs { transposed(rhs) } else { rhs.clone() };
        return_error_on!(
            lhs_t.dimension(0) != rhs_t.dimension(1),
            OP,
            "K of lhs ({}) does not match K of rhs ({})",
            lhs_t.dimension(0),
            rhs_t.dimension(1)
        );
        let (lhs_batches, rhs_batches) = (lhs_t.shape().total_size_upper(2), rhs_t.shape().total_size_upper(2));
        return_error_on!(
            lhs_batches != rhs_batches,
            OP,
            "batch sizes differ: lhs {lhs_batches}, rhs {rhs_batches}"
        );

        let expected = Self::output_info(lhs, rhs, info);
        let dst = if dst.is_initialised() {
            validate::matching_data_types(OP, lhs, dst)?;
            if dst.shape() != expected.shape() {
                return Err(ComputeError::MismatchingShapes {
                    op: OP,
                    expected: *expected.shape(),
                    actual: *dst.shape(),
                });
            }
            dst.clone()
        } else {
            expected
        };

        let asm_info = asm_info_for(lhs, rhs, &dst, settings, act)?;
        CpuGemmAssemblyDispatch::validate(
            &collapsed(&lhs_t),
            &collapsed(&rhs_t),
            None,
            &collapsed(&dst),
            &asm_info,
            cpu,
        )?;
        if act.enabled() && !dst.data_type().is_quantized() && !CpuGemmAssemblyDispatch::is_activation_supported(act) {
            CpuActivation::validate(&dst, &dst, act, cpu)?;
        }
        Ok(())
    }

    pub fn configure(
        &mut self,
        lhs: &TensorInfo,
        rhs: &TensorInfo,
        dst: &mut TensorInfo,
        info: &MatMulInfo,
        settings: CpuMatMulSettings,
        act: &ActivationLayerInfo,
    ) -> Status {
        if !dst.is_initialised() {
            *dst = Self::output_info(lhs, rhs, info);
        }
        let cpu = self.ctx.cpu_info().clone();
        Self::validate(lhs, rhs, dst, info, settings, act, &cpu)?;
        *self = Self::with_context(self.ctx.clone());
        self.rhs_constant = rhs.are_values_constant();

        let lhs_t = if info.adj_lhs {
            let mut op = CpuPermute::with_context(self.ctx.clone());
            op.configure(lhs, &mut self.lhs_transposed, swap_xy(lhs))?;
            self.aux_mem.push(MemoryInfo::new(
                offset_int_vec(TRANSPOSED_LHS),
                MemoryLifetime::Temporary,
                self.lhs_transposed.total_size(),
            ));
            self.transpose_lhs = Some(op);
            self.lhs_transposed.clone()
        } else {
            lhs.clone()
        };
        let rhs_t = if info.adj_rhs {
            let mut op = CpuPermute::with_context(self.ctx.clone());
            op.configure(rhs, &mut self.rhs_transposed, swap_xy(rhs))?;
            let lifetime = if self.rhs_constant {
                MemoryLifetime::Persistent
            } else {
                MemoryLifetime::Temporary
            };
            self.aux_mem.push(
                MemoryInfo::new(offset_int_vec(TRANSPOSED_RHS), lifetime, self.rhs_transposed.total_size())
                    .with_alignment(TRANSPOSED_RHS_ALIGNMENT),
            );
            self.transpose_rhs = Some(op);
            self.rhs_transposed.clone()
        } else {
            rhs.clone()
        };

        self.lhs_3d = collapsed(&lhs_t);
        self.rhs_3d = collapsed(&rhs_t).with_constant_values(self.rhs_constant);
        self.dst_3d = collapsed(dst);
        let asm_info = asm_info_for(lhs, rhs, dst, settings, act)?;
        self.asm_glue
            .configure(&self.lhs_3d, &self.rhs_3d, None, &self.dst_3d, &asm_info);
        if !self.asm_glue.is_configured() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: format!("{} x {} -> {}", lhs.data_type(), rhs.data_type(), dst.data_type()),
            });
        }
        self.aux_mem.extend(self.asm_glue.workspace());

        if act.enabled() && !dst.data_type().is_quantized() && !CpuGemmAssemblyDispatch::is_activation_supported(act) {
            let mut op = CpuActivation::with_context(self.ctx.clone());
            op.configure(dst, &mut dst.clone(), *act)?;
            self.activation = Some(op);
        }
        tracing::info!(
            kernel = self.asm_glue.kernel_name().unwrap_or_default(),
            adj_lhs = info.adj_lhs,
            adj_rhs = info.adj_rhs,
            batches = self.dst_3d.dimension(2),
            "configured CpuMatMul"
        );
        Ok(())
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.asm_glue.kernel_name()
    }

    fn lhs_for_gemm(&mut self, tensors: &TensorPack) -> (Arc<Tensor>, Option<AuxTensorHandler>) {
        let lhs = required(tensors, OP, TensorType::Src0);
        let Some(op) = self.transpose_lhs.as_mut() else {
            return (lhs, None);
        };
        let handler = AuxTensorHandler::new(offset_int_vec(TRANSPOSED_LHS), &self.lhs_transposed, tensors, false);
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, lhs)
            .with(TensorType::DST, handler.to_arc());
        op.run(&pack);
        (handler.to_arc(), Some(handler))
    }

    fn rhs_for_gemm(&mut self, tensors: &TensorPack) -> (Arc<Tensor>, Option<AuxTensorHandler>) {
        let rhs = required(tensors, OP, TensorType::Src1);
        if self.transpose_rhs.is_none() {
            return (rhs, None);
        }
        if let Some(t) = self.transposed_rhs.as_ref().filter(|_| rhs.are_values_constant()) {
            return (Arc::new(t.clone()), None);
        }
        let (dst, handler) = if rhs.are_values_constant() {
            let t = self.persistent.resolve(
                offset_int_vec(TRANSPOSED_RHS),
                &self.rhs_transposed,
                TRANSPOSED_RHS_ALIGNMENT,
                tensors,
            );
            self.transposed_rhs = Some(t.clone());
            (Arc::new(t), None)
        } else {
            self.transposed_rhs = None;
            let h = AuxTensorHandler::new(offset_int_vec(TRANSPOSED_RHS), &self.rhs_transposed, tensors, false);
            (h.to_arc(), Some(h))
        };
        dst.set_values_constant(rhs.are_values_constant());
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, rhs)
            .with(TensorType::DST, Arc::clone(&dst));
        if let Some(op) = self.transpose_rhs.as_mut() {
            op.run(&pack);
        }
        (dst, handler)
    }

    /// `t` viewed with the batch-collapsed descriptor `info`.
    fn view(t: &Tensor, info: &TensorInfo) -> Arc<Tensor> {
        match t.reinterpret(info.clone()) {
            Ok(v) => Arc::new(v),
            Err(e) => panic!("{OP}: {e}"),
        }
    }
}

impl Operator for CpuMatMul {
    fn prepare(&mut self, tensors: &TensorPack) {
        if self.is_prepared {
            return;
        }
        // A non-constant rhs is handled by every run instead.
        if self.rhs_constant {
            let (rhs, _scratch) = self.rhs_for_gemm(tensors);
            let mut pack = tensors.clone();
            pack.add_const_tensor(TensorType::Src1, Self::view(&rhs, &self.rhs_3d));
            self.asm_glue.prepare(&pack);
        }
        self.is_prepared = true;
    }

    fn run(&mut self, tensors: &TensorPack) {
        self.prepare(tensors);
        let dst = required(tensors, OP, TensorType::DST);
        let (lhs, _lhs_scratch) = self.lhs_for_gemm(tensors);
        let (rhs, _rhs_scratch) = self.rhs_for_gemm(tensors);

        let mut pack = tensors.clone();
        pack.remove(TensorType::Src2);
        pack.add_const_tensor(TensorType::Src0, Self::view(&lhs, &self.lhs_3d));
        pack.add_const_tensor(TensorType::Src1, Self::view(&rhs, &self.rhs_3d));
        pack.add_tensor(TensorType::DST, Self::view(&dst, &self.dst_3d));
        self.asm_glue.run(&pack);

        if let Some(act) = self.activation.as_mut() {
            let pack = TensorPack::new()
                .with_const(TensorType::SRC, Arc::clone(&dst))
                .with(TensorType::DST, dst);
            act.run(&pack);
        }
    }

    fn workspace(&self) -> MemoryRequirements {
        self.aux_mem.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{QuantizationInfo, TensorShape};

    fn reference(lhs: &[f32], rhs: &[f32], m: usize, n: usize, k: usize, batches: usize) -> Vec<f32> {
        let mut out = vec![0.0; batches * m * n];
        for b in 0..batches {
            for y in 0..m {
                for x in 0..n {
                    out[b * m * n + y * n + x] = (0..k)
                        .map(|i| lhs[b * m * k + y * k + i] * rhs[b * k * n + i * n + x])
                        .sum();
                }
            }
        }
        out
    }

    #[test]
    fn test_batched_adjoint_rhs() {
        let (m, n, k, batches) = (3, 4, 5, 2);
        let lhs: Vec<f32> = (0..batches * m * k).map(|v| (v % 7) as f32 - 3.0).collect();
        let rhs: Vec<f32> = (0..batches * k * n).map(|v| (v % 5) as f32 - 1.0).collect();
        // rhs stored as [K, N] per batch, i.e. already transposed.
        let mut rhs_t = vec![0.0f32; rhs.len()];
        for b in 0..batches {
            for i in 0..k {
                for x in 0..n {
                    rhs_t[b * k * n + x * k + i] = rhs[b * k * n + i * n + x];
                }
            }
        }
        let lhs_info = TensorInfo::new(TensorShape::new(&[k, m, batches]), DataType::F32);
        let rhs_info = TensorInfo::new(TensorShape::new(&[k, n, batches]), DataType::F32);
        let mut dst_info = TensorInfo::empty();
        let mut op = CpuMatMul::with_context(crate::test_context(2));
        op.configure(
            &lhs_info,
            &rhs_info,
            &mut dst_info,
            &MatMulInfo {
                adj_lhs: false,
                adj_rhs: true,
            },
            CpuMatMulSettings::default(),
            &ActivationLayerInfo::disabled(),
        )
        .unwrap();
        assert_eq!(dst_info.shape(), &TensorShape::new(&[n, m, batches]));

        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::new(Tensor::from_slice(lhs_info, &lhs).unwrap()))
            .with_const(TensorType::Src1, Arc::new(Tensor::from_slice(rhs_info, &rhs_t).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        op.run(&pack);
        assert_eq!(dst.to_vec::<f32>(), reference(&lhs, &rhs, m, n, k, batches));
    }

    #[test]
    fn test_quantized_output_stage() {
        let (m, n, k) = (2, 3, 4);
        let lhs: Vec<i8> = (0..m * k).map(|v| (v % 9) as i8 - 4).collect();
        let rhs: Vec<i8> = (0..k * n).map(|v| (v % 7) as i8 - 3).collect();
        let lhs_info = TensorInfo::new(TensorShape::new(&[k, m]), DataType::QAsymm8Signed)
            .with_quantization(QuantizationInfo::new(0.5, 2));
        let rhs_info = TensorInfo::new(TensorShape::new(&[n, k]), DataType::QAsymm8Signed)
            .with_quantization(QuantizationInfo::new(0.5, 0));
        let mut dst_info = TensorInfo::new(TensorShape::new(&[n, m]), DataType::QAsymm8Signed)
            .with_quantization(QuantizationInfo::new(0.25, -3));

        let mut op = CpuMatMul::with_context(crate::test_context(1));
        op.configure(
            &lhs_info,
            &rhs_info,
            &mut dst_info,
            &MatMulInfo::default(),
            CpuMatMulSettings::default(),
            &ActivationLayerInfo::disabled(),
        )
        .unwrap();

        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::new(Tensor::from_slice(lhs_info, &lhs).unwrap()))
            .with_const(TensorType::Src1, Arc::new(Tensor::from_slice(rhs_info, &rhs).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        op.run(&pack);

        // The real multiplier is exactly 1, so the result is the
        // zero-point corrected accumulator plus the output offset.
        let expected: Vec<i8> = (0..m * n)
            .map(|i| {
                let (y, x) = (i / n, i % n);
                let acc: i32 = (0..k)
                    .map(|j| (lhs[y * k + j] as i32 - 2) * rhs[j * n + x] as i32)
                    .sum();
                (acc - 3).clamp(-128, 127) as i8
            })
            .collect();
        assert_eq!(dst.to_vec::<i8>(), expected);
    }

    #[test]
    fn test_quantized_bounds_fold_relu() {
        let dst = TensorInfo::new(TensorShape::new(&[1]), DataType::QAsymm8).with_quantization(QuantizationInfo::new(0.1, 10));
        let relu = ActivationLayerInfo::new(ActivationFunction::Relu, 0.0, 0.0);
        assert_eq!(quantized_bounds(&relu, &dst).unwrap(), (10, 255));
        let relu6 = ActivationLayerInfo::new(ActivationFunction::BoundedRelu, 6.0, 0.0);
        assert_eq!(quantized_bounds(&relu6, &dst).unwrap(), (10, 70));
        let tanh = ActivationLayerInfo::new(ActivationFunction::Tanh, 1.0, 1.0);
        assert!(quantized_bounds(&tanh, &dst).is_err());
    }

    #[test]
    fn test_batch_mismatch_is_rejected() {
        let cpu = crate::test_context(1).cpu_info().clone();
        let lhs = TensorInfo::new(TensorShape::new(&[4, 3, 2]), DataType::F32);
        let rhs = TensorInfo::new(TensorShape::new(&[5, 4, 3]), DataType::F32);
        let err = CpuMatMul::validate(
            &lhs,
            &rhs,
            &TensorInfo::empty(),
            &MatMulInfo::default(),
            CpuMatMulSettings::default(),
            &ActivationLayerInfo::disabled(),
            &cpu,
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch"));
    }
}
