// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! NHWC convolution run as one convolution-aware GEMM.
//!
//! Weights arrive OHWI (`[Cin, Kw, Kh, Cout]` in shape order) and are
//! permuted to `[Cout, Cin, Kw, Kh]` so that every kernel tap is one
//! `K = Cin` section of `B`. The backend resolves input rows per output
//! pixel and tap itself, so no im2col buffer is materialised.

use crate::gemm_assembly::{AsmConvMethod, AsmGemmInfo, CpuGemmAssemblyDispatch};
use crate::matmul::quantized_output_stage;
use crate::operator::required;
use crate::{CpuActivation, CpuPermute, Operator, OperatorContext};
use cpu_info::CpuInfo;
use memory_manager::{AuxTensorHandler, MemoryInfo, MemoryLifetime, MemoryRequirements, PersistentSlots};
use std::sync::Arc;
use tensor_core::{
    offset_int_vec, return_error_on, scaled_dimensions, validate, ActivationLayerInfo, ComputeError, DataLayout,
    DataType, PadStrideInfo, PermutationVector, Status, Tensor, TensorInfo, TensorPack, TensorShape, TensorType,
};

const OP: &str = "CpuGemmDirectConv2d";

const PERMUTED_WEIGHTS: u32 = 3;
const PERMUTED_WEIGHTS_ALIGNMENT: usize = 64;

/// Convolution options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Conv2dInfo {
    pub conv_info: PadStrideInfo,
    pub act_info: ActivationLayerInfo,
    pub enable_fast_math: bool,
    /// Read the input through a pointer table instead of resolving rows on the fly.
    pub indirect: bool,
}

fn weights_permutation() -> PermutationVector {
    PermutationVector::new(&[3, 0, 1, 2])
}

fn asm_info_for(src: &TensorInfo, weights: &TensorInfo, dst: &TensorInfo, info: &Conv2dInfo) -> Result<AsmGemmInfo, ComputeError> {
    let mut asm = AsmGemmInfo {
        method: if info.indirect {
            AsmConvMethod::Indirect
        } else {
            AsmConvMethod::Conv
        },
        ps_info: info.conv_info,
        reinterpret_input_as_3d: true,
        depth_output_gemm3d: 1,
        padding_top: info.conv_info.pad_top,
        padding_left: info.conv_info.pad_left,
        fast_mode: info.enable_fast_math,
        ..AsmGemmInfo::default()
    };
    if dst.data_type().is_quantized() {
        asm.output_stage = quantized_output_stage(src, weights, dst, &info.act_info)?;
    } else {
        asm.activation_info = info.act_info;
    }
    Ok(asm)
}

/// Direct convolution through the assembly GEMM.
#[derive(Default)]
pub struct CpuGemmDirectConv2d {
    ctx: OperatorContext,
    permute: CpuPermute,
    perm_weights: TensorInfo,
    weights_constant: bool,
    permuted: Option<Tensor>,
    persistent: PersistentSlots,
    gemm_asm: CpuGemmAssemblyDispatch,
    activation: Option<CpuActivation>,
    aux_mem: MemoryRequirements,
    is_prepared: bool,
}

impl CpuGemmDirectConv2d {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self {
            permute: CpuPermute::with_context(ctx.clone()),
            gemm_asm: CpuGemmAssemblyDispatch::with_context(ctx.clone()),
            ctx,
            ..Self::default()
        }
    }

    /// `[Cout, out_w, out_h, N]`, or an error when the kernel never fits.
    pub fn output_shape(src: &TensorInfo, weights: &TensorInfo, conv: &PadStrideInfo) -> Result<TensorShape, ComputeError> {
        let (w, h) = scaled_dimensions(
            src.dimension(1),
            src.dimension(2),
            weights.dimension(1),
            weights.dimension(2),
            conv,
        )
        .ok_or_else(|| {
            ComputeError::invalid(
                OP,
                format!(
                    "a {}x{} kernel does not fit a {}x{} input",
                    weights.dimension(1),
                    weights.dimension(2),
                    src.dimension(1),
                    src.dimension(2)
                ),
            )
        })?;
        Ok(TensorShape::new(&[weights.dimension(3), w, h, src.dimension(3)]))
    }

    pub fn validate(
        src: &TensorInfo,
        weights: &TensorInfo,
        biases: Option<&TensorInfo>,
        dst: &TensorInfo,
        info: &Conv2dInfo,
        cpu: &CpuInfo,
    ) -> Status {
        validate::data_type_in(
            OP,
            src,
            &[
                DataType::F32,
                DataType::F16,
                DataType::BFloat16,
                DataType::QAsymm8,
                DataType::QAsymm8Signed,
            ],
        )?;
        validate::matching_data_types(OP, src, weights)?;
        return_error_on!(
            src.data_layout() != DataLayout::Nhwc,
            OP,
            "expects NHWC input, got {:?}",
            src.data_layout()
        );
        return_error_on!(weights.num_dimensions() > 4, OP, "weights must be OHWI");
        return_error_on!(
            weights.dimension(0) != src.dimension(0),
            OP,
            "weights expect {} input channels, input has {}",
            weights.dimension(0),
            src.dimension(0)
        );
        if let Some(b) = biases {
            let expected = if src.data_type().is_quantized() {
                DataType::S32
            } else {
                src.data_type()
            };
            validate::data_type_in(OP, b, &[expected])?;
            return_error_on!(
                b.num_dimensions() > 1 || b.dimension(0) != weights.dimension(3),
                OP,
                "bias {} does not match {} output channels",
                b.shape(),
                weights.dimension(3)
            );
        }

        let shape = Self::output_shape(src, weights, &info.conv_info)?;
        let dst = if dst.is_initialised() {
            validate::matching_data_types(OP, src, dst)?;
            if *dst.shape() != shape {
                return Err(ComputeError::MismatchingShapes {
                    op: OP,
                    expected: shape,
                    actual: *dst.shape(),
                });
            }
            dst.clone()
        } else {
            src.clone().with_shape(shape)
        };

        let perm = weights.clone().with_shape(weights.shape().permuted(&weights_permutation()));
        let asm = asm_info_for(src, weights, &dst, info)?;
        CpuGemmAssemblyDispatch::validate(src, &perm, biases, &dst, &asm, cpu)?;
        let act = &info.act_info;
        if act.enabled() && !dst.data_type().is_quantized() && !CpuGemmAssemblyDispatch::is_activation_supported(act) {
            CpuActivation::validate(&dst, &dst, act, cpu)?;
        }
        Ok(())
    }

    pub fn configure(
        &mut self,
        src: &TensorInfo,
        weights: &TensorInfo,
        biases: Option<&TensorInfo>,
        dst: &mut TensorInfo,
        info: &Conv2dInfo,
    ) -> Status {
        if !dst.is_initialised() {
            *dst = src.clone().with_shape(Self::output_shape(src, weights, &info.conv_info)?);
        }
        let cpu = self.ctx.cpu_info().clone();
        Self::validate(src, weights, biases, dst, info, &cpu)?;
        *self = Self::with_context(self.ctx.clone());
        self.weights_constant = weights.are_values_constant();

        self.permute
            .configure(weights, &mut self.perm_weights, weights_permutation())?;
        self.perm_weights = self.perm_weights.clone().with_constant_values(self.weights_constant);
        let lifetime = if self.weights_constant {
            MemoryLifetime::Persistent
        } else {
            MemoryLifetime::Temporary
        };
        self.aux_mem.push(
            MemoryInfo::new(offset_int_vec(PERMUTED_WEIGHTS), lifetime, self.perm_weights.total_size())
                .with_alignment(PERMUTED_WEIGHTS_ALIGNMENT),
        );

        let asm = asm_info_for(src, weights, dst, info)?;
        self.gemm_asm.configure(src, &self.perm_weights, biases, dst, &asm);
        if !self.gemm_asm.is_configured() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: format!("{} convolution ({:?})", src.data_type(), asm.method),
            });
        }
        self.aux_mem.extend(self.gemm_asm.workspace());

        let act = info.act_info;
        if act.enabled() && !dst.data_type().is_quantized() && !CpuGemmAssemblyDispatch::is_activation_supported(&act) {
            let mut op = CpuActivation::with_context(self.ctx.clone());
            op.configure(dst, &mut dst.clone(), act)?;
            self.activation = Some(op);
        }
        tracing::info!(
            kernel = self.gemm_asm.kernel_name().unwrap_or_default(),
            method = ?asm.method,
            output = %dst.shape(),
            "configured CpuGemmDirectConv2d"
        );
        Ok(())
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.gemm_asm.kernel_name()
    }

    fn permuted_weights(&mut self, tensors: &TensorPack) -> (Arc<Tensor>, Option<AuxTensorHandler>) {
        let weights = required(tensors, OP, TensorType::Src1);
        if let Some(t) = self.permuted.as_ref().filter(|_| weights.are_values_constant()) {
            return (Arc::new(t.clone()), None);
        }
        let (dst, handler) = if weights.are_values_constant() {
            let t = self.persistent.resolve(
                offset_int_vec(PERMUTED_WEIGHTS),
                &self.perm_weights,
                PERMUTED_WEIGHTS_ALIGNMENT,
                tensors,
            );
            self.permuted = Some(t.clone());
            (Arc::new(t), None)
        } else {
            self.permuted = None;
            let h = AuxTensorHandler::new(offset_int_vec(PERMUTED_WEIGHTS), &self.perm_weights, tensors, false);
            (h.to_arc(), Some(h))
        };
        dst.set_values_constant(weights.are_values_constant());
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, weights)
            .with(TensorType::DST, Arc::clone(&dst));
        self.permute.run(&pack);
        tracing::debug!(constant = dst.are_values_constant(), "permuted convolution weights");
        (dst, handler)
    }

    fn gemm_pack(tensors: &TensorPack, weights: Arc<Tensor>) -> TensorPack {
        let mut pack = tensors.clone();
        pack.add_const_tensor(TensorType::Src1, weights);
        pack
    }
}

impl Operator for CpuGemmDirectConv2d {
    fn prepare(&mut self, tensors: &TensorPack) {
        if self.is_prepared {
            return;
        }
        if self.weights_constant {
            let (weights, _scratch) = self.permuted_weights(tensors);
            self.gemm_asm.prepare(&Self::gemm_pack(tensors, weights));
        }
        self.is_prepared = true;
    }

    fn run(&mut self, tensors: &TensorPack) {
        self.prepare(tensors);
        let (weights, _scratch) = self.permuted_weights(tensors);
        self.gemm_asm.run(&Self::gemm_pack(tensors, weights));

        if let Some(act) = self.activation.as_mut() {
            let dst = required(tensors, OP, TensorType::DST);
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
    use tensor_core::ActivationFunction;

    struct Problem {
        cin: usize,
        cout: usize,
        w: usize,
        h: usize,
        kw: usize,
        kh: usize,
        conv: PadStrideInfo,
    }

    fn nhwc(dims: &[usize]) -> TensorInfo {
        TensorInfo::new(TensorShape::new(dims), DataType::F32).with_layout(DataLayout::Nhwc)
    }

    fn reference(p: &Problem, src: &[f32], weights: &[f32], bias: &[f32], ow: usize, oh: usize) -> Vec<f32> {
        let mut out = vec![0.0; p.cout * ow * oh];
        for oy in 0..oh {
            for ox in 0..ow {
                for co in 0..p.cout {
                    let mut acc = bias[co];
                    for ky in 0..p.kh {
                        for kx in 0..p.kw {
                            let iy = (oy * p.conv.stride_y + ky) as isize - p.conv.pad_top as isize;
                            let ix = (ox * p.conv.stride_x + kx) as isize - p.conv.pad_left as isize;
                            if iy < 0 || ix < 0 || iy as usize >= p.h || ix as usize >= p.w {
                                continue;
                            }
                            for ci in 0..p.cin {
                                let s = src[ci + p.cin * (ix as usize + p.w * iy as usize)];
                                let w = weights[ci + p.cin * (kx + p.kw * (ky + p.kh * co))];
                                acc += s * w;
                            }
                        }
                    }
                    out[co + p.cout * (ox + ow * oy)] = acc;
                }
            }
        }
        out
    }

    fn run_case(p: Problem, indirect: bool, act: ActivationLayerInfo) {
        let src_info = nhwc(&[p.cin, p.w, p.h, 1]);
        let w_info = nhwc(&[p.cin, p.kw, p.kh, p.cout]);
        let b_info = TensorInfo::new(TensorShape::new(&[p.cout]), DataType::F32);
        let src: Vec<f32> = (0..src_info.shape().total_size()).map(|v| ((v * 7) % 11) as f32 - 5.0).collect();
        let weights: Vec<f32> = (0..w_info.shape().total_size()).map(|v| ((v * 5) % 7) as f32 - 3.0).collect();
        let bias: Vec<f32> = (0..p.cout).map(|v| v as f32 * 0.5).collect();

        let info = Conv2dInfo {
            conv_info: p.conv,
            act_info: act,
            enable_fast_math: false,
            indirect,
        };
        let mut dst_info = TensorInfo::empty();
        let mut op = CpuGemmDirectConv2d::with_context(crate::test_context(2));
        op.configure(&src_info, &w_info, Some(&b_info), &mut dst_info, &info).unwrap();
        let (ow, oh) = (dst_info.dimension(1), dst_info.dimension(2));

        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::new(Tensor::from_slice(src_info, &src).unwrap()))
            .with_const(TensorType::Src1, Arc::new(Tensor::from_slice(w_info, &weights).unwrap()))
            .with_const(TensorType::Src2, Arc::new(Tensor::from_slice(b_info, &bias).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        op.run(&pack);

        let mut expected = reference(&p, &src, &weights, &bias, ow, oh);
        if act.enabled() {
            expected.iter_mut().for_each(|v| *v = v.max(0.0));
        }
        assert_eq!(dst.to_vec::<f32>(), expected);
    }

    #[test]
    fn test_padded_conv_matches_reference() {
        run_case(
            Problem {
                cin: 3,
                cout: 4,
                w: 5,
                h: 4,
                kw: 3,
                kh: 3,
                conv: PadStrideInfo::new(1, 1, 1, 1),
            },
            false,
            ActivationLayerInfo::disabled(),
        );
    }

    #[test]
    fn test_indirect_strided_conv_with_relu() {
        run_case(
            Problem {
                cin: 2,
                cout: 3,
                w: 6,
                h: 5,
                kw: 3,
                kh: 2,
                conv: PadStrideInfo::new(2, 2, 1, 0),
            },
            true,
            ActivationLayerInfo::new(ActivationFunction::Relu, 0.0, 0.0),
        );
    }

    #[test]
    fn test_output_shape() {
        let src = nhwc(&[8, 7, 7, 2]);
        let weights = nhwc(&[8, 3, 3, 16]);
        let shape = CpuGemmDirectConv2d::output_shape(&src, &weights, &PadStrideInfo::new(2, 2, 1, 1)).unwrap();
        assert_eq!(shape, TensorShape::new(&[16, 4, 4, 2]));
        let too_big = nhwc(&[8, 9, 9, 16]);
        assert!(CpuGemmDirectConv2d::output_shape(&src, &too_big, &PadStrideInfo::default()).is_err());
    }

    #[test]
    fn test_rejects_nchw_and_channel_mismatch() {
        let cpu = crate::test_context(1).cpu_info().clone();
        let info = Conv2dInfo::default();
        let nchw = TensorInfo::new(TensorShape::new(&[4, 5, 5, 1]), DataType::F32);
        let weights = nhwc(&[4, 3, 3, 2]);
        assert!(CpuGemmDirectConv2d::validate(&nchw, &weights, None, &TensorInfo::empty(), &info, &cpu).is_err());
        let src = nhwc(&[3, 5, 5, 1]);
        let err = CpuGemmDirectConv2d::validate(&src, &weights, None, &TensorInfo::empty(), &info, &cpu).unwrap_err();
        assert!(err.to_string().contains("input channels"));
    }

    #[test]
    fn test_workspace_declares_permuted_weights() {
        let mut op = CpuGemmDirectConv2d::with_context(crate::test_context(1));
        let src = nhwc(&[4, 6, 6, 1]);
        let weights = nhwc(&[4, 3, 3, 8]);
        let mut dst = TensorInfo::empty();
        op.configure(&src, &weights, None, &mut dst, &Conv2dInfo::default()).unwrap();
        let ws = op.workspace();
        let slot = ws
            .iter()
            .find(|m| m.slot == offset_int_vec(PERMUTED_WEIGHTS))
            .unwrap();
        assert_eq!(slot.lifetime, MemoryLifetime::Persistent);
        assert_eq!(slot.size, 4 * 3 * 3 * 8 * 4);
    }
}
