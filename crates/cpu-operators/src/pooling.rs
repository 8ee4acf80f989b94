// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 2-D pooling.
//!
//! NHWC inputs go to the depth-first assembly kernel whenever it supports
//! the configuration and no indices are requested. Everything else runs the
//! portable kernel; for NCHW with padding a border-filled copy of the source
//! is produced first.

use crate::operator::required;
use crate::{Operator, OperatorContext};
use cpu_info::CpuInfo;
use cpu_kernels::{CpuFillBorderKernel, CpuPool2dAssemblyWrapperKernel, CpuPool2dKernel};
use memory_manager::{AuxTensorHandler, MemoryInfo, MemoryLifetime, MemoryRequirements};
use runtime::CpuKernel;
use tensor_core::{
    offset_int_vec, BorderMode, DataLayout, DataType, PoolingLayerInfo, Status, TensorInfo, TensorPack, TensorShape,
    TensorType,
};

const ASM_WORKSPACE: u32 = 0;
const PADDED_SRC: u32 = 1;

enum Pooling {
    Assembly {
        kernel: CpuPool2dAssemblyWrapperKernel,
        workspace: Option<TensorInfo>,
    },
    Portable {
        kernel: CpuPool2dKernel,
        border: Option<(CpuFillBorderKernel, TensorInfo)>,
    },
}

#[derive(Default)]
pub struct CpuPooling {
    ctx: OperatorContext,
    pooling: Option<Pooling>,
    aux_mem: MemoryRequirements,
}

impl CpuPooling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self {
            ctx,
            ..Self::default()
        }
    }

    fn use_assembly(src: &TensorInfo, dst: &TensorInfo, info: &PoolingLayerInfo, indices: bool, cpu: &CpuInfo) -> bool {
        !indices
            && src.data_layout() == DataLayout::Nhwc
            && CpuPool2dAssemblyWrapperKernel::is_supported(src, dst, info, cpu)
    }

    pub fn validate(
        src: &TensorInfo,
        dst: &TensorInfo,
        info: &PoolingLayerInfo,
        indices: Option<&TensorInfo>,
        cpu: &CpuInfo,
    ) -> Status {
        if Self::use_assembly(src, dst, info, indices.is_some(), cpu) {
            return Ok(());
        }
        CpuPool2dKernel::validate(src, dst, info, indices, cpu)
    }

    /// Configures the pooling. When `indices` is given the portable kernel
    /// writes the flat argmax of every max-pooled element into it.
    pub fn configure(
        &mut self,
        src: &TensorInfo,
        dst: &mut TensorInfo,
        info: &PoolingLayerInfo,
        indices: Option<&mut TensorInfo>,
    ) -> Status {
        let cpu = self.ctx.cpu_info().clone();
        self.aux_mem.clear();

        if Self::use_assembly(src, dst, info, indices.is_some(), &cpu) {
            let kernel = CpuPool2dAssemblyWrapperKernel::configure(src, dst, info, &cpu)?;
            let bytes = kernel.get_working_size(self.ctx.num_threads());
            let workspace = (bytes > 0).then(|| {
                self.aux_mem.push(MemoryInfo::new(
                    offset_int_vec(ASM_WORKSPACE),
                    MemoryLifetime::Temporary,
                    bytes,
                ));
                TensorInfo::new(TensorShape::new(&[bytes]), DataType::U8)
            });
            tracing::info!(kernel = kernel.name(), "configured CpuPooling");
            self.pooling = Some(Pooling::Assembly { kernel, workspace });
            return Ok(());
        }

        let kernel = CpuPool2dKernel::configure(src, dst, info, indices, &cpu)?;
        let border_size = kernel.border_size();
        let border = if border_size.is_empty() {
            None
        } else {
            let mode = kernel.border_mode();
            let constant = match mode {
                BorderMode::Constant if src.data_type().is_quantized_asymmetric() => {
                    f64::from(src.quantization_info().uniform().offset)
                }
                _ => 0.0,
            };
            let mut padded = TensorInfo::empty();
            let fill = CpuFillBorderKernel::configure(src, &mut padded, border_size, mode, constant)?;
            self.aux_mem.push(MemoryInfo::new(
                offset_int_vec(PADDED_SRC),
                MemoryLifetime::Temporary,
                padded.total_size(),
            ));
            Some((fill, padded))
        };
        tracing::info!(kernel = kernel.name(), border = border.is_some(), "configured CpuPooling");
        self.pooling = Some(Pooling::Portable { kernel, border });
        Ok(())
    }
}

impl Operator for CpuPooling {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(pooling) = &self.pooling else {
            panic!("CpuPooling::run called before configure");
        };
        let src = required(tensors, "CpuPooling", TensorType::SRC);
        let dst = required(tensors, "CpuPooling", TensorType::DST);
        match pooling {
            Pooling::Assembly { kernel, workspace } => {
                let mut pack = TensorPack::new()
                    .with_const(TensorType::SRC, src)
                    .with(TensorType::DST, dst);
                let ws = workspace
                    .as_ref()
                    .map(|info| AuxTensorHandler::new(offset_int_vec(ASM_WORKSPACE), info, tensors, false));
                if let Some(ws) = &ws {
                    pack.add_tensor(TensorType::Dst1, ws.to_arc());
                }
                self.ctx.schedule(kernel, &pack);
            }
            Pooling::Portable { kernel, border } => {
                let padded = border
                    .as_ref()
                    .map(|(_, info)| AuxTensorHandler::new(offset_int_vec(PADDED_SRC), info, tensors, false));
                let pool_src = match (border, &padded) {
                    (Some((fill, _)), Some(padded)) => {
                        let pack = TensorPack::new()
                            .with_const(TensorType::SRC, src)
                            .with(TensorType::DST, padded.to_arc());
                        self.ctx.schedule(fill, &pack);
                        padded.to_arc()
                    }
                    _ => src,
                };
                let mut pack = TensorPack::new()
                    .with_const(TensorType::SRC, pool_src)
                    .with(TensorType::DST, dst);
                if let Some(idx) = tensors.get_tensor(TensorType::Dst1) {
                    pack.add_tensor(TensorType::Dst1, std::sync::Arc::clone(idx));
                }
                self.ctx.schedule(kernel, &pack);
            }
        }
    }

    fn workspace(&self) -> MemoryRequirements {
        self.aux_mem.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tensor_core::{PadStrideInfo, PoolingType, Tensor};

    fn run(op: &mut CpuPooling, src: Tensor, dst: &Arc<Tensor>) {
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(src))
            .with(TensorType::DST, Arc::clone(dst));
        op.run(&pack);
    }

    #[test]
    fn test_nchw_max_pool_with_padding_fills_border() {
        let src_info = TensorInfo::new(TensorShape::new(&[2, 2, 1]), DataType::F32);
        let info = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nchw, PadStrideInfo::new(1, 1, 1, 1), false);
        let mut dst_info = TensorInfo::empty();
        let mut op = CpuPooling::with_context(crate::test_context(1));
        op.configure(&src_info, &mut dst_info, &info, None).unwrap();
        assert_eq!(dst_info.shape(), &TensorShape::new(&[3, 3, 1]));
        assert_eq!(op.workspace().len(), 1);

        let dst = Arc::new(Tensor::new(dst_info));
        run(&mut op, Tensor::from_slice(src_info, &[-1.0f32, -2.0, -3.0, -4.0]).unwrap(), &dst);
        // Replicated borders keep negative inputs from losing to padding.
        assert_eq!(
            dst.to_vec::<f32>(),
            vec![-1.0, -1.0, -2.0, -1.0, -1.0, -2.0, -3.0, -3.0, -4.0]
        );
    }

    #[test]
    fn test_nhwc_prefers_assembly_without_indices() {
        let src_info = TensorInfo::new(TensorShape::new(&[3, 4, 4]), DataType::F32).with_layout(DataLayout::Nhwc);
        let info = PoolingLayerInfo::new(PoolingType::Avg, 2, DataLayout::Nhwc, PadStrideInfo::new(2, 2, 0, 0), false);
        let mut dst_info = TensorInfo::empty();
        let mut op = CpuPooling::with_context(crate::test_context(2));
        op.configure(&src_info, &mut dst_info, &info, None).unwrap();
        assert!(matches!(op.pooling, Some(Pooling::Assembly { .. })));

        let values: Vec<f32> = (0..48).map(|v| v as f32).collect();
        let dst = Arc::new(Tensor::new(dst_info));
        run(&mut op, Tensor::from_slice(src_info, &values).unwrap(), &dst);
        // Channel 0 of the top-left output averages (0,0),(1,0),(0,1),(1,1).
        assert_eq!(dst.to_vec::<f32>()[0], (0.0 + 3.0 + 12.0 + 15.0) / 4.0);
    }
}
