// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax along any of the first four axes.
//!
//! The row kernel only reduces along dimension 0. Any other axis is brought
//! to the front with a fixed permutation, reduced, and permuted back with
//! the same vector:
//!
//! ```text
//! SRC ──permute(p)──► PERMUTED_SRC ──softmax──► PERMUTED_DST ──permute(p)──► DST
//! ```
//!
//! Every entry of the permutation table is its own inverse, so applying it
//! twice restores the original order.

use crate::operator::required;
use crate::{Operator, OperatorContext};
use cpu_info::CpuInfo;
use cpu_kernels::{CpuPermuteKernel, CpuSoftmaxKernel};
use memory_manager::{AuxTensorHandler, MemoryInfo, MemoryLifetime, MemoryRequirements};
use runtime::CpuKernel;
use tensor_core::{
    offset_int_vec, ComputeError, DataType, PermutationVector, Status, TensorInfo, TensorPack, TensorShape,
    TensorType,
};

const OP: &str = "CpuSoftmaxGeneric";

const SCRATCH: u32 = 0;
const PERMUTED_SRC: u32 = 1;
const PERMUTED_DST: u32 = 2;

/// Permutation bringing `axis` to dimension 0, or `None` when no table
/// entry exists. Axis 0 maps to the identity.
pub fn softmax_axis_permutation(axis: usize) -> Option<PermutationVector> {
    match axis {
        0 => Some(PermutationVector::new(&[0, 1, 2, 3])),
        1 => Some(PermutationVector::new(&[1, 0, 2, 3])),
        2 => Some(PermutationVector::new(&[2, 1, 0, 3])),
        3 => Some(PermutationVector::new(&[3, 1, 2, 0])),
        _ => None,
    }
}

/// Maps a possibly negative axis into `[0, rank)`.
fn resolve_axis(src: &TensorInfo, axis: i32) -> Result<usize, ComputeError> {
    let rank = src.num_dimensions().max(1) as i32;
    if axis < -rank || axis >= rank {
        return Err(ComputeError::invalid(
            OP,
            format!("axis {axis} out of range for {}", src.shape()),
        ));
    }
    let axis = axis.rem_euclid(rank) as usize;
    if softmax_axis_permutation(axis).is_none() {
        return Err(ComputeError::invalid(
            OP,
            format!("softmax over axis {axis} is limited to rank 4 tensors"),
        ));
    }
    Ok(axis)
}

struct Permuted {
    to_front: CpuPermuteKernel,
    back: CpuPermuteKernel,
    src_info: TensorInfo,
    dst_info: TensorInfo,
}

/// Softmax or log-softmax with `exp(beta * (x - max))` scaling.
#[derive(Default)]
pub struct CpuSoftmaxGeneric {
    ctx: OperatorContext,
    softmax: Option<CpuSoftmaxKernel>,
    permuted: Option<Permuted>,
    scratch_info: Option<TensorInfo>,
    aux_mem: MemoryRequirements,
}

impl CpuSoftmaxGeneric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self {
            ctx,
            ..Self::default()
        }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, beta: f32, axis: i32, is_log: bool, cpu: &CpuInfo) -> Status {
        if src.num_dimensions() > 4 {
            return Err(ComputeError::invalid(
                OP,
                format!("supports up to 4 dimensions, got {}", src.shape()),
            ));
        }
        let axis = resolve_axis(src, axis)?;
        if axis == 0 {
            return CpuSoftmaxKernel::validate(src, dst, beta, is_log, cpu);
        }
        let perm = softmax_axis_permutation(axis).ok_or_else(|| ComputeError::invalid(OP, "no permutation"))?;
        let mut permuted_src = TensorInfo::empty();
        CpuPermuteKernel::configure(src, &mut permuted_src, perm.clone())?;
        let mut permuted_dst = TensorInfo::empty();
        CpuSoftmaxKernel::configure(&permuted_src, &mut permuted_dst, beta, is_log, cpu)?;
        CpuPermuteKernel::validate(&permuted_dst, dst, &perm)
    }

    pub fn configure(&mut self, src: &TensorInfo, dst: &mut TensorInfo, beta: f32, axis: i32, is_log: bool) -> Status {
        let cpu = self.ctx.cpu_info().clone();
        Self::validate(src, dst, beta, axis, is_log, &cpu)?;
        let axis = resolve_axis(src, axis)?;
        self.aux_mem.clear();
        self.permuted = None;

        let softmax = if axis == 0 {
            CpuSoftmaxKernel::configure(src, dst, beta, is_log, &cpu)?
        } else {
            let perm = softmax_axis_permutation(axis).ok_or_else(|| ComputeError::invalid(OP, "no permutation"))?;
            let mut src_info = TensorInfo::empty();
            let to_front = CpuPermuteKernel::configure(src, &mut src_info, perm.clone())?;
            let mut dst_info = TensorInfo::empty();
            let softmax = CpuSoftmaxKernel::configure(&src_info, &mut dst_info, beta, is_log, &cpu)?;
            let back = CpuPermuteKernel::configure(&dst_info, dst, perm)?;
            self.aux_mem.push(MemoryInfo::new(
                offset_int_vec(PERMUTED_SRC),
                MemoryLifetime::Temporary,
                src_info.total_size(),
            ));
            self.aux_mem.push(MemoryInfo::new(
                offset_int_vec(PERMUTED_DST),
                MemoryLifetime::Temporary,
                dst_info.total_size(),
            ));
            self.permuted = Some(Permuted {
                to_front,
                back,
                src_info,
                dst_info,
            });
            softmax
        };

        self.scratch_info = if src.data_type().is_quantized_asymmetric() {
            let floats = softmax.scratch_bytes_per_thread() / std::mem::size_of::<f32>() * self.ctx.num_threads();
            let info = TensorInfo::new(TensorShape::new(&[floats]), DataType::F32);
            self.aux_mem.push(MemoryInfo::new(
                offset_int_vec(SCRATCH),
                MemoryLifetime::Temporary,
                info.total_size(),
            ));
            Some(info)
        } else {
            None
        };

        tracing::info!(
            kernel = softmax.name(),
            axis,
            permuted = self.permuted.is_some(),
            "configured CpuSoftmaxGeneric"
        );
        self.softmax = Some(softmax);
        Ok(())
    }

    /// Shape the reduction runs on, when a permutation is needed.
    pub fn permuted_info(&self) -> Option<&TensorInfo> {
        self.permuted.as_ref().map(|p| &p.src_info)
    }
}

impl Operator for CpuSoftmaxGeneric {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(softmax) = &self.softmax else {
            panic!("CpuSoftmaxGeneric::run called before configure");
        };
        let scratch = self
            .scratch_info
            .as_ref()
            .map(|info| AuxTensorHandler::new(offset_int_vec(SCRATCH), info, tensors, false));
        let with_scratch = |pack: TensorPack| match &scratch {
            Some(s) => pack.with(TensorType::Dst1, s.to_arc()),
            None => pack,
        };

        let src = required(tensors, OP, TensorType::SRC);
        let dst = required(tensors, OP, TensorType::DST);

        let Some(p) = &self.permuted else {
            let pack = with_scratch(
                TensorPack::new()
                    .with_const(TensorType::SRC, src)
                    .with(TensorType::DST, dst),
            );
            self.ctx.schedule(softmax, &pack);
            return;
        };

        let tmp_src = AuxTensorHandler::new(offset_int_vec(PERMUTED_SRC), &p.src_info, tensors, false);
        let tmp_dst = AuxTensorHandler::new(offset_int_vec(PERMUTED_DST), &p.dst_info, tensors, false);

        let to_front = TensorPack::new()
            .with_const(TensorType::SRC, src)
            .with(TensorType::DST, tmp_src.to_arc());
        self.ctx.schedule(&p.to_front, &to_front);

        let reduce = with_scratch(
            TensorPack::new()
                .with_const(TensorType::SRC, tmp_src.to_arc())
                .with(TensorType::DST, tmp_dst.to_arc()),
        );
        self.ctx.schedule(softmax, &reduce);

        let back = TensorPack::new()
            .with_const(TensorType::SRC, tmp_dst.to_arc())
            .with(TensorType::DST, dst);
        self.ctx.schedule(&p.back, &back);
    }

    fn workspace(&self) -> MemoryRequirements {
        self.aux_mem.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuPermute;
    use std::sync::Arc;
    use tensor_core::Tensor;

    #[test]
    fn test_table_entries_are_self_inverse() {
        let shape = TensorShape::new(&[2, 3, 4, 5]);
        for axis in 1..4 {
            let p = softmax_axis_permutation(axis).unwrap();
            assert_eq!(shape.permuted(&p)[0], shape[axis]);
            assert_eq!(shape.permuted(&p).permuted(&p), shape);
        }
        assert!(softmax_axis_permutation(4).is_none());
    }

    #[test]
    fn test_table_entries_round_trip_data() {
        let shape = TensorShape::new(&[2, 3, 4, 5]);
        let values: Vec<f32> = (0..shape.total_size()).map(|v| v as f32).collect();
        for axis in 0..4 {
            let src_info = TensorInfo::new(shape, DataType::F32);
            let mut mid_info = TensorInfo::empty();
            let mut forward = CpuPermute::with_context(crate::test_context(1));
            forward
                .configure(&src_info, &mut mid_info, softmax_axis_permutation(axis).unwrap())
                .unwrap();
            let mut out_info = TensorInfo::empty();
            let mut back = CpuPermute::with_context(crate::test_context(1));
            back.configure(&mid_info, &mut out_info, softmax_axis_permutation(axis).unwrap())
                .unwrap();
            assert_eq!(mid_info.dimension(0), shape[axis]);
            assert_eq!(out_info.shape(), &shape);

            let mid = Arc::new(Tensor::new(mid_info));
            let out = Arc::new(Tensor::new(out_info));
            forward.run(
                &TensorPack::new()
                    .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(src_info, &values).unwrap()))
                    .with(TensorType::DST, Arc::clone(&mid)),
            );
            back.run(
                &TensorPack::new()
                    .with_const(TensorType::SRC, Arc::clone(&mid))
                    .with(TensorType::DST, Arc::clone(&out)),
            );
            if axis > 0 {
                assert_ne!(mid.to_vec::<f32>(), values, "axis {axis} moved nothing");
            }
            assert_eq!(out.to_vec::<f32>(), values, "axis {axis}");
        }
    }

    #[test]
    fn test_axis_validation() {
        let cpu = CpuInfo::with_isa(cpu_info::CpuIsa::default(), 1);
        let src = TensorInfo::new(TensorShape::new(&[4, 5, 6]), DataType::F32);
        let dst = TensorInfo::empty();
        assert!(CpuSoftmaxGeneric::validate(&src, &dst, 1.0, 0, false, &cpu).is_ok());
        assert!(CpuSoftmaxGeneric::validate(&src, &dst, 1.0, 2, false, &cpu).is_ok());
        assert!(CpuSoftmaxGeneric::validate(&src, &dst, 1.0, -1, false, &cpu).is_ok());
        assert!(CpuSoftmaxGeneric::validate(&src, &dst, 1.0, 3, false, &cpu).is_err());
        let five = TensorInfo::new(TensorShape::new(&[2, 2, 2, 2, 2]), DataType::F32);
        assert!(CpuSoftmaxGeneric::validate(&five, &dst, 1.0, 4, false, &cpu).is_err());
    }

    #[test]
    fn test_softmax_over_axis_one_matches_columns() {
        // [2, 3]: softmax down each column of two-element rows.
        let src_info = TensorInfo::new(TensorShape::new(&[2, 3]), DataType::F32);
        let mut dst_info = TensorInfo::empty();
        let mut op = CpuSoftmaxGeneric::with_context(crate::test_context(2));
        op.configure(&src_info, &mut dst_info, 1.0, 1, false).unwrap();
        assert_eq!(op.workspace().len(), 2);
        assert_eq!(dst_info.shape(), src_info.shape());

        let values = [0.0f32, 5.0, 0.0, 5.0, 0.0, 5.0];
        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(src_info, &values).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        op.run(&pack);
        for v in dst.to_vec::<f32>() {
            assert!((v - 1.0 / 3.0).abs() < 1e-6);
        }
    }
}
