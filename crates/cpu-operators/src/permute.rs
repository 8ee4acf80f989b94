// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::{Operator, OperatorContext};
use cpu_kernels::{CpuPermuteKernel, CpuTransposeKernel};
use tensor_core::{PermutationVector, Status, TensorInfo, TensorPack};

/// Reorders up to four dimensions: `dst.dim(i) = src.dim(perm[i])`.
#[derive(Default)]
pub struct CpuPermute {
    ctx: OperatorContext,
    kernel: Option<CpuPermuteKernel>,
}

impl CpuPermute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, kernel: None }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, perm: &PermutationVector) -> Status {
        CpuPermuteKernel::validate(src, dst, perm)
    }

    pub fn configure(&mut self, src: &TensorInfo, dst: &mut TensorInfo, perm: PermutationVector) -> Status {
        self.kernel = Some(CpuPermuteKernel::configure(src, dst, perm)?);
        Ok(())
    }
}

impl Operator for CpuPermute {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(kernel) = &self.kernel else {
            panic!("CpuPermute::run called before configure");
        };
        self.ctx.schedule(kernel, tensors);
    }
}

/// 2-D transpose.
#[derive(Default)]
pub struct CpuTranspose {
    ctx: OperatorContext,
    kernel: Option<CpuTransposeKernel>,
}

impl CpuTranspose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, kernel: None }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        CpuTransposeKernel::validate(src, dst)
    }

    pub fn configure(&mut self, src: &TensorInfo, dst: &mut TensorInfo) -> Status {
        self.kernel = Some(CpuTransposeKernel::configure(src, dst)?);
        Ok(())
    }
}

impl Operator for CpuTranspose {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(kernel) = &self.kernel else {
            panic!("CpuTranspose::run called before configure");
        };
        self.ctx.schedule(kernel, tensors);
    }
}
