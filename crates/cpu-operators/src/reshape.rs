// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::{Operator, OperatorContext};
use cpu_kernels::{CpuCopyKernel, CpuReshapeKernel};
use tensor_core::{Status, TensorInfo, TensorPack};

/// Reinterprets a tensor under a new shape with the same element count.
///
/// When `SRC` and `DST` share a buffer the run is a no-op.
#[derive(Default)]
pub struct CpuReshape {
    ctx: OperatorContext,
    kernel: Option<CpuReshapeKernel>,
}

impl CpuReshape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, kernel: None }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        CpuReshapeKernel::validate(src, dst)
    }

    pub fn configure(&mut self, src: &TensorInfo, dst: &TensorInfo) -> Status {
        self.kernel = Some(CpuReshapeKernel::configure(src, dst)?);
        Ok(())
    }
}

impl Operator for CpuReshape {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(kernel) = &self.kernel else {
            panic!("CpuReshape::run called before configure");
        };
        self.ctx.schedule(kernel, tensors);
    }
}

/// Dense copy between tensors of equal shape.
#[derive(Default)]
pub struct CpuCopy {
    ctx: OperatorContext,
    kernel: Option<CpuCopyKernel>,
}

impl CpuCopy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, kernel: None }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        CpuCopyKernel::validate(src, dst)
    }

    pub fn configure(&mut self, src: &TensorInfo, dst: &mut TensorInfo) -> Status {
        self.kernel = Some(CpuCopyKernel::configure(src, dst)?);
        Ok(())
    }
}

impl Operator for CpuCopy {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(kernel) = &self.kernel else {
            panic!("CpuCopy::run called before configure");
        };
        self.ctx.schedule(kernel, tensors);
    }
}
