// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::{Operator, OperatorContext};
use cpu_info::CpuInfo;
use cpu_kernels::CpuActivationKernel;
use tensor_core::{ActivationLayerInfo, Status, TensorInfo, TensorPack};

/// Element-wise activation; `SRC` and `DST` may be the same tensor.
#[derive(Default)]
pub struct CpuActivation {
    ctx: OperatorContext,
    kernel: Option<CpuActivationKernel>,
}

impl CpuActivation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, kernel: None }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, act: &ActivationLayerInfo, cpu: &CpuInfo) -> Status {
        CpuActivationKernel::validate(src, dst, act, cpu)
    }

    pub fn configure(&mut self, src: &TensorInfo, dst: &mut TensorInfo, act: ActivationLayerInfo) -> Status {
        let kernel = CpuActivationKernel::configure(src, dst, act, self.ctx.cpu_info())?;
        tracing::debug!(kernel = runtime::CpuKernel::name(&kernel), "configured CpuActivation");
        self.kernel = Some(kernel);
        Ok(())
    }
}

impl Operator for CpuActivation {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(kernel) = &self.kernel else {
            panic!("CpuActivation::run called before configure");
        };
        self.ctx.schedule(kernel, tensors);
    }
}
