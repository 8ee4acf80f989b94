// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Binary element-wise operators with broadcasting.

use crate::{Operator, OperatorContext};
use cpu_info::CpuInfo;
use cpu_kernels::CpuArithmeticKernel;
use tensor_core::{ArithmeticOperation, ConvertPolicy, Status, TensorInfo, TensorPack};

/// `DST = SRC_0 <op> SRC_1`.
#[derive(Default)]
pub struct CpuElementwiseArithmetic {
    ctx: OperatorContext,
    kernel: Option<CpuArithmeticKernel>,
}

impl CpuElementwiseArithmetic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, kernel: None }
    }

    pub fn validate(
        op: ArithmeticOperation,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &TensorInfo,
        cpu: &CpuInfo,
    ) -> Status {
        CpuArithmeticKernel::validate(op, src0, src1, dst, cpu)
    }

    pub fn configure(
        &mut self,
        op: ArithmeticOperation,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &mut TensorInfo,
        policy: ConvertPolicy,
    ) -> Status {
        self.kernel = Some(CpuArithmeticKernel::configure(
            op,
            policy,
            src0,
            src1,
            dst,
            self.ctx.cpu_info(),
        )?);
        Ok(())
    }
}

impl Operator for CpuElementwiseArithmetic {
    fn run(&mut self, tensors: &TensorPack) {
        let Some(kernel) = &self.kernel else {
            panic!("CpuElementwiseArithmetic::run called before configure");
        };
        self.ctx.schedule(kernel, tensors);
    }
}

/// Addition with an explicit overflow policy.
#[derive(Default)]
pub struct CpuAdd {
    inner: CpuElementwiseArithmetic,
}

impl CpuAdd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self {
            inner: CpuElementwiseArithmetic::with_context(ctx),
        }
    }

    pub fn validate(src0: &TensorInfo, src1: &TensorInfo, dst: &TensorInfo, cpu: &CpuInfo) -> Status {
        CpuElementwiseArithmetic::validate(ArithmeticOperation::Add, src0, src1, dst, cpu)
    }

    pub fn configure(
        &mut self,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &mut TensorInfo,
        policy: ConvertPolicy,
    ) -> Status {
        self.inner
            .configure(ArithmeticOperation::Add, src0, src1, dst, policy)
    }
}

impl Operator for CpuAdd {
    fn run(&mut self, tensors: &TensorPack) {
        self.inner.run(tensors);
    }
}
