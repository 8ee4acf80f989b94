// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # cpu-operators
//!
//! Operators compose one or more kernels from `cpu-kernels` behind the
//! [`Operator`] lifecycle: `validate` on metadata, `configure` to select
//! kernels and declare auxiliary memory, then `prepare`/`run` on a
//! [`TensorPack`](tensor_core::TensorPack).
//!
//! # Key Components
//!
//! - [`gemm_assembly`]: [`CpuGemmAssemblyDispatch`], the bridge to the
//!   `gemm-backend` micro-kernels, with its typed fallback handling
//!   pretransposition, requantization and indirect input.
//! - [`CpuGemm`]: `d = alpha * a x b + beta * c`, on the assembly path when
//!   the backend serves it and on the portable interleave/transpose kernels
//!   otherwise.
//! - [`CpuMatMul`]: batched GEMM with adjoint operands and quantized output.
//! - [`CpuGemmDirectConv2d`]: NHWC convolution as a convolution-aware GEMM.
//! - Elementwise and data movement: [`CpuActivation`], [`CpuAdd`],
//!   [`CpuElementwiseArithmetic`], [`CpuReshape`], [`CpuCopy`],
//!   [`CpuPermute`], [`CpuTranspose`].
//! - Reductions: [`CpuSoftmaxGeneric`], [`CpuPooling`].
//!
//! # Workspace
//!
//! Every operator reports the auxiliary buffers it needs through
//! [`Operator::workspace`]. Slots the caller leaves unbound are allocated
//! on demand; `Persistent` ones are kept by the operator between runs.

pub mod gemm_assembly;

mod activation;
mod elementwise;
mod gemm;
mod gemm_conv2d;
mod matmul;
mod operator;
mod permute;
mod pooling;
mod reshape;
mod softmax;

pub use activation::CpuActivation;
pub use elementwise::{CpuAdd, CpuElementwiseArithmetic};
pub use gemm::CpuGemm;
pub use gemm_assembly::{AsmConvMethod, AsmGemmInfo, CpuGemmAssemblyDispatch};
pub use gemm_conv2d::{Conv2dInfo, CpuGemmDirectConv2d};
pub use matmul::{CpuMatMul, CpuMatMulSettings};
pub use operator::{Operator, OperatorContext};
pub use permute::{CpuPermute, CpuTranspose};
pub use pooling::CpuPooling;
pub use reshape::{CpuCopy, CpuReshape};
pub use softmax::{softmax_axis_permutation, CpuSoftmaxGeneric};

#[cfg(test)]
pub(crate) fn test_context(threads: usize) -> OperatorContext {
    use cpu_info::{CpuInfo, CpuIsa};
    use runtime::{CpuScheduler, Scheduler, SingleThreadScheduler};
    use std::sync::Arc;

    let cpu = CpuInfo::with_isa(CpuIsa::default(), threads.max(1));
    let scheduler: Arc<dyn Scheduler> = if threads <= 1 {
        Arc::new(SingleThreadScheduler::with_cpu_info(cpu))
    } else {
        Arc::new(CpuScheduler::with_cpu_info(threads, cpu).expect("thread pool"))
    };
    OperatorContext::new(scheduler)
}
