// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # cpu-kernels
//!
//! Stateless CPU kernels. Each kernel is configured once against tensor
//! *metadata*, picks a micro-kernel from its static table, and computes the
//! maximum [`Window`](tensor_core::Window) it can execute. At run time it
//! receives a [`TensorPack`](tensor_core::TensorPack) and a sub-window from a
//! scheduler and touches only the elements inside that sub-window.
//!
//! # Key Components
//!
//! - [`registry`]: [`MicroKernel`] tables, the selector structs and
//!   [`select`]. The first entry whose predicate matches wins, so tables are
//!   ordered from most to least specialised.
//! - Elementwise: [`CpuActivationKernel`], [`CpuArithmeticKernel`].
//! - Data movement: [`CpuReshapeKernel`], [`CpuCopyKernel`],
//!   [`CpuPermuteKernel`], [`CpuTransposeKernel`], [`CpuFillBorderKernel`].
//! - Reductions: [`CpuSoftmaxKernel`], [`CpuPool2dKernel`] and the NHWC
//!   depth-first [`CpuPool2dAssemblyWrapperKernel`].
//! - [`gemm`]: interleave/transpose reshapes, the portable matrix multiply,
//!   `beta * C` addition, weight reordering and the wrapper that drives a
//!   backend GEMM handle as a kernel.
//!
//! # Selection
//!
//! ```text
//! configure(src, dst, .., cpu)
//!     │  selector = { dt, layout, isa, .. }
//!     ▼
//! select::<Kernel>(&selector, Supported)
//!     │  first table entry with is_selected(selector) && ukernel.is_some()
//!     ▼
//! run_method = entry.ukernel   name = "<Kernel>/<entry.name>"
//! ```
//!
//! Entries behind a disabled cargo feature (`fp16`, `sve`, `sve2`, `sme2`)
//! stay in the table with `ukernel: None`, so they are listed but never
//! selected.

pub mod gemm;
pub mod registry;

mod activation;
mod elementwise;
mod fill_border;
mod permute;
mod pool2d;
mod pool2d_assembly;
mod reshape;
mod scalar;
mod softmax;

pub use activation::{ActivationUKernel, CpuActivationKernel};
pub use elementwise::{ArithmeticParams, ArithmeticUKernel, CpuArithmeticKernel};
pub use fill_border::{padded_shape, CpuFillBorderKernel};
pub use gemm::{
    compute_interleaved_shape, compute_reordered_shape, compute_transpose1xw_shape, CpuGemmAssemblyWrapperKernel,
    CpuGemmInterleave4x4Kernel, CpuGemmMatrixAdditionKernel, CpuGemmMatrixMultiplyKernel,
    CpuGemmTranspose1xWKernel, CpuWeightsReorderKernel, GemmReshapeInfo,
};
pub use permute::{CpuPermuteKernel, CpuTransposeKernel};
pub use pool2d::{compute_pool_shape, effective_pool_size, CpuPool2dKernel, PoolParams, PoolingUKernel};
pub use pool2d_assembly::{AsmPoolingUKernel, CpuPool2dAssemblyWrapperKernel};
pub use registry::{
    select, AsmPoolingSelectorData, DataTypeDataLayoutIsaSelectorData, DataTypeIsaSelectorData,
    ElementwiseSelectorData, HasKernelTable, KernelSelectionType, MicroKernel, PoolingSelectorData,
    SoftmaxSelectorData,
};
pub use reshape::{CpuCopyKernel, CpuReshapeKernel};
pub use softmax::{CpuSoftmaxKernel, SoftmaxParams, SoftmaxUKernel};
