// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernels of the portable GEMM path and the wrappers around the backend.
//!
//! The portable path reshapes `A` with [`CpuGemmInterleave4x4Kernel`] and
//! `B` with [`CpuGemmTranspose1xWKernel`] so that
//! [`CpuGemmMatrixMultiplyKernel`] reads both operands sequentially.

mod assembly_wrapper;
mod interleave4x4;
mod matrix_addition;
mod matrix_multiply;
mod transpose1xw;
mod weights_reorder;

pub use assembly_wrapper::CpuGemmAssemblyWrapperKernel;
pub use interleave4x4::CpuGemmInterleave4x4Kernel;
pub use matrix_addition::{CpuGemmMatrixAdditionKernel, MatrixAdditionUKernel};
pub use matrix_multiply::{CpuGemmMatrixMultiplyKernel, MatrixMultiplyParams, MatrixMultiplyUKernel};
pub use transpose1xw::CpuGemmTranspose1xWKernel;
pub use weights_reorder::{compute_reordered_shape, CpuWeightsReorderKernel};

use tensor_core::{TensorInfo, TensorShape};

/// Rows of `A` packed together by the interleave kernel.
pub const INTERLEAVE_HEIGHT: usize = 4;

/// Sizes of the original problem when the operands were reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GemmReshapeInfo {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl GemmReshapeInfo {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }
}

/// Elements of `B` per transposed block: 16 bytes worth.
pub fn transpose_width(element_size: usize) -> usize {
    (16 / element_size.max(1)).max(1)
}

/// Shape of `a` after 4x4 interleaving: `[K * 4, ceil(M / 4)]`.
pub fn compute_interleaved_shape(a: &TensorInfo) -> TensorShape {
    let mut shape = *a.shape();
    shape.set(0, a.dimension(0) * INTERLEAVE_HEIGHT);
    shape.set(1, a.dimension(1).div_ceil(INTERLEAVE_HEIGHT));
    shape
}

/// Shape of `b` after 1xW transposition: `[K * W, ceil(N / W)]`.
pub fn compute_transpose1xw_shape(b: &TensorInfo) -> TensorShape {
    let w = transpose_width(b.element_size());
    let mut shape = *b.shape();
    shape.set(0, b.dimension(1) * w);
    shape.set(1, b.dimension(0).div_ceil(w));
    shape
}
