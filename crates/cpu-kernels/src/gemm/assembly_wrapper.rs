// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Adapts a backend [`GemmCommon`] handle to the [`CpuKernel`] interface.
//!
//! Each dimension of the handle's work range becomes one window dimension;
//! workers split along x. The operand arrays are attached to the handle
//! beforehand, so `run_op` ignores the pack.

use gemm_backend::{GemmCommon, NdCoord, ND_MAX_DIMS};
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{ComputeError, DataType, Dimension, Status, TensorInfo, TensorPack, Window, MAX_DIMS};

pub struct CpuGemmAssemblyWrapperKernel<'a, Ti, Tw, To> {
    gemm: &'a dyn GemmCommon<Ti, Tw, To>,
    name: String,
    window: Window,
}

impl<'a, Ti, Tw, To> CpuGemmAssemblyWrapperKernel<'a, Ti, Tw, To> {
    const OP: &'static str = "CpuGemmAssemblyWrapperKernel";

    /// Checks that `a`, `b` and `d` form a combination the backend serves.
    pub fn validate(a: &TensorInfo, b: &TensorInfo, d: &TensorInfo) -> Status {
        let allowed_out: &[DataType] = match a.data_type() {
            DataType::F32 => &[DataType::F32],
            DataType::F16 => &[DataType::F16],
            DataType::BFloat16 => &[DataType::BFloat16, DataType::F32],
            DataType::U8 | DataType::QAsymm8 => &[DataType::U32, DataType::S32, DataType::QAsymm8, DataType::F32],
            DataType::S8 | DataType::QAsymm8Signed => &[DataType::S32, DataType::QAsymm8Signed, DataType::F32],
            dtype => return Err(ComputeError::UnsupportedDataType { op: Self::OP, dtype }),
        };
        if a.data_type().is_float() {
            validate::matching_data_types(Self::OP, a, b)?;
        }
        validate::data_type_in(Self::OP, d, allowed_out)
    }

    pub fn configure(gemm: &'a dyn GemmCommon<Ti, Tw, To>, name: impl Into<String>) -> Self {
        let range = gemm.get_window_size();
        let mut window = Window::new();
        for d in 0..ND_MAX_DIMS.min(MAX_DIMS) {
            window.set(d, Dimension::new(0, range.get_size(d), 1));
        }
        Self {
            gemm,
            name: name.into(),
            window,
        }
    }
}

impl<Ti, Tw, To> CpuKernel for CpuGemmAssemblyWrapperKernel<'_, Ti, Tw, To> {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, _tensors: &TensorPack, window: &Window, info: &ThreadInfo) {
        let mut dims = [(0usize, 1usize); ND_MAX_DIMS];
        for (d, slot) in dims.iter_mut().enumerate().take(MAX_DIMS) {
            let dim = window.get(d);
            *slot = (dim.start(), dim.end().saturating_sub(dim.start()));
        }
        let work = NdCoord::new(&dims);
        let locator = NdCoord::new(&[(info.thread_id, 1)]);
        self.gemm.execute(&work, &locator, info.thread_id);
    }

    fn split_dimension(&self) -> usize {
        Window::DIM_X
    }
}
