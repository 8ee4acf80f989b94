// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reshape and copy: byte movers that never look at element values.

use cpu_info::CpuInfo;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_squashed_or_max_window, ComputeError, Status, Tensor, TensorInfo, TensorPack, TensorShape, TensorType,
    Window,
};

/// Minimum number of elements per thread for the 1-D copy.
const DEFAULT_MWS_1D: usize = 10240;

/// Copies the element range `[start, end)` of `src` into `dst`.
fn copy_elements(src: &Tensor, dst: &Tensor, start: usize, end: usize) {
    let es = src.info().element_size();
    if end <= start {
        return;
    }
    // SAFETY: both tensors are dense with at least `end` elements; the
    // range belongs to this thread alone.
    unsafe {
        std::ptr::copy_nonoverlapping(
            src.buffer().add(start * es).cast_const(),
            dst.buffer().add(start * es),
            (end - start) * es,
        );
    }
}

/// Reinterprets a tensor with a new shape of the same element count.
pub struct CpuReshapeKernel {
    window: Window,
    split_dimension: usize,
}

impl CpuReshapeKernel {
    const OP: &'static str = "CpuReshapeKernel";

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        validate::initialised(Self::OP, src)?;
        validate::initialised(Self::OP, dst)?;
        validate::matching_data_types(Self::OP, src, dst)?;
        validate::matching_quantization(Self::OP, src, dst)?;
        if src.shape().total_size() != dst.shape().total_size() {
            return Err(ComputeError::invalid(
                Self::OP,
                format!("cannot reshape {} into {}", src.shape(), dst.shape()),
            ));
        }
        Ok(())
    }

    pub fn configure(src: &TensorInfo, dst: &TensorInfo) -> Result<Self, ComputeError> {
        Self::validate(src, dst)?;
        let (window, split_dimension) = calculate_squashed_or_max_window(src);
        Ok(Self { window, split_dimension })
    }
}

impl CpuKernel for CpuReshapeKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        if src.shares_buffer_with(dst) && src.buffer() == dst.buffer() {
            return;
        }
        copy_elements(src, dst, window.x().start(), window.x().end());
    }

    fn get_mws(&self, _cpu: &CpuInfo, _threads: usize) -> usize {
        if self.split_dimension == Window::DIM_X {
            DEFAULT_MWS_1D
        } else {
            1
        }
    }

    fn split_dimension(&self) -> usize {
        self.split_dimension
    }
}

/// Copies a tensor into another of the same shape.
pub struct CpuCopyKernel {
    window: Window,
    split_dimension: usize,
}

impl CpuCopyKernel {
    const OP: &'static str = "CpuCopyKernel";

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        validate::initialised(Self::OP, src)?;
        if dst.is_initialised() {
            validate::matching_data_types(Self::OP, src, dst)?;
            validate::matching_shapes(Self::OP, src, dst)?;
        }
        Ok(())
    }

    pub fn configure(src: &TensorInfo, dst: &mut TensorInfo) -> Result<Self, ComputeError> {
        dst.auto_init_like(*src.shape(), src);
        Self::validate(src, dst)?;
        let (window, split_dimension) = calculate_squashed_or_max_window(src);
        Ok(Self { window, split_dimension })
    }

    /// Element count covered by the kernel.
    pub fn shape(&self) -> TensorShape {
        self.window.shape()
    }
}

impl CpuKernel for CpuCopyKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        copy_elements(src, dst, window.x().start(), window.x().end());
    }

    fn get_mws(&self, _cpu: &CpuInfo, _threads: usize) -> usize {
        DEFAULT_MWS_1D
    }

    fn split_dimension(&self) -> usize {
        self.split_dimension
    }
}
