// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Copies a tensor into a larger one and fills the surrounding border.
//!
//! The destination's first two dimensions exceed the source's by the
//! border widths; every destination row is produced independently.

use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    BorderMode, BorderSize, ComputeError, DataType, Dimension, Status, Tensor, TensorInfo, TensorPack, TensorShape,
    TensorType, Window, MAX_DIMS,
};

/// Encodes `value` as one element of `dt`, little-endian.
fn constant_bytes(dt: DataType, value: f64) -> Result<Vec<u8>, ComputeError> {
    let bytes = match dt {
        DataType::U8 | DataType::QAsymm8 => vec![value as u8],
        DataType::S8 | DataType::QAsymm8Signed | DataType::QSymm8 | DataType::QSymm8PerChannel => {
            (value as i8).to_le_bytes().to_vec()
        }
        DataType::U16 | DataType::QAsymm16 => (value as u16).to_le_bytes().to_vec(),
        DataType::S16 | DataType::QSymm16 => (value as i16).to_le_bytes().to_vec(),
        DataType::U32 => (value as u32).to_le_bytes().to_vec(),
        DataType::S32 => (value as i32).to_le_bytes().to_vec(),
        DataType::F16 => half::f16::from_f64(value).to_le_bytes().to_vec(),
        DataType::BFloat16 => half::bf16::from_f64(value).to_le_bytes().to_vec(),
        DataType::F32 => (value as f32).to_le_bytes().to_vec(),
        DataType::Unknown => {
            return Err(ComputeError::UnsupportedDataType {
                op: CpuFillBorderKernel::OP,
                dtype: dt,
            })
        }
    };
    Ok(bytes)
}

/// Shape of `shape` grown by `border` in the first two dimensions.
pub fn padded_shape(shape: &TensorShape, border: BorderSize) -> TensorShape {
    let mut out = *shape;
    out.set(0, shape[0] + border.left + border.right);
    out.set(1, shape[1] + border.top + border.bottom);
    out
}

pub struct CpuFillBorderKernel {
    border: BorderSize,
    mode: BorderMode,
    constant: Vec<u8>,
    window: Window,
}

impl CpuFillBorderKernel {
    const OP: &'static str = "CpuFillBorderKernel";

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, border: BorderSize) -> Status {
        validate::initialised(Self::OP, src)?;
        validate::initialised(Self::OP, dst)?;
        validate::matching_data_types(Self::OP, src, dst)?;
        let expected = padded_shape(src.shape(), border);
        if *dst.shape() != expected {
            return Err(ComputeError::MismatchingShapes {
                op: Self::OP,
                expected,
                actual: *dst.shape(),
            });
        }
        Ok(())
    }

    /// `constant_value` is used by [`BorderMode::Constant`] and is given in
    /// the stored representation (a zero-point for quantized types).
    pub fn configure(
        src: &TensorInfo,
        dst: &mut TensorInfo,
        border: BorderSize,
        mode: BorderMode,
        constant_value: f64,
    ) -> Result<Self, ComputeError> {
        dst.auto_init_like(padded_shape(src.shape(), border), src);
        Self::validate(src, dst, border)?;
        let constant = constant_bytes(src.data_type(), constant_value)?;
        // One iteration per padded row.
        let window = Window::new()
            .with(Window::DIM_Y, Dimension::new(0, dst.dimension(1), 1))
            .with(Window::DIM_Z, Dimension::new(0, dst.dimension(2), 1))
            .with(3, Dimension::new(0, dst.dimension(3), 1))
            .with(4, Dimension::new(0, dst.dimension(4), 1))
            .with(5, Dimension::new(0, dst.dimension(5), 1));
        Ok(Self {
            border,
            mode,
            constant,
            window,
        })
    }

    pub fn border_size(&self) -> BorderSize {
        self.border
    }

    fn fill_row(&self, src: &Tensor, dst: &Tensor, coords: &[usize; MAX_DIMS]) {
        let es = src.info().element_size();
        let (w, h) = (src.info().dimension(0), src.info().dimension(1));
        let b = self.border;
        let y = coords[1] as isize - b.top as isize;
        let inside_y = (0..h as isize).contains(&y);
        let src_y = match self.mode {
            BorderMode::Replicate => Some(y.clamp(0, h as isize - 1) as usize),
            _ if inside_y => Some(y as usize),
            _ => None,
        };
        let row_len = w + b.left + b.right;
        let mut out = *coords;
        out[0] = 0;
        let row = dst.ptr_to_element(&out);
        let mut sc = *coords;
        sc[0] = 0;

        // SAFETY: `row` addresses `row_len` elements of dst's padded row and
        // the source row holds `w` elements; the row belongs to this thread.
        unsafe {
            let Some(sy) = src_y else {
                if self.mode == BorderMode::Constant {
                    for i in 0..row_len {
                        std::ptr::copy_nonoverlapping(self.constant.as_ptr(), row.add(i * es), es);
                    }
                }
                return;
            };
            sc[1] = sy;
            let src_row = src.ptr_to_element(&sc).cast_const();
            std::ptr::copy_nonoverlapping(src_row, row.add(b.left * es), w * es);
            for i in (0..b.left).chain(b.left + w..row_len) {
                match self.mode {
                    BorderMode::Constant => {
                        std::ptr::copy_nonoverlapping(self.constant.as_ptr(), row.add(i * es), es)
                    }
                    BorderMode::Replicate => {
                        let from = if i < b.left { 0 } else { w - 1 };
                        std::ptr::copy_nonoverlapping(src_row.add(from * es), row.add(i * es), es)
                    }
                    BorderMode::Undefined => {}
                }
            }
        }
    }
}

impl CpuKernel for CpuFillBorderKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        window.for_each(|c| self.fill_row(src, dst, c));
    }
}
