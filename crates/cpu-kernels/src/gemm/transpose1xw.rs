// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transposes `B` in blocks of `W` columns (16 bytes): element `(n, k)`
//! lands at `(k * W + n % W, n / W)`. Missing columns of the last block are
//! zero.

use super::{compute_transpose1xw_shape, transpose_width};
use crate::scalar::{read, write};
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, ComputeError, Status, Steps, Tensor, TensorInfo, TensorPack, TensorType, Window,
};

type TransposeFn = fn(&Tensor, &Tensor, &Window);

fn transpose_1xw<T: bytemuck::Pod>(src: &Tensor, dst: &Tensor, window: &Window) {
    let n_len = src.info().dimension(0);
    let w = transpose_width(std::mem::size_of::<T>());
    window.for_each(|c| {
        let (n0, k) = (c[0], c[1]);
        let mut to = *c;
        to[1] = n0 / w;
        let mut from = *c;
        for j in 0..w {
            to[0] = k * w + j;
            let v = if n0 + j < n_len {
                from[0] = n0 + j;
                // SAFETY: `(n0 + j, k)` lies inside src.
                unsafe { read::<T>(src, &from) }
            } else {
                T::zeroed()
            };
            // SAFETY: dst has the transposed shape of src.
            unsafe { write(dst, &to, v) };
        }
    });
}

fn mover_for(element_size: usize) -> Option<TransposeFn> {
    match element_size {
        1 => Some(transpose_1xw::<u8>),
        2 => Some(transpose_1xw::<u16>),
        4 => Some(transpose_1xw::<u32>),
        8 => Some(transpose_1xw::<u64>),
        _ => None,
    }
}

pub struct CpuGemmTranspose1xWKernel {
    run_method: TransposeFn,
    window: Window,
}

impl CpuGemmTranspose1xWKernel {
    const OP: &'static str = "CpuGemmTranspose1xWKernel";

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        validate::initialised(Self::OP, src)?;
        if mover_for(src.element_size()).is_none() {
            return Err(ComputeError::UnsupportedDataType {
                op: Self::OP,
                dtype: src.data_type(),
            });
        }
        if dst.is_initialised() {
            validate::matching_data_types(Self::OP, src, dst)?;
            validate::matching_quantization(Self::OP, src, dst)?;
            let expected = compute_transpose1xw_shape(src);
            if *dst.shape() != expected {
                return Err(ComputeError::MismatchingShapes {
                    op: Self::OP,
                    expected,
                    actual: *dst.shape(),
                });
            }
        }
        Ok(())
    }

    pub fn configure(src: &TensorInfo, dst: &mut TensorInfo) -> Result<Self, ComputeError> {
        dst.auto_init_like(compute_transpose1xw_shape(src), src);
        Self::validate(src, dst)?;
        let run_method = mover_for(src.element_size()).ok_or(ComputeError::UnsupportedDataType {
            op: Self::OP,
            dtype: src.data_type(),
        })?;
        let window = calculate_max_window(src.shape(), Steps::new(&[transpose_width(src.element_size())]));
        Ok(Self { run_method, window })
    }
}

impl CpuKernel for CpuGemmTranspose1xWKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(src, dst, window);
    }
}
