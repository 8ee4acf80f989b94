// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Packs four rows of `A` into one: element `(k, m)` lands at
//! `(k * 4 + m % 4, m / 4)`. Missing rows of the last block are zero.

use super::{compute_interleaved_shape, INTERLEAVE_HEIGHT};
use crate::scalar::{read, write};
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, ComputeError, Dimension, Status, Steps, Tensor, TensorInfo, TensorPack, TensorType, Window,
};

type InterleaveFn = fn(&Tensor, &Tensor, &Window);

fn interleave<T: bytemuck::Pod>(src: &Tensor, dst: &Tensor, window: &Window) {
    let (k_len, m_len) = (src.info().dimension(0), src.info().dimension(1));
    window.for_each(|c| {
        let block = c[1] / INTERLEAVE_HEIGHT;
        let mut from = *c;
        let mut to = *c;
        to[1] = block;
        for k in 0..k_len {
            from[0] = k;
            for r in 0..INTERLEAVE_HEIGHT {
                let m = c[1] + r;
                to[0] = k * INTERLEAVE_HEIGHT + r;
                let v = if m < m_len {
                    from[1] = m;
                    // SAFETY: `(k, m)` lies inside src.
                    unsafe { read::<T>(src, &from) }
                } else {
                    T::zeroed()
                };
                // SAFETY: dst has the interleaved shape of src.
                unsafe { write(dst, &to, v) };
            }
        }
    });
}

fn mover_for(element_size: usize) -> Option<InterleaveFn> {
    match element_size {
        1 => Some(interleave::<u8>),
        2 => Some(interleave::<u16>),
        4 => Some(interleave::<u32>),
        8 => Some(interleave::<u64>),
        _ => None,
    }
}

pub struct CpuGemmInterleave4x4Kernel {
    run_method: InterleaveFn,
    window: Window,
}

impl CpuGemmInterleave4x4Kernel {
    const OP: &'static str = "CpuGemmInterleave4x4Kernel";

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
            let expected = compute_interleaved_shape(src);
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
        dst.auto_init_like(compute_interleaved_shape(src), src);
        Self::validate(src, dst)?;
        let run_method = mover_for(src.element_size()).ok_or(ComputeError::UnsupportedDataType {
            op: Self::OP,
            dtype: src.data_type(),
        })?;
        let mut window = calculate_max_window(src.shape(), Steps::new(&[1, INTERLEAVE_HEIGHT]));
        window.set(Window::DIM_X, Dimension::new(0, 1, 1));
        Ok(Self { run_method, window })
    }
}

impl CpuKernel for CpuGemmInterleave4x4Kernel {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tensor_core::{DataType, TensorShape};

    #[test]
    fn test_interleaves_and_pads() {
        // K=2, M=5
        let src_info = TensorInfo::new(TensorShape::new(&[2, 5]), DataType::F32);
        let mut dst_info = TensorInfo::empty();
        let k = CpuGemmInterleave4x4Kernel::configure(&src_info, &mut dst_info).unwrap();
        assert_eq!(dst_info.shape(), &TensorShape::new(&[8, 2]));
        assert_eq!(k.window().num_iterations(Window::DIM_Y), 2);

        let values: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(src_info, &values).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        for id in 0..2 {
            k.run_op(&pack, &k.window().split_window(Window::DIM_Y, id, 2), &ThreadInfo::SINGLE);
        }
        assert_eq!(
            dst.to_vec::<f32>(),
            vec![
                0.0, 2.0, 4.0, 6.0, 1.0, 3.0, 5.0, 7.0, //
                8.0, 0.0, 0.0, 0.0, 9.0, 0.0, 0.0, 0.0,
            ]
        );
    }
}
