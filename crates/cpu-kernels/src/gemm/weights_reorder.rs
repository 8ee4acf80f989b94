// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blocks OHWI weights into a fixed `OHWIoN` format.
//!
//! The source is viewed as `[K, O]` with `K = I * W * H` innermost. Output
//! channel `o` and reduction index `k` land at `(k * N + o % N, o / N)`;
//! the channels padding the last block are zero.

use crate::scalar::{read_linear, write_linear};
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    ComputeError, Dimension, Status, Tensor, TensorInfo, TensorPack, TensorShape, TensorType, WeightFormat, Window,
};

type ReorderFn = fn(&Tensor, &Tensor, usize, usize, &Window);

fn reorder<T: bytemuck::Pod>(src: &Tensor, dst: &Tensor, k_len: usize, block: usize, window: &Window) {
    let o_len = src.info().shape().total_size() / k_len.max(1);
    window.for_each(|c| {
        let ob = c[1];
        for k in 0..k_len {
            for j in 0..block {
                let o = ob * block + j;
                let v = if o < o_len {
                    // SAFETY: `o * k_len + k` indexes the dense source.
                    unsafe { read_linear::<T>(src, o * k_len + k) }
                } else {
                    T::zeroed()
                };
                // SAFETY: row `ob` of dst holds `k_len * block` elements.
                unsafe { write_linear(dst, ob * k_len * block + k * block + j, v) };
            }
        }
    });
}

fn mover_for(element_size: usize) -> Option<ReorderFn> {
    match element_size {
        1 => Some(reorder::<u8>),
        2 => Some(reorder::<u16>),
        4 => Some(reorder::<u32>),
        _ => None,
    }
}

/// `(K, O)` of a weight tensor whose outermost significant dimension is O.
fn weight_dims(src: &TensorInfo) -> (usize, usize) {
    let nd = src.num_dimensions().max(2);
    let o = src.dimension(nd - 1);
    (src.shape().total_size() / o.max(1), o)
}

pub fn compute_reordered_shape(src: &TensorInfo, format: WeightFormat) -> TensorShape {
    let (k, o) = weight_dims(src);
    let block = format.interleave_by();
    TensorShape::new(&[k * block, o.div_ceil(block)])
}

pub struct CpuWeightsReorderKernel {
    format: WeightFormat,
    k_len: usize,
    run_method: ReorderFn,
    window: Window,
}

impl CpuWeightsReorderKernel {
    const OP: &'static str = "CpuWeightsReorderKernel";

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, format: WeightFormat) -> Status {
        validate::initialised(Self::OP, src)?;
        if !format.is_fixed_format() {
            return Err(ComputeError::invalid(
                Self::OP,
                format!("{format:?} is not a fixed weight format"),
            ));
        }
        if src.num_dimensions() > 4 {
            return Err(ComputeError::invalid(
                Self::OP,
                format!("expects OHWI weights, got {}", src.shape()),
            ));
        }
        if mover_for(src.element_size()).is_none() {
            return Err(ComputeError::UnsupportedDataType {
                op: Self::OP,
                dtype: src.data_type(),
            });
        }
        if dst.is_initialised() {
            validate::matching_data_types(Self::OP, src, dst)?;
            let expected = compute_reordered_shape(src, format);
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

    pub fn configure(src: &TensorInfo, dst: &mut TensorInfo, format: WeightFormat) -> Result<Self, ComputeError> {
        dst.auto_init_like(compute_reordered_shape(src, format), src);
        Self::validate(src, dst, format)?;
        let run_method = mover_for(src.element_size()).ok_or(ComputeError::UnsupportedDataType {
            op: Self::OP,
            dtype: src.data_type(),
        })?;
        let (k_len, o) = weight_dims(src);
        let window = Window::new().with(
            Window::DIM_Y,
            Dimension::new(0, o.div_ceil(format.interleave_by()), 1),
        );
        Ok(Self {
            format,
            k_len,
            run_method,
            window,
        })
    }

    pub fn weight_format(&self) -> WeightFormat {
        self.format
    }
}

impl CpuKernel for CpuWeightsReorderKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(src, dst, self.k_len, self.format.interleave_by(), window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tensor_core::DataType;

    #[test]
    fn test_blocks_output_channels() {
        // I=2, W=H=1, O=5 blocked by 4.
        let src_info = TensorInfo::new(TensorShape::new(&[2, 1, 1, 5]), DataType::F32);
        let mut dst_info = TensorInfo::empty();
        let k = CpuWeightsReorderKernel::configure(&src_info, &mut dst_info, WeightFormat::Ohwio4).unwrap();
        assert_eq!(dst_info.shape(), &TensorShape::new(&[8, 2]));

        // Element (i, o) = 10 * o + i.
        let values: Vec<f32> = (0..5).flat_map(|o| (0..2).map(move |i| (10 * o + i) as f32)).collect();
        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(src_info, &values).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
        assert_eq!(
            dst.to_vec::<f32>(),
            vec![
                0.0, 10.0, 20.0, 30.0, 1.0, 11.0, 21.0, 31.0, //
                40.0, 0.0, 0.0, 0.0, 41.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_rejects_non_fixed_format() {
        let src = TensorInfo::new(TensorShape::new(&[2, 3]), DataType::F32);
        assert!(CpuWeightsReorderKernel::validate(&src, &TensorInfo::empty(), WeightFormat::Any).is_err());
    }
}
