// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Axis permutation and 2-D transposition.
//!
//! Both kernels iterate the source window and scatter every element to its
//! permuted coordinate. The mapping is a bijection, so disjoint source
//! sub-windows write disjoint destination elements.

use crate::scalar::{read, write};
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, ComputeError, Coordinates, PermutationVector, Status, Steps, Tensor, TensorInfo, TensorPack,
    TensorType, Window, MAX_DIMS,
};

type MoveFn = fn(&Tensor, &Tensor, &PermutationVector, &Window);

fn permute_elements<T: bytemuck::Pod>(src: &Tensor, dst: &Tensor, perm: &PermutationVector, window: &Window) {
    window.for_each(|c| {
        let mut out: Coordinates = [0; MAX_DIMS];
        for (i, o) in out.iter_mut().enumerate() {
            *o = c[perm.get(i)];
        }
        // SAFETY: `c` lies inside src and `out` is its image inside dst.
        unsafe { write(dst, &out, read::<T>(src, c)) };
    });
}

fn mover_for(element_size: usize) -> Option<MoveFn> {
    match element_size {
        1 => Some(permute_elements::<u8>),
        2 => Some(permute_elements::<u16>),
        4 => Some(permute_elements::<u32>),
        8 => Some(permute_elements::<u64>),
        _ => None,
    }
}

pub struct CpuPermuteKernel {
    perm: PermutationVector,
    run_method: MoveFn,
    window: Window,
}

impl CpuPermuteKernel {
    const OP: &'static str = "CpuPermuteKernel";

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, perm: &PermutationVector) -> Status {
        validate::initialised(Self::OP, src)?;
        if !perm.is_valid() || perm.num_dimensions() > 4 {
            return Err(ComputeError::invalid(
                Self::OP,
                format!("{:?} is not a permutation of at most 4 dimensions", perm.as_slice()),
            ));
        }
        if perm.num_dimensions() < src.num_dimensions() {
            return Err(ComputeError::invalid(
                Self::OP,
                format!(
                    "permutation of {} dimensions for a tensor of {}",
                    perm.num_dimensions(),
                    src.num_dimensions()
                ),
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
            validate::matching_quantization(Self::OP, src, dst)?;
            let expected = src.shape().permuted(perm);
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

    pub fn configure(src: &TensorInfo, dst: &mut TensorInfo, perm: PermutationVector) -> Result<Self, ComputeError> {
        dst.auto_init_like(src.shape().permuted(&perm), src);
        Self::validate(src, dst, &perm)?;
        let run_method = mover_for(src.element_size()).ok_or(ComputeError::UnsupportedDataType {
            op: Self::OP,
            dtype: src.data_type(),
        })?;
        Ok(Self {
            perm,
            run_method,
            window: calculate_max_window(src.shape(), Steps::default()),
        })
    }

    pub fn permutation(&self) -> &PermutationVector {
        &self.perm
    }
}

impl CpuKernel for CpuPermuteKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(src, dst, &self.perm, window);
    }
}

/// Swaps dimensions 0 and 1.
pub struct CpuTransposeKernel {
    inner: CpuPermuteKernel,
}

impl CpuTransposeKernel {
    const OP: &'static str = "CpuTransposeKernel";

    fn swap01() -> PermutationVector {
        PermutationVector::new(&[1, 0, 2, 3])
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo) -> Status {
        if src.num_dimensions() > 2 {
            return Err(ComputeError::invalid(
                Self::OP,
                format!("expects a 2-D tensor, got {}", src.shape()),
            ));
        }
        CpuPermuteKernel::validate(src, dst, &Self::swap01())
    }

    pub fn configure(src: &TensorInfo, dst: &mut TensorInfo) -> Result<Self, ComputeError> {
        dst.auto_init_like(src.shape().permuted(&Self::swap01()), src);
        Self::validate(src, dst)?;
        Ok(Self {
            inner: CpuPermuteKernel::configure(src, dst, Self::swap01())?,
        })
    }
}

impl CpuKernel for CpuTransposeKernel {
    fn name(&self) -> &str {
        Self::OP
    }

    fn window(&self) -> &Window {
        self.inner.window()
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, info: &ThreadInfo) {
        self.inner.run_op(tensors, window, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tensor_core::{DataType, TensorShape};

    fn run(k: &dyn CpuKernel, src: Tensor, dst: &Arc<Tensor>) {
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(src))
            .with(TensorType::DST, Arc::clone(dst));
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
    }

    #[test]
    fn test_transpose_2x3() {
        let src_info = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::F32);
        let mut dst_info = TensorInfo::empty();
        let k = CpuTransposeKernel::configure(&src_info, &mut dst_info).unwrap();
        assert_eq!(dst_info.shape(), &TensorShape::new(&[2, 3]));
        let dst = Arc::new(Tensor::new(dst_info));
        run(&k, Tensor::from_slice(src_info, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(), &dst);
        assert_eq!(dst.to_vec::<f32>(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_permute_3d_round_trip() {
        let shape = TensorShape::new(&[4, 5, 6]);
        let perm = PermutationVector::new(&[2, 1, 0, 3]);
        let src_info = TensorInfo::new(shape, DataType::S32);
        let mut mid_info = TensorInfo::empty();
        let fwd = CpuPermuteKernel::configure(&src_info, &mut mid_info, perm).unwrap();
        assert_eq!(mid_info.shape(), &TensorShape::new(&[6, 5, 4]));
        let mut back_info = TensorInfo::empty();
        let back = CpuPermuteKernel::configure(&mid_info, &mut back_info, perm).unwrap();
        assert_eq!(back_info.shape(), &shape);

        let values: Vec<i32> = (0..120).collect();
        let mid = Arc::new(Tensor::new(mid_info));
        run(&fwd, Tensor::from_slice(src_info, &values).unwrap(), &mid);
        let out = Arc::new(Tensor::new(back_info));
        run(&back, (*mid).clone(), &out);
        assert_eq!(out.to_vec::<i32>(), values);
    }

    #[test]
    fn test_rejects_invalid_permutation() {
        let src = TensorInfo::new(TensorShape::new(&[4, 5]), DataType::F32);
        assert!(CpuPermuteKernel::validate(&src, &TensorInfo::empty(), &PermutationVector::new(&[0, 0])).is_err());
        assert!(
            CpuPermuteKernel::validate(&src, &TensorInfo::empty(), &PermutationVector::new(&[4, 3, 2, 1, 0])).is_err()
        );
    }
}
