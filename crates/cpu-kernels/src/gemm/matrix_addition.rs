// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `dst += beta * src`, the `beta * C` term of a GEMM.

use crate::registry::{gated, select, DataTypeIsaSelectorData, HasKernelTable, KernelSelectionType, MicroKernel};
use crate::scalar::{read, write, Scalar};
use cpu_info::CpuInfo;
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, ComputeError, DataType, Status, Steps, Tensor, TensorInfo, TensorPack, TensorType, Window,
};

const OP: &str = "CpuGemmMatrixAdditionKernel";

pub type MatrixAdditionUKernel = fn(&Tensor, &Tensor, f32, &Window);

static MATRIX_ADDITION_KERNELS: &[MicroKernel<DataTypeIsaSelectorData, MatrixAdditionUKernel>] = &[
    MicroKernel {
        name: "neon_fp16_gemm_matrix_add",
        is_selected: |d| d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", matrix_addition::<f16>),
    },
    MicroKernel {
        name: "neon_fp32_gemm_matrix_add",
        is_selected: |d| d.dt == DataType::F32,
        ukernel: Some(matrix_addition::<f32>),
    },
];

fn matrix_addition<T: Scalar>(src: &Tensor, dst: &Tensor, beta: f32, window: &Window) {
    window.for_each(|c| {
        // SAFETY: src and dst share a shape and `c` lies inside both.
        unsafe {
            let acc = read::<T>(dst, c).to_f32() + beta * read::<T>(src, c).to_f32();
            write(dst, c, T::from_f32(acc));
        }
    });
}

pub struct CpuGemmMatrixAdditionKernel {
    beta: f32,
    run_method: MatrixAdditionUKernel,
    name: String,
    window: Window,
}

impl HasKernelTable for CpuGemmMatrixAdditionKernel {
    type Selector = DataTypeIsaSelectorData;
    type Ukernel = MatrixAdditionUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        MATRIX_ADDITION_KERNELS
    }
}

impl CpuGemmMatrixAdditionKernel {
    pub fn validate(src: &TensorInfo, dst: &TensorInfo, cpu: &CpuInfo) -> Status {
        validate::cpu_f16_supported(OP, src, cpu.has_fp16())?;
        validate::data_type_in(OP, src, &[DataType::F16, DataType::F32])?;
        if dst.is_initialised() {
            validate::matching_data_types(OP, src, dst)?;
            validate::matching_shapes(OP, src, dst)?;
        }
        let selector = DataTypeIsaSelectorData {
            dt: src.data_type(),
            isa: *cpu.isa(),
        };
        if select::<Self>(&selector, KernelSelectionType::Supported).is_none() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: src.data_type().to_string(),
            });
        }
        Ok(())
    }

    pub fn configure(src: &TensorInfo, dst: &TensorInfo, beta: f32, cpu: &CpuInfo) -> Result<Self, ComputeError> {
        Self::validate(src, dst, cpu)?;
        let selector = DataTypeIsaSelectorData {
            dt: src.data_type(),
            isa: *cpu.isa(),
        };
        let uk = select::<Self>(&selector, KernelSelectionType::Supported).ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: src.data_type().to_string(),
        })?;
        let run_method = uk.ukernel.ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: uk.name.to_string(),
        })?;
        Ok(Self {
            beta,
            run_method,
            name: format!("{OP}/{}", uk.name),
            window: calculate_max_window(src.shape(), Steps::default()),
        })
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }
}

impl CpuKernel for CpuGemmMatrixAdditionKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        if self.beta == 0.0 {
            return;
        }
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(src, dst, self.beta, window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_info::CpuIsa;
    use std::sync::Arc;
    use tensor_core::TensorShape;

    #[test]
    fn test_accumulates_scaled_source() {
        let info = TensorInfo::new(TensorShape::new(&[2, 2]), DataType::F32);
        let cpu = CpuInfo::with_isa(CpuIsa::default(), 1);
        let k = CpuGemmMatrixAdditionKernel::configure(&info, &info, 0.5, &cpu).unwrap();
        let dst = Arc::new(Tensor::from_slice(info.clone(), &[1.0f32, 1.0, 1.0, 1.0]).unwrap());
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(info, &[2.0f32, 4.0, 6.0, 8.0]).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
        assert_eq!(dst.to_vec::<f32>(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_f16_needs_cpu_support() {
        let info = TensorInfo::new(TensorShape::new(&[2, 2]), DataType::F16);
        let plain = CpuInfo::with_isa(CpuIsa::default(), 1);
        assert!(CpuGemmMatrixAdditionKernel::validate(&info, &info, &plain).is_err());
        let other = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::F32);
        let f32_info = TensorInfo::new(TensorShape::new(&[2, 2]), DataType::F32);
        assert!(CpuGemmMatrixAdditionKernel::validate(&f32_info, &other, &plain).is_err());
    }
}
