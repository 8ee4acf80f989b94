// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `dst = alpha * lhs * rhs` for F32 and F16.
//!
//! With `is_interleaved`, `lhs` and `rhs` are the outputs of the interleave
//! and 1xW-transpose kernels. Otherwise they are plain matrices; this is the
//! vector-matrix path used when `dst` has a single row.

use super::{compute_interleaved_shape, compute_transpose1xw_shape, transpose_width, GemmReshapeInfo, INTERLEAVE_HEIGHT};
use crate::registry::{gated, select, DataTypeIsaSelectorData, HasKernelTable, KernelSelectionType, MicroKernel};
use crate::scalar::{read, write, Scalar};
use cpu_info::CpuInfo;
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, ComputeError, Coordinates, DataType, Status, Steps, Tensor, TensorInfo, TensorPack,
    TensorType, Window,
};

const OP: &str = "CpuGemmMatrixMultiplyKernel";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixMultiplyParams {
    pub alpha: f32,
    pub is_interleaved: bool,
    /// Reduction length.
    pub k: usize,
}

pub type MatrixMultiplyUKernel = fn(&Tensor, &Tensor, &Tensor, &MatrixMultiplyParams, &Window);

static MATRIX_MULTIPLY_KERNELS: &[MicroKernel<DataTypeIsaSelectorData, MatrixMultiplyUKernel>] = &[
    MicroKernel {
        name: "neon_fp16_gemm_matrix_mul",
        is_selected: |d| d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", gemm_matrix_mul::<f16>),
    },
    MicroKernel {
        name: "neon_fp32_gemm_matrix_mul",
        is_selected: |d| d.dt == DataType::F32,
        ukernel: Some(gemm_matrix_mul::<f32>),
    },
];

fn gemm_matrix_mul<T: Scalar>(lhs: &Tensor, rhs: &Tensor, dst: &Tensor, p: &MatrixMultiplyParams, window: &Window) {
    let (out_w, out_h) = (dst.info().dimension(0), dst.info().dimension(1));
    let (step_x, step_y) = (window.x().step(), window.y().step());
    let rhs_batched = rhs.info().num_dimensions() >= 3;
    let w = transpose_width(std::mem::size_of::<T>());

    window.for_each(|c| {
        let mut a_at: Coordinates = *c;
        let mut b_at: Coordinates = if rhs_batched { *c } else { [0; tensor_core::MAX_DIMS] };
        let mut out = *c;
        for y in c[1]..(c[1] + step_y).min(out_h) {
            for x in c[0]..(c[0] + step_x).min(out_w) {
                let mut acc = 0.0f32;
                for k in 0..p.k {
                    if p.is_interleaved {
                        a_at[0] = k * INTERLEAVE_HEIGHT + y % INTERLEAVE_HEIGHT;
                        a_at[1] = y / INTERLEAVE_HEIGHT;
                        b_at[0] = k * w + x % w;
                        b_at[1] = x / w;
                    } else {
                        a_at[0] = k;
                        a_at[1] = y;
                        b_at[0] = x;
                        b_at[1] = k;
                    }
                    // SAFETY: validated operand shapes cover every (k, y) and (x, k).
                    let (a, b) = unsafe { (read::<T>(lhs, &a_at), read::<T>(rhs, &b_at)) };
                    acc += a.to_f32() * b.to_f32();
                }
                if p.alpha != 1.0 {
                    acc *= p.alpha;
                }
                out[0] = x;
                out[1] = y;
                // SAFETY: `(x, y)` is inside this sub-window of dst.
                unsafe { write(dst, &out, T::from_f32(acc)) };
            }
        }
    });
}

pub struct CpuGemmMatrixMultiplyKernel {
    params: MatrixMultiplyParams,
    run_method: MatrixMultiplyUKernel,
    name: String,
    window: Window,
    is_dst_vector: bool,
}

impl HasKernelTable for CpuGemmMatrixMultiplyKernel {
    type Selector = DataTypeIsaSelectorData;
    type Ukernel = MatrixMultiplyUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        MATRIX_MULTIPLY_KERNELS
    }
}

impl CpuGemmMatrixMultiplyKernel {
    pub fn validate(
        lhs: &TensorInfo,
        rhs: &TensorInfo,
        dst: &TensorInfo,
        is_interleaved: bool,
        reshape_info: &GemmReshapeInfo,
        cpu: &CpuInfo,
    ) -> Status {
        validate::cpu_f16_supported(OP, lhs, cpu.has_fp16())?;
        validate::data_type_in(OP, lhs, &[DataType::F16, DataType::F32])?;
        validate::matching_data_types(OP, lhs, rhs)?;

        let mismatch = |what: &str, expected: usize, actual: usize| {
            Err(ComputeError::invalid(OP, format!("{what}: expected {expected}, got {actual}")))
        };
        if !is_interleaved {
            if lhs.dimension(0) != rhs.dimension(1) {
                return mismatch("rhs rows (K)", lhs.dimension(0), rhs.dimension(1));
            }
            if dst.is_initialised() {
                validate::matching_data_types(OP, lhs, dst)?;
                if rhs.dimension(0) != dst.dimension(0) {
                    return mismatch("dst columns (N)", rhs.dimension(0), dst.dimension(0));
                }
                if lhs.dimension(1) != dst.dimension(1) {
                    return mismatch("dst rows (M)", lhs.dimension(1), dst.dimension(1));
                }
            }
        } else {
            let GemmReshapeInfo { m, n, k } = *reshape_info;
            let mut a_shape = *lhs.shape();
            a_shape.set(0, k).set(1, m);
            let original_a = lhs.clone().with_shape(a_shape);
            let expected = compute_interleaved_shape(&original_a);
            if *lhs.shape() != expected {
                return Err(ComputeError::MismatchingShapes {
                    op: OP,
                    expected,
                    actual: *lhs.shape(),
                });
            }
            if n != 0 {
                let mut b_shape = *rhs.shape();
                b_shape.set(0, n).set(1, k);
                let original_b = rhs.clone().with_shape(b_shape);
                let expected = compute_transpose1xw_shape(&original_b);
                if *rhs.shape() != expected {
                    return Err(ComputeError::MismatchingShapes {
                        op: OP,
                        expected,
                        actual: *rhs.shape(),
                    });
                }
            }
            if dst.is_initialised() {
                validate::matching_data_types(OP, lhs, dst)?;
                if n != 0 && dst.dimension(0) != n {
                    return mismatch("dst columns (N)", n, dst.dimension(0));
                }
                if dst.dimension(1) != m {
                    return mismatch("dst rows (M)", m, dst.dimension(1));
                }
            }
        }

        let selector = DataTypeIsaSelectorData {
            dt: lhs.data_type(),
            isa: *cpu.isa(),
        };
        if select::<Self>(&selector, KernelSelectionType::Supported).is_none() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: lhs.data_type().to_string(),
            });
        }
        Ok(())
    }

    pub fn configure(
        lhs: &TensorInfo,
        rhs: &TensorInfo,
        dst: &mut TensorInfo,
        alpha: f32,
        is_interleaved: bool,
        reshape_info: &GemmReshapeInfo,
        cpu: &CpuInfo,
    ) -> Result<Self, ComputeError> {
        let mut shape = *lhs.shape();
        shape.set(0, if is_interleaved { reshape_info.n } else { rhs.dimension(0) });
        shape.set(1, if is_interleaved { reshape_info.m } else { lhs.dimension(1) });
        dst.auto_init_like(shape, lhs);
        Self::validate(lhs, rhs, dst, is_interleaved, reshape_info, cpu)?;

        let selector = DataTypeIsaSelectorData {
            dt: lhs.data_type(),
            isa: *cpu.isa(),
        };
        let uk = select::<Self>(&selector, KernelSelectionType::Supported).ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: lhs.data_type().to_string(),
        })?;
        let run_method = uk.ukernel.ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: uk.name.to_string(),
        })?;

        let is_dst_vector = dst.dimension(1) == 1;
        let steps = if is_dst_vector {
            Steps::new(&[if lhs.data_type() == DataType::F32 { 16 } else { 32 }])
        } else {
            Steps::new(&[8, 4])
        };
        let k = if is_interleaved { reshape_info.k } else { lhs.dimension(0) };
        Ok(Self {
            params: MatrixMultiplyParams {
                alpha,
                is_interleaved,
                k,
            },
            run_method,
            name: format!("{OP}/{}", uk.name),
            window: calculate_max_window(dst.shape(), steps),
            is_dst_vector,
        })
    }

    pub fn is_dst_vector(&self) -> bool {
        self.is_dst_vector
    }
}

impl CpuKernel for CpuGemmMatrixMultiplyKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let lhs = tensors.tensor(TensorType::Src0);
        let rhs = tensors.tensor(TensorType::Src1);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(lhs, rhs, dst, &self.params, window);
    }

    fn split_dimension(&self) -> usize {
        if self.is_dst_vector {
            Window::DIM_X
        } else {
            Window::DIM_Y
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemm::{CpuGemmInterleave4x4Kernel, CpuGemmTranspose1xWKernel};
    use cpu_info::CpuIsa;
    use std::sync::Arc;
    use tensor_core::TensorShape;

    fn cpu() -> CpuInfo {
        CpuInfo::with_isa(CpuIsa::armv82_dot(), 1)
    }

    fn reference(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                out[i * n + j] = (0..k).map(|kk| a[i * k + kk] * b[kk * n + j]).sum();
            }
        }
        out
    }

    fn run(kernel: &dyn CpuKernel, inputs: [Tensor; 2], dst: &Arc<Tensor>) {
        let [a, b] = inputs;
        let pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::new(a))
            .with_const(TensorType::Src1, Arc::new(b))
            .with(TensorType::DST, Arc::clone(dst));
        kernel.run_op(&pack, kernel.window(), &ThreadInfo::SINGLE);
    }

    #[test]
    fn test_interleaved_matches_reference() {
        let (m, n, k) = (5, 6, 3);
        let a: Vec<f32> = (0..m * k).map(|v| v as f32 - 4.0).collect();
        let b: Vec<f32> = (0..k * n).map(|v| (v % 5) as f32).collect();
        let a_info = TensorInfo::new(TensorShape::new(&[k, m]), DataType::F32);
        let b_info = TensorInfo::new(TensorShape::new(&[n, k]), DataType::F32);

        let mut ta = TensorInfo::empty();
        let il = CpuGemmInterleave4x4Kernel::configure(&a_info, &mut ta).unwrap();
        let mut tb = TensorInfo::empty();
        let tr = CpuGemmTranspose1xWKernel::configure(&b_info, &mut tb).unwrap();
        let ta_t = Arc::new(Tensor::new(ta.clone()));
        let tb_t = Arc::new(Tensor::new(tb.clone()));
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(a_info, &a).unwrap()))
            .with(TensorType::DST, Arc::clone(&ta_t));
        il.run_op(&pack, il.window(), &ThreadInfo::SINGLE);
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(b_info, &b).unwrap()))
            .with(TensorType::DST, Arc::clone(&tb_t));
        tr.run_op(&pack, tr.window(), &ThreadInfo::SINGLE);

        let mut d = TensorInfo::empty();
        let mm = CpuGemmMatrixMultiplyKernel::configure(&ta, &tb, &mut d, 2.0, true, &GemmReshapeInfo::new(m, n, k), &cpu())
            .unwrap();
        assert_eq!(d.shape(), &TensorShape::new(&[n, m]));
        assert!(!mm.is_dst_vector());
        let dst = Arc::new(Tensor::new(d));
        run(&mm, [(*ta_t).clone(), (*tb_t).clone()], &dst);
        let expected: Vec<f32> = reference(&a, &b, m, n, k).iter().map(|v| v * 2.0).collect();
        assert_eq!(dst.to_vec::<f32>(), expected);
    }

    #[test]
    fn test_vector_matrix_path() {
        let (n, k) = (20, 3);
        let a = [1.0f32, 2.0, 3.0];
        let b: Vec<f32> = (0..k * n).map(|v| v as f32).collect();
        let a_info = TensorInfo::new(TensorShape::new(&[k, 1]), DataType::F32);
        let b_info = TensorInfo::new(TensorShape::new(&[n, k]), DataType::F32);
        let mut d = TensorInfo::empty();
        let mm = CpuGemmMatrixMultiplyKernel::configure(&a_info, &b_info, &mut d, 1.0, false, &GemmReshapeInfo::default(), &cpu())
            .unwrap();
        assert!(mm.is_dst_vector());
        assert_eq!(mm.split_dimension(), Window::DIM_X);
        assert_eq!(mm.window().num_iterations(Window::DIM_X), 2);
        let dst = Arc::new(Tensor::new(d));
        run(
            &mm,
            [Tensor::from_slice(a_info, &a).unwrap(), Tensor::from_slice(b_info, &b).unwrap()],
            &dst,
        );
        assert_eq!(dst.to_vec::<f32>(), reference(&a, &b, 1, n, k));
    }

    #[test]
    fn test_rejects_k_mismatch() {
        let a = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::F32);
        let b = TensorInfo::new(TensorShape::new(&[4, 5]), DataType::F32);
        assert!(
            CpuGemmMatrixMultiplyKernel::validate(&a, &b, &TensorInfo::empty(), false, &GemmReshapeInfo::default(), &cpu())
                .is_err()
        );
        let s = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::S32);
        assert!(matches!(
            CpuGemmMatrixMultiplyKernel::validate(&s, &s, &TensorInfo::empty(), false, &GemmReshapeInfo::default(), &cpu()),
            Err(ComputeError::UnsupportedDataType { .. })
        ));
    }
}
