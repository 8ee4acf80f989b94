// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Binary element-wise arithmetic with broadcasting.

use crate::registry::{gated, select, ElementwiseSelectorData, HasKernelTable, KernelSelectionType, MicroKernel};
use crate::scalar::{read, read_linear, write, write_linear, Quantized, Scalar};
use cpu_info::{CpuInfo, CpuModel};
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, calculate_squashed_or_max_window, ArithmeticOperation, ComputeError, ConvertPolicy,
    Coordinates, DataType, Status, Steps, Tensor, TensorInfo, TensorPack, TensorShape, TensorType, Window, MAX_DIMS,
};

const OP: &str = "CpuArithmeticKernel";

const DEFAULT_MWS_N1_FP32: usize = 24536;
const DEFAULT_MWS_V1_FP32: usize = 40510;
const DEFAULT_MWS_OTHER_1D: usize = 10240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithmeticParams {
    pub op: ArithmeticOperation,
    pub policy: ConvertPolicy,
    /// Operands and output share one dense shape; the window is 1-D.
    pub squashed: bool,
}

pub type ArithmeticUKernel = fn(&Tensor, &Tensor, &Tensor, &ArithmeticParams, &Window);

static ARITHMETIC_KERNELS: &[MicroKernel<ElementwiseSelectorData, ArithmeticUKernel>] = &[
    MicroKernel {
        name: "sve_fp32_elementwise",
        is_selected: |d| d.dt == DataType::F32 && d.isa.sve,
        ukernel: gated!("sve", float_arithmetic::<f32>),
    },
    MicroKernel {
        name: "sve_s32_elementwise",
        is_selected: |d| d.dt == DataType::S32 && d.isa.sve,
        ukernel: gated!("sve", integer_arithmetic::<i32>),
    },
    MicroKernel {
        name: "sve_s16_elementwise",
        is_selected: |d| d.dt == DataType::S16 && d.isa.sve,
        ukernel: gated!("sve", integer_arithmetic::<i16>),
    },
    MicroKernel {
        name: "neon_fp32_elementwise",
        is_selected: |d| d.dt == DataType::F32,
        ukernel: Some(float_arithmetic::<f32>),
    },
    MicroKernel {
        name: "neon_s32_elementwise",
        is_selected: |d| d.dt == DataType::S32,
        ukernel: Some(integer_arithmetic::<i32>),
    },
    MicroKernel {
        name: "sve2_qu8_elementwise",
        is_selected: |d| d.dt == DataType::QAsymm8 && d.isa.sve2,
        ukernel: gated!("sve2", quantized_arithmetic::<u8>),
    },
    MicroKernel {
        name: "sve2_qs8_elementwise",
        is_selected: |d| d.dt == DataType::QAsymm8Signed && d.isa.sve2,
        ukernel: gated!("sve2", quantized_arithmetic::<i8>),
    },
    MicroKernel {
        name: "neon_qu8_elementwise",
        is_selected: |d| d.dt == DataType::QAsymm8,
        ukernel: Some(quantized_arithmetic::<u8>),
    },
    MicroKernel {
        name: "neon_qs8_elementwise",
        is_selected: |d| d.dt == DataType::QAsymm8Signed,
        ukernel: Some(quantized_arithmetic::<i8>),
    },
    MicroKernel {
        name: "sve_fp16_elementwise",
        is_selected: |d| d.dt == DataType::F16 && d.isa.sve && d.isa.fp16,
        ukernel: gated!("sve", float_arithmetic::<f16>),
    },
    MicroKernel {
        name: "neon_fp16_elementwise",
        is_selected: |d| d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", float_arithmetic::<f16>),
    },
    MicroKernel {
        name: "neon_s16_elementwise",
        is_selected: |d| d.dt == DataType::S16,
        ukernel: Some(integer_arithmetic::<i16>),
    },
];

fn apply_f32(op: ArithmeticOperation, a: f32, b: f32) -> f32 {
    match op {
        ArithmeticOperation::Add => a + b,
        ArithmeticOperation::Sub => a - b,
        ArithmeticOperation::Mul => a * b,
        ArithmeticOperation::Div => a / b,
        ArithmeticOperation::Min => a.min(b),
        ArithmeticOperation::Max => a.max(b),
        ArithmeticOperation::SquaredDiff => (a - b) * (a - b),
        ArithmeticOperation::Power => a.powf(b),
        ArithmeticOperation::Prelu => {
            if a > 0.0 {
                a
            } else {
                a * b
            }
        }
    }
}

fn apply_i64(op: ArithmeticOperation, a: i64, b: i64) -> i64 {
    match op {
        ArithmeticOperation::Add => a + b,
        ArithmeticOperation::Sub => a - b,
        ArithmeticOperation::Mul => a * b,
        ArithmeticOperation::Div => {
            if b == 0 {
                0
            } else {
                (a as f64 / b as f64).floor() as i64
            }
        }
        ArithmeticOperation::Min => a.min(b),
        ArithmeticOperation::Max => a.max(b),
        ArithmeticOperation::SquaredDiff => (a - b) * (a - b),
        ArithmeticOperation::Power => (a as f64).powf(b as f64) as i64,
        ArithmeticOperation::Prelu => {
            if a > 0 {
                a
            } else {
                a * b
            }
        }
    }
}

trait Integer: bytemuck::Pod + Send + Sync + 'static {
    fn widen(self) -> i64;
    fn narrow(v: i64, policy: ConvertPolicy) -> Self;
}

macro_rules! impl_integer {
    ($t:ty) => {
        impl Integer for $t {
            #[inline]
            fn widen(self) -> i64 {
                self as i64
            }
            #[inline]
            fn narrow(v: i64, policy: ConvertPolicy) -> Self {
                match policy {
                    ConvertPolicy::Wrap => v as $t,
                    ConvertPolicy::Saturate => v.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t,
                }
            }
        }
    };
}

impl_integer!(i16);
impl_integer!(i32);

/// Coordinates of `c` in an operand of `shape`, broadcasting extent-1 axes.
#[inline]
fn broadcast_coords(c: &Coordinates, shape: &TensorShape) -> Coordinates {
    let mut out = *c;
    for (d, o) in out.iter_mut().enumerate().take(MAX_DIMS) {
        if shape[d] == 1 {
            *o = 0;
        }
    }
    out
}

/// Drives `f(a, b) -> out` over the window, dense or broadcast.
fn for_each_element<A, B, O>(
    src0: &Tensor,
    src1: &Tensor,
    dst: &Tensor,
    params: &ArithmeticParams,
    window: &Window,
    f: impl Fn(A, B) -> O,
) where
    A: bytemuck::Pod,
    B: bytemuck::Pod,
    O: bytemuck::Pod,
{
    if params.squashed {
        let x = window.x();
        for i in x.start()..x.end() {
            // SAFETY: the squashed window spans the shared dense element range.
            unsafe {
                let out = f(read_linear::<A>(src0, i), read_linear::<B>(src1, i));
                write_linear(dst, i, out);
            }
        }
        return;
    }
    let s0 = *src0.info().shape();
    let s1 = *src1.info().shape();
    window.for_each(|c| {
        // SAFETY: `c` lies inside dst; broadcast coordinates lie inside each operand.
        unsafe {
            let a = read::<A>(src0, &broadcast_coords(c, &s0));
            let b = read::<B>(src1, &broadcast_coords(c, &s1));
            write(dst, c, f(a, b));
        }
    });
}

fn float_arithmetic<T: Scalar>(src0: &Tensor, src1: &Tensor, dst: &Tensor, params: &ArithmeticParams, window: &Window) {
    let op = params.op;
    for_each_element(src0, src1, dst, params, window, |a: T, b: T| {
        T::from_f32(apply_f32(op, a.to_f32(), b.to_f32()))
    });
}

fn integer_arithmetic<T: Integer>(src0: &Tensor, src1: &Tensor, dst: &Tensor, params: &ArithmeticParams, window: &Window) {
    let (op, policy) = (params.op, params.policy);
    for_each_element(src0, src1, dst, params, window, |a: T, b: T| {
        T::narrow(apply_i64(op, a.widen(), b.widen()), policy)
    });
}

fn quantized_arithmetic<T: Quantized>(
    src0: &Tensor,
    src1: &Tensor,
    dst: &Tensor,
    params: &ArithmeticParams,
    window: &Window,
) {
    let q0 = src0.info().quantization_info().uniform();
    let q1 = src1.info().quantization_info().uniform();
    let qo = dst.info().quantization_info().uniform();
    let op = params.op;
    for_each_element(src0, src1, dst, params, window, |a: T, b: T| {
        T::quantize(apply_f32(op, a.dequantize(q0), b.dequantize(q1)), qo)
    });
}

fn allowed_types(op: ArithmeticOperation) -> &'static [DataType] {
    match op {
        ArithmeticOperation::Div => &[DataType::S32, DataType::F16, DataType::F32],
        ArithmeticOperation::Power => &[DataType::F16, DataType::F32],
        _ => &[
            DataType::QAsymm8,
            DataType::QAsymm8Signed,
            DataType::S16,
            DataType::F16,
            DataType::S32,
            DataType::F32,
        ],
    }
}

pub struct CpuArithmeticKernel {
    params: ArithmeticParams,
    run_method: ArithmeticUKernel,
    name: String,
    window: Window,
    split_dimension: usize,
    is_fp32: bool,
}

impl HasKernelTable for CpuArithmeticKernel {
    type Selector = ElementwiseSelectorData;
    type Ukernel = ArithmeticUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        ARITHMETIC_KERNELS
    }
}

impl CpuArithmeticKernel {
    pub fn validate(
        op: ArithmeticOperation,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &TensorInfo,
        cpu: &CpuInfo,
    ) -> Status {
        validate::cpu_f16_supported(OP, src0, cpu.has_fp16())?;
        validate::data_type_in(OP, src0, allowed_types(op))?;
        validate::matching_data_types(OP, src0, src1)?;

        let out_shape = TensorShape::broadcast_shape(&[*src0.shape(), *src1.shape()]);
        if out_shape.total_size() == 0 {
            return Err(ComputeError::invalid(
                OP,
                format!("{} and {} are not broadcast compatible", src0.shape(), src1.shape()),
            ));
        }
        if dst.is_initialised() {
            validate::matching_data_types(OP, src0, dst)?;
            if *dst.shape() != out_shape {
                return Err(ComputeError::MismatchingShapes {
                    op: OP,
                    expected: out_shape,
                    actual: *dst.shape(),
                });
            }
        }
        let selector = ElementwiseSelectorData {
            dt: src0.data_type(),
            op,
            isa: *cpu.isa(),
        };
        if select::<Self>(&selector, KernelSelectionType::Supported).is_none() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: format!("{op:?} on {}", src0.data_type()),
            });
        }
        Ok(())
    }

    pub fn configure(
        op: ArithmeticOperation,
        policy: ConvertPolicy,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &mut TensorInfo,
        cpu: &CpuInfo,
    ) -> Result<Self, ComputeError> {
        let out_shape = TensorShape::broadcast_shape(&[*src0.shape(), *src1.shape()]);
        dst.auto_init_like(out_shape, src0);
        Self::validate(op, src0, src1, dst, cpu)?;

        let selector = ElementwiseSelectorData {
            dt: src0.data_type(),
            op,
            isa: *cpu.isa(),
        };
        let uk = select::<Self>(&selector, KernelSelectionType::Supported).ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: src0.data_type().to_string(),
        })?;
        let run_method = uk.ukernel.ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: uk.name.to_string(),
        })?;

        let squashed = src0.shape() == src1.shape();
        let (window, split_dimension) = if squashed {
            calculate_squashed_or_max_window(src0)
        } else {
            (calculate_max_window(dst.shape(), Steps::default()), Window::DIM_Y)
        };
        tracing::debug!(kernel = uk.name, ?op, squashed, "configured arithmetic");

        Ok(Self {
            params: ArithmeticParams { op, policy, squashed },
            run_method,
            name: format!("{OP}/{}", uk.name),
            window,
            split_dimension,
            is_fp32: src0.data_type() == DataType::F32,
        })
    }

    pub fn op(&self) -> ArithmeticOperation {
        self.params.op
    }
}

impl CpuKernel for CpuArithmeticKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src0 = tensors.tensor(TensorType::Src0);
        let src1 = tensors.tensor(TensorType::Src1);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(src0, src1, dst, &self.params, window);
    }

    fn get_mws(&self, cpu: &CpuInfo, _threads: usize) -> usize {
        let model_mws = match cpu.model() {
            CpuModel::N1 if self.is_fp32 => Some(DEFAULT_MWS_N1_FP32),
            CpuModel::V1 if self.is_fp32 => Some(DEFAULT_MWS_V1_FP32),
            _ => None,
        };
        match model_mws {
            Some(mws) if self.window.shape().num_dimensions() == 1 => mws,
            Some(mws) => {
                // Spread the budget over the dimensions that are not split.
                let others = self.window.num_iterations_total() / self.window.num_iterations(Window::DIM_Y).max(1);
                (mws / others.max(1)).max(1)
            }
            None if self.split_dimension == Window::DIM_X => DEFAULT_MWS_OTHER_1D,
            None => 1,
        }
    }

    fn split_dimension(&self) -> usize {
        self.split_dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_info::CpuIsa;
    use std::sync::Arc;
    use tensor_core::QuantizationInfo;

    fn cpu() -> CpuInfo {
        CpuInfo::with_isa(CpuIsa::armv82_dot(), 1)
    }

    fn run(k: &CpuArithmeticKernel, a: Tensor, b: Tensor, dst: &Arc<Tensor>) {
        let pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::new(a))
            .with_const(TensorType::Src1, Arc::new(b))
            .with(TensorType::DST, Arc::clone(dst));
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
    }

    #[test]
    fn test_broadcast_add_fp32() {
        let a = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::F32);
        let b = TensorInfo::new(TensorShape::new(&[3]), DataType::F32);
        let mut d = TensorInfo::empty();
        let k = CpuArithmeticKernel::configure(ArithmeticOperation::Add, ConvertPolicy::Wrap, &a, &b, &mut d, &cpu())
            .unwrap();
        assert_eq!(d.shape(), &TensorShape::new(&[3, 2]));
        assert_eq!(k.split_dimension(), Window::DIM_Y);

        let dst = Arc::new(Tensor::new(d));
        run(
            &k,
            Tensor::from_slice(a, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            Tensor::from_slice(b, &[10.0f32, 20.0, 30.0]).unwrap(),
            &dst,
        );
        assert_eq!(dst.to_vec::<f32>(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_saturating_s16() {
        let a = TensorInfo::new(TensorShape::new(&[2]), DataType::S16);
        let mut d = TensorInfo::empty();
        let k = CpuArithmeticKernel::configure(
            ArithmeticOperation::Add,
            ConvertPolicy::Saturate,
            &a,
            &a,
            &mut d,
            &cpu(),
        )
        .unwrap();
        assert_eq!(k.split_dimension(), Window::DIM_X);
        let dst = Arc::new(Tensor::new(d));
        run(
            &k,
            Tensor::from_slice(a.clone(), &[i16::MAX, -5]).unwrap(),
            Tensor::from_slice(a, &[10i16, 2]).unwrap(),
            &dst,
        );
        assert_eq!(dst.to_vec::<i16>(), vec![i16::MAX, -3]);
    }

    #[test]
    fn test_quantized_max() {
        let q = QuantizationInfo::new(0.5, 10);
        let a = TensorInfo::new(TensorShape::new(&[2]), DataType::QAsymm8).with_quantization(q);
        let mut d = TensorInfo::empty();
        let k = CpuArithmeticKernel::configure(ArithmeticOperation::Max, ConvertPolicy::Wrap, &a, &a, &mut d, &cpu())
            .unwrap();
        assert!(k.name().ends_with("neon_qu8_elementwise"));
        let dst = Arc::new(Tensor::new(d));
        run(
            &k,
            Tensor::from_slice(a.clone(), &[12u8, 30]).unwrap(),
            Tensor::from_slice(a, &[20u8, 14]).unwrap(),
            &dst,
        );
        assert_eq!(dst.to_vec::<u8>(), vec![20, 30]);
    }

    #[test]
    fn test_rejects_incompatible_shapes_and_types() {
        let a = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::F32);
        let b = TensorInfo::new(TensorShape::new(&[2]), DataType::F32);
        assert!(CpuArithmeticKernel::validate(ArithmeticOperation::Add, &a, &b, &TensorInfo::empty(), &cpu()).is_err());
        let q = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::QAsymm8);
        let err =
            CpuArithmeticKernel::validate(ArithmeticOperation::Power, &q, &q, &TensorInfo::empty(), &cpu()).unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedDataType { .. }));
    }

    #[test]
    fn test_mws_depends_on_model() {
        let a = TensorInfo::new(TensorShape::new(&[64]), DataType::F32);
        let mut d = TensorInfo::empty();
        let k = CpuArithmeticKernel::configure(ArithmeticOperation::Add, ConvertPolicy::Wrap, &a, &a, &mut d, &cpu())
            .unwrap();
        let n1 = cpu().with_model(CpuModel::N1);
        assert_eq!(k.get_mws(&n1, 4), DEFAULT_MWS_N1_FP32);
        assert_eq!(k.get_mws(&cpu(), 4), DEFAULT_MWS_OTHER_1D);
    }
}
