// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise activation over a squashed 1-D window.

use crate::registry::{gated, select, DataTypeIsaSelectorData, HasKernelTable, KernelSelectionType, MicroKernel};
use crate::scalar::{read_linear, write_linear, Quantized, Scalar};
use cpu_info::CpuInfo;
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_squashed_or_max_window, ActivationFunction, ActivationLayerInfo, ComputeError, DataType,
    QuantizationInfo, Status, Tensor, TensorInfo, TensorPack, TensorType, Window,
};

const OP: &str = "CpuActivationKernel";

/// Minimum workload per thread when the window was squashed to 1-D.
const DEFAULT_MWS_1D: usize = 1536;

pub type ActivationUKernel = fn(&Tensor, &Tensor, &ActivationLayerInfo, &Window);

static ACTIVATION_KERNELS: &[MicroKernel<DataTypeIsaSelectorData, ActivationUKernel>] = &[
    MicroKernel {
        name: "sve_fp16_activation",
        is_selected: |d| d.dt == DataType::F16 && d.isa.sve && d.isa.fp16,
        ukernel: gated!("sve", float_activation::<f16>),
    },
    MicroKernel {
        name: "sve_fp32_activation",
        is_selected: |d| d.dt == DataType::F32 && d.isa.sve,
        ukernel: gated!("sve", float_activation::<f32>),
    },
    MicroKernel {
        name: "sve2_qu8_activation",
        is_selected: |d| d.dt == DataType::QAsymm8 && d.isa.sve2,
        ukernel: gated!("sve2", quantized_activation::<u8>),
    },
    MicroKernel {
        name: "sve2_qs8_activation",
        is_selected: |d| d.dt == DataType::QAsymm8Signed && d.isa.sve2,
        ukernel: gated!("sve2", quantized_activation::<i8>),
    },
    MicroKernel {
        name: "neon_fp16_activation",
        is_selected: |d| d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", float_activation::<f16>),
    },
    MicroKernel {
        name: "neon_fp32_activation",
        is_selected: |d| d.dt == DataType::F32,
        ukernel: Some(float_activation::<f32>),
    },
    MicroKernel {
        name: "neon_qu8_activation",
        is_selected: |d| d.dt == DataType::QAsymm8,
        ukernel: Some(quantized_activation::<u8>),
    },
    MicroKernel {
        name: "neon_qs8_activation",
        is_selected: |d| d.dt == DataType::QAsymm8Signed,
        ukernel: Some(quantized_activation::<i8>),
    },
    MicroKernel {
        name: "neon_qs16_activation",
        is_selected: |d| d.dt == DataType::QSymm16,
        ukernel: Some(quantized_activation::<i16>),
    },
];

fn float_activation<T: Scalar>(src: &Tensor, dst: &Tensor, act: &ActivationLayerInfo, window: &Window) {
    let x = window.x();
    for i in x.start()..x.end() {
        // SAFETY: the squashed window spans the dense element range of both tensors.
        unsafe {
            let v = read_linear::<T>(src, i).to_f32();
            write_linear(dst, i, T::from_f32(act.apply(v)));
        }
    }
}

fn quantized_activation<T: Quantized>(src: &Tensor, dst: &Tensor, act: &ActivationLayerInfo, window: &Window) {
    let qi = src.info().quantization_info().uniform();
    let qo = dst.info().quantization_info().uniform();
    let x = window.x();
    for i in x.start()..x.end() {
        // SAFETY: as float_activation.
        unsafe {
            let v = read_linear::<T>(src, i).dequantize(qi);
            write_linear(dst, i, T::quantize(act.apply(v), qo));
        }
    }
}

/// Functions the quantized paths implement.
fn quantized_supported(dt: DataType, f: ActivationFunction) -> bool {
    use ActivationFunction::*;
    match dt {
        DataType::QAsymm8 | DataType::QAsymm8Signed => matches!(
            f,
            Relu | BoundedRelu | LuBoundedRelu | Logistic | Tanh | HardSwish | LeakyRelu | Identity | Gelu
        ),
        DataType::QSymm16 => matches!(f, Logistic | Tanh | Identity),
        _ => true,
    }
}

/// Output quantization a quantized `Logistic`/`Tanh` must use.
fn fixed_output_qinfo(dt: DataType, f: ActivationFunction) -> Option<QuantizationInfo> {
    match (dt, f) {
        (DataType::QAsymm8, ActivationFunction::Tanh) => Some(QuantizationInfo::new(1.0 / 128.0, 128)),
        (DataType::QAsymm8, ActivationFunction::Logistic) => Some(QuantizationInfo::new(1.0 / 256.0, 0)),
        (DataType::QAsymm8Signed, ActivationFunction::Tanh) => Some(QuantizationInfo::new(1.0 / 128.0, 0)),
        (DataType::QAsymm8Signed, ActivationFunction::Logistic) => Some(QuantizationInfo::new(1.0 / 256.0, -128)),
        (DataType::QSymm16, ActivationFunction::Tanh | ActivationFunction::Logistic) => {
            Some(QuantizationInfo::new(1.0 / 32768.0, 0))
        }
        _ => None,
    }
}

pub struct CpuActivationKernel {
    act_info: ActivationLayerInfo,
    run_method: ActivationUKernel,
    name: String,
    window: Window,
    split_dimension: usize,
}

impl HasKernelTable for CpuActivationKernel {
    type Selector = DataTypeIsaSelectorData;
    type Ukernel = ActivationUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        ACTIVATION_KERNELS
    }
}

impl CpuActivationKernel {
    /// Checks `src`/`dst` against `act`. An uninitialised `dst` is accepted.
    pub fn validate(src: &TensorInfo, dst: &TensorInfo, act: &ActivationLayerInfo, cpu: &CpuInfo) -> Status {
        validate::cpu_f16_supported(OP, src, cpu.has_fp16())?;
        validate::data_type_in(
            OP,
            src,
            &[
                DataType::QAsymm8,
                DataType::QAsymm8Signed,
                DataType::QSymm16,
                DataType::F16,
                DataType::F32,
            ],
        )?;
        let selector = DataTypeIsaSelectorData {
            dt: src.data_type(),
            isa: *cpu.isa(),
        };
        if select::<Self>(&selector, KernelSelectionType::Supported).is_none() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: format!("{} on [{}]", src.data_type(), cpu.isa()),
            });
        }
        let Some(func) = act.activation() else {
            return Ok(());
        };
        if !quantized_supported(src.data_type(), func) {
            return Err(ComputeError::unsupported(
                OP,
                format!("{func:?} on {}", src.data_type()),
            ));
        }
        if dst.is_initialised() {
            validate::matching_shapes(OP, src, dst)?;
            validate::matching_data_types(OP, src, dst)?;
            if let Some(expected) = fixed_output_qinfo(src.data_type(), func) {
                if dst.quantization_info() != &expected {
                    return Err(ComputeError::MismatchingQuantization {
                        op: OP,
                        detail: format!(
                            "{func:?} requires output {:?}, got {:?}",
                            expected.uniform(),
                            dst.quantization_info().uniform()
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Configures the kernel, initialising `dst` from `src` if it is empty.
    pub fn configure(
        src: &TensorInfo,
        dst: &mut TensorInfo,
        act: ActivationLayerInfo,
        cpu: &CpuInfo,
    ) -> Result<Self, ComputeError> {
        if !dst.is_initialised() {
            let qinfo = act
                .activation()
                .and_then(|f| fixed_output_qinfo(src.data_type(), f))
                .unwrap_or_else(|| src.quantization_info().clone());
            dst.auto_init_if_empty(*src.shape(), src.data_type(), qinfo);
        }
        Self::validate(src, dst, &act, cpu)?;

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
        let (window, split_dimension) = calculate_squashed_or_max_window(src);
        tracing::debug!(kernel = uk.name, dtype = %src.data_type(), "configured activation");

        Ok(Self {
            act_info: act,
            run_method,
            name: format!("{OP}/{}", uk.name),
            window,
            split_dimension,
        })
    }

    pub fn activation_info(&self) -> &ActivationLayerInfo {
        &self.act_info
    }
}

impl CpuKernel for CpuActivationKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        (self.run_method)(src, dst, &self.act_info, window);
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

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_info::CpuIsa;
    use std::sync::Arc;
    use tensor_core::TensorShape;

    fn cpu() -> CpuInfo {
        CpuInfo::with_isa(CpuIsa::armv82_dot(), 1)
    }

    #[test]
    fn test_relu_fp32() {
        let info = TensorInfo::new(TensorShape::new(&[4]), DataType::F32);
        let mut dst_info = TensorInfo::empty();
        let act = ActivationLayerInfo::new(ActivationFunction::Relu, 0.0, 0.0);
        let k = CpuActivationKernel::configure(&info, &mut dst_info, act, &cpu()).unwrap();
        assert_eq!(k.name(), "CpuActivationKernel/neon_fp32_activation");
        assert_eq!(k.split_dimension(), Window::DIM_X);
        assert_eq!(k.get_mws(&cpu(), 4), DEFAULT_MWS_1D);

        let src = Arc::new(Tensor::from_slice(info, &[-1.0f32, 2.0, -3.0, 4.0]).unwrap());
        let dst = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new().with_const(TensorType::SRC, src).with(TensorType::DST, Arc::clone(&dst));
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
        assert_eq!(dst.to_vec::<f32>(), vec![0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_quantized_logistic_output_qinfo() {
        let info = TensorInfo::new(TensorShape::new(&[2]), DataType::QAsymm8)
            .with_quantization(QuantizationInfo::new(0.1, 128));
        let mut dst = TensorInfo::empty();
        let act = ActivationLayerInfo::new(ActivationFunction::Logistic, 0.0, 0.0);
        CpuActivationKernel::configure(&info, &mut dst, act, &cpu()).unwrap();
        assert_eq!(dst.quantization_info(), &QuantizationInfo::new(1.0 / 256.0, 0));

        let bad = info.clone().with_quantization(QuantizationInfo::new(0.5, 3));
        let err = CpuActivationKernel::validate(&info, &bad, &act, &cpu()).unwrap_err();
        assert!(matches!(err, ComputeError::MismatchingQuantization { .. }));
    }

    #[test]
    fn test_qsymm16_rejects_relu() {
        let info = TensorInfo::new(TensorShape::new(&[2]), DataType::QSymm16)
            .with_quantization(QuantizationInfo::new(0.1, 0));
        let act = ActivationLayerInfo::new(ActivationFunction::Relu, 0.0, 0.0);
        assert!(CpuActivationKernel::validate(&info, &TensorInfo::empty(), &act, &cpu()).is_err());
    }

    #[test]
    fn test_f16_requires_extension() {
        let info = TensorInfo::new(TensorShape::new(&[2]), DataType::F16);
        let act = ActivationLayerInfo::new(ActivationFunction::Relu, 0.0, 0.0);
        let plain = CpuInfo::with_isa(CpuIsa::default(), 1);
        let err = CpuActivationKernel::validate(&info, &TensorInfo::empty(), &act, &plain).unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedExtension { .. }));
    }
}
