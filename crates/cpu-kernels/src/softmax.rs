// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Row softmax and log-softmax along dimension 0.
//!
//! Each window iteration along x covers a whole row. Quantized rows are
//! dequantized into a per-thread `f32` scratch row taken from the
//! [`TensorType::Dst1`] slot of the pack.

use crate::registry::{gated, select, HasKernelTable, KernelSelectionType, MicroKernel, SoftmaxSelectorData};
use crate::scalar::{read, write, Quantized, Scalar};
use cpu_info::CpuInfo;
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, softmax_output_quantization_info, ComputeError, DataType, Dimension, Status,
    Steps, Tensor, TensorInfo, TensorPack, TensorType, Window,
};

const OP: &str = "CpuSoftmaxKernel";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftmaxParams {
    pub beta: f32,
    pub is_log: bool,
}

pub type SoftmaxUKernel = fn(&Tensor, &Tensor, Option<&Tensor>, &SoftmaxParams, &Window, &ThreadInfo);

static SOFTMAX_KERNELS: &[MicroKernel<SoftmaxSelectorData, SoftmaxUKernel>] = &[
    MicroKernel {
        name: "sme2_fp32_softmax",
        is_selected: |d| d.dt == DataType::F32 && d.isa.sme2 && !d.is_log,
        ukernel: gated!("sme2", float_softmax::<f32>),
    },
    MicroKernel {
        name: "neon_fp32_softmax",
        is_selected: |d| d.dt == DataType::F32,
        ukernel: Some(float_softmax::<f32>),
    },
    MicroKernel {
        name: "neon_fp16_softmax",
        is_selected: |d| d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", float_softmax::<f16>),
    },
    MicroKernel {
        name: "sve2_qu8_softmax",
        is_selected: |d| d.dt == DataType::QAsymm8 && d.isa.sve2,
        ukernel: gated!("sve2", quantized_softmax::<u8>),
    },
    MicroKernel {
        name: "sve2_qs8_softmax",
        is_selected: |d| d.dt == DataType::QAsymm8Signed && d.isa.sve2,
        ukernel: gated!("sve2", quantized_softmax::<i8>),
    },
    MicroKernel {
        name: "neon_qu8_softmax",
        is_selected: |d| d.dt == DataType::QAsymm8,
        ukernel: Some(quantized_softmax::<u8>),
    },
    MicroKernel {
        name: "neon_qs8_softmax",
        is_selected: |d| d.dt == DataType::QAsymm8Signed,
        ukernel: Some(quantized_softmax::<i8>),
    },
];

/// Normalises `row` in place: `exp(beta * (x - max)) / sum`, or its log.
fn softmax_row(row: &mut [f32], params: &SoftmaxParams) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in row.iter_mut() {
        *v = (*v - max) * params.beta;
        sum += v.exp();
    }
    if params.is_log {
        let log_sum = sum.ln();
        for v in row.iter_mut() {
            *v -= log_sum;
        }
    } else {
        let inv = 1.0 / sum;
        for v in row.iter_mut() {
            *v = v.exp() * inv;
        }
    }
}

fn float_softmax<T: Scalar>(
    src: &Tensor,
    dst: &Tensor,
    _tmp: Option<&Tensor>,
    params: &SoftmaxParams,
    window: &Window,
    _info: &ThreadInfo,
) {
    let len = src.info().dimension(0);
    let mut row = vec![0.0f32; len];
    window.for_each(|c| {
        let mut at = *c;
        for (x, v) in row.iter_mut().enumerate() {
            at[0] = x;
            // SAFETY: `at` walks one row inside src.
            *v = unsafe { read::<T>(src, &at) }.to_f32();
        }
        softmax_row(&mut row, params);
        for (x, v) in row.iter().enumerate() {
            at[0] = x;
            // SAFETY: dst has src's shape; the row belongs to this window.
            unsafe { write(dst, &at, T::from_f32(*v)) };
        }
    });
}

fn quantized_softmax<T: Quantized>(
    src: &Tensor,
    dst: &Tensor,
    tmp: Option<&Tensor>,
    params: &SoftmaxParams,
    window: &Window,
    info: &ThreadInfo,
) {
    let len = src.info().dimension(0);
    let qi = src.info().quantization_info().uniform();
    let qo = dst.info().quantization_info().uniform();
    let mut local;
    let row: &mut [f32] = match tmp {
        Some(t) if t.capacity() >= (info.thread_id + 1) * len * 4 => {
            // SAFETY: each thread owns the `len` floats at its own offset.
            unsafe { std::slice::from_raw_parts_mut(t.buffer().cast::<f32>().add(info.thread_id * len), len) }
        }
        _ => {
            local = vec![0.0f32; len];
            local.as_mut_slice()
        }
    };
    window.for_each(|c| {
        let mut at = *c;
        for (x, v) in row.iter_mut().enumerate() {
            at[0] = x;
            // SAFETY: as float_softmax.
            *v = unsafe { read::<T>(src, &at) }.dequantize(qi);
        }
        softmax_row(row, params);
        for (x, v) in row.iter().enumerate() {
            at[0] = x;
            // SAFETY: as float_softmax.
            unsafe { write(dst, &at, T::quantize(*v, qo)) };
        }
    });
}

pub struct CpuSoftmaxKernel {
    params: SoftmaxParams,
    run_method: SoftmaxUKernel,
    name: String,
    window: Window,
    row_len: usize,
}

impl HasKernelTable for CpuSoftmaxKernel {
    type Selector = SoftmaxSelectorData;
    type Ukernel = SoftmaxUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        SOFTMAX_KERNELS
    }
}

impl CpuSoftmaxKernel {
    pub fn validate(src: &TensorInfo, dst: &TensorInfo, beta: f32, is_log: bool, cpu: &CpuInfo) -> Status {
        validate::cpu_f16_supported(OP, src, cpu.has_fp16())?;
        validate::data_type_in(
            OP,
            src,
            &[DataType::QAsymm8, DataType::QAsymm8Signed, DataType::F16, DataType::F32],
        )?;
        if !beta.is_finite() || beta <= 0.0 {
            return Err(ComputeError::invalid(OP, format!("beta must be positive, got {beta}")));
        }
        if dst.is_initialised() {
            validate::matching_data_types(OP, src, dst)?;
            validate::matching_shapes(OP, src, dst)?;
            if src.data_type().is_quantized_asymmetric() {
                let expected = softmax_output_quantization_info(src.data_type(), is_log);
                if dst.quantization_info() != &expected {
                    return Err(ComputeError::MismatchingQuantization {
                        op: OP,
                        detail: format!(
                            "output must be {:?}, got {:?}",
                            expected.uniform(),
                            dst.quantization_info().uniform()
                        ),
                    });
                }
            }
        }
        let selector = SoftmaxSelectorData {
            dt: src.data_type(),
            is_log,
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

    pub fn configure(
        src: &TensorInfo,
        dst: &mut TensorInfo,
        beta: f32,
        is_log: bool,
        cpu: &CpuInfo,
    ) -> Result<Self, ComputeError> {
        let qinfo = if src.data_type().is_quantized_asymmetric() {
            softmax_output_quantization_info(src.data_type(), is_log)
        } else {
            src.quantization_info().clone()
        };
        if dst.auto_init_if_empty(*src.shape(), src.data_type(), qinfo) {
            *dst = dst.clone().with_layout(src.data_layout());
        }
        Self::validate(src, dst, beta, is_log, cpu)?;

        let selector = SoftmaxSelectorData {
            dt: src.data_type(),
            is_log,
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

        let mut window = calculate_max_window(src.shape(), Steps::default());
        window.set(Window::DIM_X, Dimension::new(0, 1, 1));
        tracing::debug!(kernel = uk.name, beta, is_log, "configured softmax");

        Ok(Self {
            params: SoftmaxParams { beta, is_log },
            run_method,
            name: format!("{OP}/{}", uk.name),
            window,
            row_len: src.dimension(0),
        })
    }

    /// Bytes of `f32` scratch the quantized path wants per thread.
    pub fn scratch_bytes_per_thread(&self) -> usize {
        self.row_len * std::mem::size_of::<f32>()
    }
}

impl CpuKernel for CpuSoftmaxKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        let tmp = tensors.get_tensor(TensorType::Dst1).map(|t| &**t);
        (self.run_method)(src, dst, tmp, &self.params, window, info);
    }
}
