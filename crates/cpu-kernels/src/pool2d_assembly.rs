// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depth-first NHWC pooling.
//!
//! Each window iteration produces every channel of one output pixel. The
//! channel accumulators live in a per-thread workspace bound to the
//! [`TensorType::Dst1`] slot, `C` floats per thread.

use crate::pool2d::{compute_pool_shape, effective_pool_size, pool_params, pool_region, PoolParams};
use crate::registry::{gated, select, AsmPoolingSelectorData, HasKernelTable, KernelSelectionType, MicroKernel};
use crate::scalar::{read, write, Quantized, Scalar};
use cpu_info::CpuInfo;
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, ComputeError, Coordinates, DataLayout, DataType, Dimension, PoolingLayerInfo, PoolingType,
    Size2D, Status, Steps, Tensor, TensorInfo, TensorPack, TensorType, Window,
};

const OP: &str = "CpuPool2dAssemblyWrapperKernel";

pub type AsmPoolingUKernel = fn(&Tensor, &Tensor, Option<&Tensor>, &PoolParams, &Window, &ThreadInfo);

fn is(d: &AsmPoolingSelectorData, dt: DataType, pool_type: PoolingType) -> bool {
    d.dt == dt && d.pool_type == pool_type
}

static ASM_POOLING_KERNELS: &[MicroKernel<AsmPoolingSelectorData, AsmPoolingUKernel>] = &[
    MicroKernel {
        name: "a64_fp32_nhwc_max_2x2_s1_output2x2_depthfirst",
        is_selected: |d| is(d, DataType::F32, PoolingType::Max) && d.pool_size == Size2D::new(2, 2) && d.stride == (1, 1),
        ukernel: Some(float_depthfirst::<f32>),
    },
    MicroKernel {
        name: "a64_fp32_nhwc_avg_3x3_s1_output2x2_depthfirst",
        is_selected: |d| is(d, DataType::F32, PoolingType::Avg) && d.pool_size == Size2D::new(3, 3) && d.stride == (1, 1),
        ukernel: Some(float_depthfirst::<f32>),
    },
    MicroKernel {
        name: "a64_fp16_nhwc_max_generic_depthfirst",
        is_selected: |d| is(d, DataType::F16, PoolingType::Max) && d.isa.fp16,
        ukernel: gated!("fp16", float_depthfirst::<f16>),
    },
    MicroKernel {
        name: "a64_fp16_nhwc_avg_generic_depthfirst",
        is_selected: |d| is(d, DataType::F16, PoolingType::Avg) && d.isa.fp16,
        ukernel: gated!("fp16", float_depthfirst::<f16>),
    },
    MicroKernel {
        name: "a64_fp32_nhwc_max_generic_depthfirst",
        is_selected: |d| is(d, DataType::F32, PoolingType::Max),
        ukernel: Some(float_depthfirst::<f32>),
    },
    MicroKernel {
        name: "a64_fp32_nhwc_avg_generic_depthfirst",
        is_selected: |d| is(d, DataType::F32, PoolingType::Avg),
        ukernel: Some(float_depthfirst::<f32>),
    },
    MicroKernel {
        name: "a64_u8q_nhwc_max_generic_depthfirst",
        is_selected: |d| is(d, DataType::QAsymm8, PoolingType::Max),
        ukernel: Some(quantized_depthfirst::<u8>),
    },
    MicroKernel {
        name: "a64_u8q_nhwc_avg_generic_depthfirst",
        is_selected: |d| is(d, DataType::QAsymm8, PoolingType::Avg),
        ukernel: Some(quantized_depthfirst::<u8>),
    },
    MicroKernel {
        name: "a64_s8q_nhwc_max_generic_depthfirst",
        is_selected: |d| is(d, DataType::QAsymm8Signed, PoolingType::Max),
        ukernel: Some(quantized_depthfirst::<i8>),
    },
    MicroKernel {
        name: "a64_s8q_nhwc_avg_generic_depthfirst",
        is_selected: |d| is(d, DataType::QAsymm8Signed, PoolingType::Avg),
        ukernel: Some(quantized_depthfirst::<i8>),
    },
];

fn depthfirst_core(
    dst: &Tensor,
    workspace: Option<&Tensor>,
    p: &PoolParams,
    window: &Window,
    info: &ThreadInfo,
    load: impl Fn(&Coordinates) -> f32,
    store: impl Fn(&Coordinates, f32),
) {
    let channels = dst.info().dimension(0);
    let mut local;
    let acc: &mut [f32] = match workspace {
        Some(t) if t.capacity() >= (info.thread_id + 1) * channels * 4 => {
            // SAFETY: each thread owns the `channels` floats at its own offset.
            unsafe { std::slice::from_raw_parts_mut(t.buffer().cast::<f32>().add(info.thread_id * channels), channels) }
        }
        _ => {
            local = vec![0.0f32; channels];
            local.as_mut_slice()
        }
    };
    let (w, h) = (p.src_w as isize, p.src_h as isize);
    let is_max = p.pool_type == PoolingType::Max;

    window.for_each(|c| {
        let r = pool_region(p, c[1], c[2]);
        acc.fill(if is_max { f32::NEG_INFINITY } else { 0.0 });
        let mut tap = *c;
        for y in r.y0.max(0)..r.y1.min(h) {
            for x in r.x0.max(0)..r.x1.min(w) {
                tap[1] = x as usize;
                tap[2] = y as usize;
                for (ch, a) in acc.iter_mut().enumerate() {
                    tap[0] = ch;
                    let v = load(&tap);
                    *a = if is_max { a.max(v) } else { *a + v };
                }
            }
        }
        let mut out = *c;
        for (ch, a) in acc.iter().enumerate() {
            out[0] = ch;
            store(&out, if is_max { *a } else { *a / r.divisor });
        }
    });
}

fn float_depthfirst<T: Scalar>(
    src: &Tensor,
    dst: &Tensor,
    workspace: Option<&Tensor>,
    p: &PoolParams,
    window: &Window,
    info: &ThreadInfo,
) {
    depthfirst_core(
        dst,
        workspace,
        p,
        window,
        info,
        // SAFETY: taps are clipped to the source extent.
        |c| unsafe { read::<T>(src, c) }.to_f32(),
        // SAFETY: `c` is an output coordinate of this window.
        |c, v| unsafe { write(dst, c, T::from_f32(v)) },
    );
}

fn quantized_depthfirst<T: Quantized>(
    src: &Tensor,
    dst: &Tensor,
    workspace: Option<&Tensor>,
    p: &PoolParams,
    window: &Window,
    info: &ThreadInfo,
) {
    let qi = src.info().quantization_info().uniform();
    let qo = dst.info().quantization_info().uniform();
    depthfirst_core(
        dst,
        workspace,
        p,
        window,
        info,
        // SAFETY: as float_depthfirst.
        |c| unsafe { read::<T>(src, c) }.dequantize(qi),
        // SAFETY: as float_depthfirst.
        |c, v| unsafe { write(dst, c, T::quantize(v, qo)) },
    );
}

/// NHWC pooling through the depth-first micro-kernels.
pub struct CpuPool2dAssemblyWrapperKernel {
    params: PoolParams,
    run_method: AsmPoolingUKernel,
    name: String,
    window: Window,
    split_dimension: usize,
    channels: usize,
}

impl HasKernelTable for CpuPool2dAssemblyWrapperKernel {
    type Selector = AsmPoolingSelectorData;
    type Ukernel = AsmPoolingUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        ASM_POOLING_KERNELS
    }
}

impl CpuPool2dAssemblyWrapperKernel {
    fn selector(src: &TensorInfo, info: &PoolingLayerInfo, cpu: &CpuInfo) -> AsmPoolingSelectorData {
        AsmPoolingSelectorData {
            dt: src.data_type(),
            pool_type: info.pool_type,
            pool_size: effective_pool_size(src, info),
            stride: (info.pad_stride_info.stride_x, info.pad_stride_info.stride_y),
            isa: *cpu.isa(),
        }
    }

    pub fn validate(src: &TensorInfo, dst: &TensorInfo, info: &PoolingLayerInfo, cpu: &CpuInfo) -> Status {
        validate::initialised(OP, src)?;
        validate::layout_in(OP, src, &[DataLayout::Nhwc])?;
        validate::cpu_f16_supported(OP, src, cpu.has_fp16())?;
        validate::data_type_in(
            OP,
            src,
            &[DataType::F32, DataType::F16, DataType::QAsymm8, DataType::QAsymm8Signed],
        )?;
        if info.use_kernel_indices {
            return Err(ComputeError::unsupported(OP, "kernel indices"));
        }
        let pool = effective_pool_size(src, info);
        if pool.width == 0 || pool.height == 0 {
            return Err(ComputeError::invalid(OP, "pool size must be non-zero"));
        }
        let out_shape = compute_pool_shape(src, info)?;
        if src.data_type().is_quantized() {
            if info.pool_type == PoolingType::Avg && !info.exclude_padding && info.pad_stride_info.has_padding() {
                return Err(ComputeError::unsupported(
                    OP,
                    "quantized average pooling over padding needs exclude_padding",
                ));
            }
            if info.pool_type == PoolingType::Max && dst.is_initialised() {
                validate::matching_quantization(OP, src, dst)?;
            }
        }
        if dst.is_initialised() {
            validate::matching_data_types(OP, src, dst)?;
            if *dst.shape() != out_shape {
                return Err(ComputeError::MismatchingShapes {
                    op: OP,
                    expected: out_shape,
                    actual: *dst.shape(),
                });
            }
        }
        if select::<Self>(&Self::selector(src, info, cpu), KernelSelectionType::Supported).is_none() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: format!("{} {:?} pooling", src.data_type(), info.pool_type),
            });
        }
        Ok(())
    }

    /// Whether the depth-first path can run this configuration.
    pub fn is_supported(src: &TensorInfo, dst: &TensorInfo, info: &PoolingLayerInfo, cpu: &CpuInfo) -> bool {
        Self::validate(src, dst, info, cpu).is_ok()
    }

    pub fn configure(
        src: &TensorInfo,
        dst: &mut TensorInfo,
        info: &PoolingLayerInfo,
        cpu: &CpuInfo,
    ) -> Result<Self, ComputeError> {
        dst.auto_init_like(compute_pool_shape(src, info)?, src);
        Self::validate(src, dst, info, cpu)?;
        let uk = select::<Self>(&Self::selector(src, info, cpu), KernelSelectionType::Supported).ok_or(
            ComputeError::NoMicroKernel {
                op: OP,
                detail: src.data_type().to_string(),
            },
        )?;
        let run_method = uk.ukernel.ok_or(ComputeError::NoMicroKernel {
            op: OP,
            detail: uk.name.to_string(),
        })?;

        let mut window = calculate_max_window(dst.shape(), Steps::default());
        window.set(Window::DIM_X, Dimension::new(0, 1, 1));
        let split_dimension = if window.num_iterations(Window::DIM_Y) > 1 {
            Window::DIM_Y
        } else {
            Window::DIM_Z
        };
        tracing::debug!(kernel = uk.name, "configured depth-first pooling");
        Ok(Self {
            params: pool_params(src, info, 1),
            run_method,
            name: format!("{OP}/{}", uk.name),
            window,
            split_dimension,
            channels: dst.dimension(0),
        })
    }

    /// Workspace bytes for `num_threads` workers.
    pub fn get_working_size(&self, num_threads: usize) -> usize {
        self.channels * std::mem::size_of::<f32>() * num_threads.max(1)
    }
}

impl CpuKernel for CpuPool2dAssemblyWrapperKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        let workspace = tensors.get_tensor(TensorType::Dst1).map(|t| &**t);
        (self.run_method)(src, dst, workspace, &self.params, window, info);
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
    use tensor_core::{PadStrideInfo, QuantizationInfo, TensorShape};

    fn cpu() -> CpuInfo {
        CpuInfo::with_isa(CpuIsa::armv82_dot(), 2)
    }

    fn nhwc(shape: &[usize], dt: DataType) -> TensorInfo {
        TensorInfo::new(TensorShape::new(shape), dt).with_layout(DataLayout::Nhwc)
    }

    #[test]
    fn test_selects_specialised_then_generic() {
        let src = nhwc(&[2, 4, 4], DataType::F32);
        let max2 = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 0, 0), false);
        let mut d = TensorInfo::empty();
        let k = CpuPool2dAssemblyWrapperKernel::configure(&src, &mut d, &max2, &cpu()).unwrap();
        assert_eq!(k.name(), "CpuPool2dAssemblyWrapperKernel/a64_fp32_nhwc_max_2x2_s1_output2x2_depthfirst");
        let max2s2 = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nhwc, PadStrideInfo::new(2, 2, 0, 0), false);
        let mut d = TensorInfo::empty();
        let k = CpuPool2dAssemblyWrapperKernel::configure(&src, &mut d, &max2s2, &cpu()).unwrap();
        assert_eq!(k.name(), "CpuPool2dAssemblyWrapperKernel/a64_fp32_nhwc_max_generic_depthfirst");
        assert_eq!(k.get_working_size(4), 2 * 4 * 4);
    }

    #[test]
    fn test_rejects_unsupported() {
        let src = nhwc(&[2, 4, 4], DataType::F32);
        let l2 = PoolingLayerInfo::new(PoolingType::L2, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 0, 0), false);
        assert!(!CpuPool2dAssemblyWrapperKernel::is_supported(&src, &TensorInfo::empty(), &l2, &cpu()));
        let mut indices = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 0, 0), false);
        indices.use_kernel_indices = true;
        assert!(!CpuPool2dAssemblyWrapperKernel::is_supported(&src, &TensorInfo::empty(), &indices, &cpu()));
        let nchw = TensorInfo::new(TensorShape::new(&[4, 4, 2]), DataType::F32);
        let max = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nchw, PadStrideInfo::new(1, 1, 0, 0), false);
        assert!(!CpuPool2dAssemblyWrapperKernel::is_supported(&nchw, &TensorInfo::empty(), &max, &cpu()));
    }

    #[test]
    fn test_avg_per_channel_with_workspace_split() {
        // C=2, W=2, H=2; channel 1 is channel 0 times ten.
        let src_info = nhwc(&[2, 2, 2], DataType::F32);
        let info = PoolingLayerInfo::new(PoolingType::Avg, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 1, 1), true);
        let mut d = TensorInfo::empty();
        let k = CpuPool2dAssemblyWrapperKernel::configure(&src_info, &mut d, &info, &cpu()).unwrap();
        assert_eq!(d.shape(), &TensorShape::new(&[2, 3, 3]));

        let values = [1.0f32, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0];
        let ws_info = TensorInfo::new(TensorShape::new(&[k.get_working_size(2)]), DataType::U8);
        let dst = Arc::new(Tensor::new(d));
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(src_info, &values).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst))
            .with(TensorType::Dst1, Arc::new(Tensor::new(ws_info)));
        for id in 0..2 {
            let win = k.window().split_window(k.split_dimension(), id, 2);
            k.run_op(&pack, &win, &ThreadInfo { thread_id: id, num_threads: 2 });
        }
        let out = dst.to_vec::<f32>();
        assert_eq!(&out[8..10], &[2.5, 25.0]);
        assert_eq!(&out[0..2], &[1.0, 10.0]);
    }

    #[test]
    fn test_quantized_max() {
        let q = QuantizationInfo::new(0.5, 10);
        let src_info = nhwc(&[1, 2, 2], DataType::QAsymm8).with_quantization(q.clone());
        let info = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 0, 0), false);
        let mut d = TensorInfo::empty();
        let k = CpuPool2dAssemblyWrapperKernel::configure(&src_info, &mut d, &info, &cpu()).unwrap();
        assert_eq!(d.quantization_info(), &q);
        let dst = Arc::new(Tensor::new(d));
        let pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(Tensor::from_slice(src_info, &[3u8, 200, 17, 5]).unwrap()))
            .with(TensorType::DST, Arc::clone(&dst));
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
        assert_eq!(dst.to_vec::<u8>(), vec![200]);
    }
}
