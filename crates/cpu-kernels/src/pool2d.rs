// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 2-D max/average/L2 pooling for NCHW and NHWC tensors.
//!
//! NCHW micro-kernels read from a copy of the source whose border was
//! filled by [`CpuFillBorderKernel`](crate::CpuFillBorderKernel): replicate
//! for max pooling, the quantization zero-point (or 0) otherwise. NHWC
//! micro-kernels read the source directly and skip out-of-bounds taps.

use crate::registry::{gated, select, HasKernelTable, KernelSelectionType, MicroKernel, PoolingSelectorData};
use crate::scalar::{read, write, Quantized, Scalar};
use cpu_info::CpuInfo;
use half::f16;
use runtime::{CpuKernel, ThreadInfo};
use tensor_core::validate;
use tensor_core::{
    calculate_max_window, scaled_dimensions, BorderMode, BorderSize, ComputeError, Coordinates, DataLayout,
    DataLayoutDimension, DataType, PoolingLayerInfo, PoolingType, Size2D, Status, Steps, Tensor, TensorInfo,
    TensorPack, TensorShape, TensorType, Window,
};

const OP: &str = "CpuPool2dKernel";

/// Geometry and reduction of a configured pooling.
#[derive(Debug, Clone)]
pub struct PoolParams {
    pub pool_type: PoolingType,
    pub pool_size: Size2D,
    pub stride_x: usize,
    pub stride_y: usize,
    pub border: BorderSize,
    pub exclude_padding: bool,
    pub src_w: usize,
    pub src_h: usize,
    pub idx_w: usize,
    pub idx_h: usize,
    /// The source in the pack carries a filled border of `border` elements.
    pub padded: bool,
    /// Output elements along x produced per window iteration.
    pub step_x: usize,
    /// Descriptor of the unpadded source, for kernel indices.
    pub src_info: TensorInfo,
}

pub type PoolingUKernel = fn(&Tensor, &Tensor, Option<&Tensor>, &PoolParams, &Window);

fn square(d: &PoolingSelectorData, size: usize) -> bool {
    d.pool_size.width == d.pool_size.height && d.pool_size.width == size
}

static POOLING_KERNELS: &[MicroKernel<PoolingSelectorData, PoolingUKernel>] = &[
    MicroKernel {
        name: "neon_qu8_nhwc_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nhwc && d.dt == DataType::QAsymm8,
        ukernel: Some(quantized_pool::<u8>),
    },
    MicroKernel {
        name: "neon_qs8_nhwc_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nhwc && d.dt == DataType::QAsymm8Signed,
        ukernel: Some(quantized_pool::<i8>),
    },
    MicroKernel {
        name: "neon_fp16_nhwc_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nhwc && d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", float_pool::<f16>),
    },
    MicroKernel {
        name: "neon_fp32_nhwc_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nhwc && d.dt == DataType::F32,
        ukernel: Some(float_pool::<f32>),
    },
    MicroKernel {
        name: "neon_qu8_nchw_pool2",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::QAsymm8 && square(d, 2) && d.pool_stride_x < 3,
        ukernel: Some(quantized_pool::<u8>),
    },
    MicroKernel {
        name: "neon_qu8_nchw_pool3",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::QAsymm8 && square(d, 3) && d.pool_stride_x < 3,
        ukernel: Some(quantized_pool::<u8>),
    },
    MicroKernel {
        name: "neon_qu8_nchw_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::QAsymm8,
        ukernel: Some(quantized_pool::<u8>),
    },
    MicroKernel {
        name: "neon_qs8_nchw_pool2",
        is_selected: |d| {
            d.dl == DataLayout::Nchw && d.dt == DataType::QAsymm8Signed && square(d, 2) && d.pool_stride_x < 3
        },
        ukernel: Some(quantized_pool::<i8>),
    },
    MicroKernel {
        name: "neon_qs8_nchw_pool3",
        is_selected: |d| {
            d.dl == DataLayout::Nchw && d.dt == DataType::QAsymm8Signed && square(d, 3) && d.pool_stride_x < 3
        },
        ukernel: Some(quantized_pool::<i8>),
    },
    MicroKernel {
        name: "neon_qs8_nchw_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::QAsymm8Signed,
        ukernel: Some(quantized_pool::<i8>),
    },
    MicroKernel {
        name: "neon_fp16_nchw_pool2",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F16 && d.isa.fp16 && square(d, 2),
        ukernel: gated!("fp16", float_pool::<f16>),
    },
    MicroKernel {
        name: "neon_fp16_nchw_pool3",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F16 && d.isa.fp16 && square(d, 3),
        ukernel: gated!("fp16", float_pool::<f16>),
    },
    MicroKernel {
        name: "neon_fp16_nchw_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F16 && d.isa.fp16,
        ukernel: gated!("fp16", float_pool::<f16>),
    },
    MicroKernel {
        name: "neon_fp32_nchw_pool2",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F32 && square(d, 2),
        ukernel: Some(float_pool::<f32>),
    },
    MicroKernel {
        name: "neon_fp32_nchw_pool3",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F32 && square(d, 3),
        ukernel: Some(float_pool::<f32>),
    },
    MicroKernel {
        name: "neon_fp32_nchw_pool7",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F32 && square(d, 7),
        ukernel: Some(float_pool::<f32>),
    },
    MicroKernel {
        name: "neon_fp32_nchw_poolMxN",
        is_selected: |d| d.dl == DataLayout::Nchw && d.dt == DataType::F32,
        ukernel: Some(float_pool::<f32>),
    },
];

/// Taps of one output element, in unpadded source coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PoolRegion {
    pub x0: isize,
    pub x1: isize,
    pub y0: isize,
    pub y1: isize,
    /// Element count the average divides by.
    pub divisor: f32,
}

pub(crate) fn pool_region(p: &PoolParams, out_x: usize, out_y: usize) -> PoolRegion {
    let (w, h) = (p.src_w as isize, p.src_h as isize);
    let x0 = (out_x * p.stride_x) as isize - p.border.left as isize;
    let y0 = (out_y * p.stride_y) as isize - p.border.top as isize;
    let x1 = (x0 + p.pool_size.width as isize).min(w + p.border.right as isize);
    let y1 = (y0 + p.pool_size.height as isize).min(h + p.border.bottom as isize);
    let (dx0, dx1, dy0, dy1) = if p.exclude_padding {
        (x0.max(0), x1.min(w), y0.max(0), y1.min(h))
    } else {
        (x0, x1, y0, y1)
    };
    let divisor = ((dx1 - dx0).max(0) * (dy1 - dy0).max(0)).max(1) as f32;
    PoolRegion { x0, x1, y0, y1, divisor }
}

/// Shared reduction over every output element of `window`.
fn pool_core(
    dst: &Tensor,
    indices: Option<&Tensor>,
    p: &PoolParams,
    window: &Window,
    load: impl Fn(&Coordinates) -> f32,
    store: impl Fn(&Coordinates, f32),
) {
    let out_w = dst.info().dimension(p.idx_w);
    let (w, h) = (p.src_w as isize, p.src_h as isize);
    let (off_x, off_y) = if p.padded {
        (p.border.left as isize, p.border.top as isize)
    } else {
        (0, 0)
    };
    let at = |base: &Coordinates, x: isize, y: isize| {
        let mut c = *base;
        c[p.idx_w] = (x + off_x) as usize;
        c[p.idx_h] = (y + off_y) as usize;
        c
    };

    window.for_each(|c| {
        let first = c[p.idx_w];
        for ox in first..(first + p.step_x).min(out_w) {
            let mut oc = *c;
            oc[p.idx_w] = ox;
            let r = pool_region(p, ox, oc[p.idx_h]);
            let (bx0, bx1, by0, by1) = (r.x0.max(0), r.x1.min(w), r.y0.max(0), r.y1.min(h));

            let value = match p.pool_type {
                PoolingType::Max => {
                    let mut best = f32::NEG_INFINITY;
                    let mut best_at = None;
                    for y in by0..by1 {
                        for x in bx0..bx1 {
                            let v = load(&at(&oc, x, y));
                            if v > best || best_at.is_none() {
                                best = v;
                                best_at = Some((x, y));
                            }
                        }
                    }
                    if let (Some(idx), Some((x, y))) = (indices, best_at) {
                        let mut sc = oc;
                        sc[p.idx_w] = x as usize;
                        sc[p.idx_h] = y as usize;
                        let linear = p.src_info.offset_element_in_bytes(&sc) / p.src_info.element_size();
                        // SAFETY: indices has dst's shape; `oc` lies inside dst.
                        unsafe { write(idx, &oc, linear as u32) };
                    }
                    best
                }
                PoolingType::Avg | PoolingType::L2 => {
                    // A filled border contributes through the padded taps.
                    let (sx0, sx1, sy0, sy1) = if p.padded { (r.x0, r.x1, r.y0, r.y1) } else { (bx0, bx1, by0, by1) };
                    let mut sum = 0.0f32;
                    for y in sy0..sy1 {
                        for x in sx0..sx1 {
                            let v = load(&at(&oc, x, y));
                            sum += if p.pool_type == PoolingType::L2 { v * v } else { v };
                        }
                    }
                    let mean = sum / r.divisor;
                    if p.pool_type == PoolingType::L2 {
                        mean.sqrt()
                    } else {
                        mean
                    }
                }
            };
            store(&oc, value);
        }
    });
}

fn float_pool<T: Scalar>(src: &Tensor, dst: &Tensor, indices: Option<&Tensor>, p: &PoolParams, window: &Window) {
    pool_core(
        dst,
        indices,
        p,
        window,
        // SAFETY: taps are clipped to the (padded) source extent.
        |c| unsafe { read::<T>(src, c) }.to_f32(),
        // SAFETY: `c` is an output coordinate of this window.
        |c, v| unsafe { write(dst, c, T::from_f32(v)) },
    );
}

fn quantized_pool<T: Quantized>(src: &Tensor, dst: &Tensor, indices: Option<&Tensor>, p: &PoolParams, window: &Window) {
    let qi = src.info().quantization_info().uniform();
    let qo = dst.info().quantization_info().uniform();
    pool_core(
        dst,
        indices,
        p,
        window,
        // SAFETY: as float_pool.
        |c| unsafe { read::<T>(src, c) }.dequantize(qi),
        // SAFETY: as float_pool.
        |c, v| unsafe { write(dst, c, T::quantize(v, qo)) },
    );
}

/// Pool size after resolving global pooling.
pub fn effective_pool_size(src: &TensorInfo, info: &PoolingLayerInfo) -> Size2D {
    if info.is_global_pooling {
        let layout = src.data_layout();
        Size2D::new(
            src.dimension(layout.index_of(DataLayoutDimension::Width)),
            src.dimension(layout.index_of(DataLayoutDimension::Height)),
        )
    } else {
        info.pool_size
    }
}

/// Output shape of pooling `src` with `info`.
pub fn compute_pool_shape(src: &TensorInfo, info: &PoolingLayerInfo) -> Result<TensorShape, ComputeError> {
    let layout = src.data_layout();
    let idx_w = layout.index_of(DataLayoutDimension::Width);
    let idx_h = layout.index_of(DataLayoutDimension::Height);
    let pool = effective_pool_size(src, info);
    let (w, h) = scaled_dimensions(
        src.dimension(idx_w),
        src.dimension(idx_h),
        pool.width,
        pool.height,
        &info.pad_stride_info,
    )
    .ok_or_else(|| {
        ComputeError::invalid(
            OP,
            format!(
                "pool {}x{} does not fit a {}x{} input",
                pool.width,
                pool.height,
                src.dimension(idx_w),
                src.dimension(idx_h)
            ),
        )
    })?;
    let mut shape = *src.shape();
    shape.set(idx_w, w);
    shape.set(idx_h, h);
    Ok(shape)
}

/// Resolves `info` against `src`. NCHW sources are read through a filled
/// border whenever the pooling pads.
pub(crate) fn pool_params(src: &TensorInfo, info: &PoolingLayerInfo, step_x: usize) -> PoolParams {
    let layout = src.data_layout();
    let idx_w = layout.index_of(DataLayoutDimension::Width);
    let idx_h = layout.index_of(DataLayoutDimension::Height);
    let psi = &info.pad_stride_info;
    let border = BorderSize::new(psi.pad_top, psi.pad_right, psi.pad_bottom, psi.pad_left);
    PoolParams {
        pool_type: info.pool_type,
        pool_size: effective_pool_size(src, info),
        stride_x: psi.stride_x,
        stride_y: psi.stride_y,
        border,
        exclude_padding: info.exclude_padding,
        src_w: src.dimension(idx_w),
        src_h: src.dimension(idx_h),
        idx_w,
        idx_h,
        padded: layout == DataLayout::Nchw && !border.is_empty(),
        step_x,
        src_info: src.clone(),
    }
}

/// Elements per window iteration along x for the NCHW quantized kernels.
fn nchw_step_x(dt: DataType, pool: Size2D, stride_x: usize) -> usize {
    if !dt.is_quantized() || pool.width != pool.height {
        return 1;
    }
    match (pool.width, stride_x) {
        (2, 2) => 8,
        (2, _) => 15,
        (3, 2) => 7,
        (3, _) => 14,
        _ => 1,
    }
}

pub struct CpuPool2dKernel {
    params: PoolParams,
    run_method: PoolingUKernel,
    name: String,
    window: Window,
    split_dimension: usize,
    layout: DataLayout,
}

impl HasKernelTable for CpuPool2dKernel {
    type Selector = PoolingSelectorData;
    type Ukernel = PoolingUKernel;

    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
        POOLING_KERNELS
    }
}

impl CpuPool2dKernel {
    pub fn validate(
        src: &TensorInfo,
        dst: &TensorInfo,
        info: &PoolingLayerInfo,
        indices: Option<&TensorInfo>,
        cpu: &CpuInfo,
    ) -> Status {
        let pool = effective_pool_size(src, info);
        if pool.width == 0 || pool.height == 0 {
            return Err(ComputeError::invalid(OP, "pool size must be non-zero"));
        }
        validate::cpu_f16_supported(OP, src, cpu.has_fp16())?;
        validate::layout_in(OP, src, &[DataLayout::Nchw, DataLayout::Nhwc])?;
        validate::data_type_in(
            OP,
            src,
            &[DataType::QAsymm8, DataType::QAsymm8Signed, DataType::F16, DataType::F32],
        )?;
        if let Some(idx) = indices {
            if !matches!(src.data_type(), DataType::F32 | DataType::F16) {
                return Err(ComputeError::unsupported(OP, "kernel indices need F32 or F16 input"));
            }
            if info.pool_type != PoolingType::Max {
                return Err(ComputeError::unsupported(OP, "kernel indices need max pooling"));
            }
            if pool.width != 2 || pool.height != 2 {
                return Err(ComputeError::unsupported(OP, "kernel indices need a 2x2 pool"));
            }
            if idx.is_initialised() {
                validate::data_type_in(OP, idx, &[DataType::U32])?;
            }
        }
        let quantized = src.data_type().is_quantized();
        if quantized && info.pool_type == PoolingType::L2 {
            return Err(ComputeError::unsupported(OP, "L2 pooling on quantized input"));
        }
        if quantized
            && info.pool_type == PoolingType::Avg
            && !info.exclude_padding
            && info.pad_stride_info.has_padding()
            && src.data_layout() == DataLayout::Nhwc
        {
            return Err(ComputeError::unsupported(
                OP,
                "quantized NHWC average pooling with padding needs exclude_padding",
            ));
        }

        let out_shape = compute_pool_shape(src, info)?;
        if dst.is_initialised() {
            validate::matching_data_types(OP, src, dst)?;
            validate::layout_in(OP, dst, &[src.data_layout()])?;
            if *dst.shape() != out_shape {
                return Err(ComputeError::MismatchingShapes {
                    op: OP,
                    expected: out_shape,
                    actual: *dst.shape(),
                });
            }
            if let Some(idx) = indices.filter(|i| i.is_initialised()) {
                validate::matching_shapes(OP, dst, idx)?;
            }
        }

        if select::<Self>(&Self::selector(src, info, cpu), KernelSelectionType::Supported).is_none() {
            return Err(ComputeError::NoMicroKernel {
                op: OP,
                detail: format!("{} {:?}", src.data_type(), src.data_layout()),
            });
        }
        Ok(())
    }

    fn selector(src: &TensorInfo, info: &PoolingLayerInfo, cpu: &CpuInfo) -> PoolingSelectorData {
        PoolingSelectorData {
            dt: src.data_type(),
            dl: src.data_layout(),
            pool_stride_x: info.pad_stride_info.stride_x,
            pool_size: effective_pool_size(src, info),
            isa: *cpu.isa(),
        }
    }

    /// Configures the kernel. `dst` (and `indices`, if given) are
    /// initialised from the computed output shape when empty.
    pub fn configure(
        src: &TensorInfo,
        dst: &mut TensorInfo,
        info: &PoolingLayerInfo,
        indices: Option<&mut TensorInfo>,
        cpu: &CpuInfo,
    ) -> Result<Self, ComputeError> {
        let out_shape = compute_pool_shape(src, info)?;
        dst.auto_init_like(out_shape, src);
        let mut indices = indices;
        if let Some(idx) = indices.as_deref_mut() {
            if idx.auto_init_if_empty(out_shape, DataType::U32, Default::default()) {
                *idx = idx.clone().with_layout(src.data_layout());
            }
        }
        Self::validate(src, dst, info, indices.as_deref(), cpu)?;

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

        let layout = src.data_layout();
        let psi = &info.pad_stride_info;
        let step_x = if layout == DataLayout::Nchw {
            nchw_step_x(src.data_type(), effective_pool_size(src, info), psi.stride_x)
        } else {
            1
        };
        let params = pool_params(src, info, step_x);
        let window = calculate_max_window(dst.shape(), Steps::new(&[step_x]));
        let split_dimension = if window.num_iterations(Window::DIM_Y) > 1 {
            Window::DIM_Y
        } else if window.num_iterations(Window::DIM_Z) > 1 {
            Window::DIM_Z
        } else {
            Window::DIM_X
        };
        tracing::debug!(
            kernel = uk.name,
            ?layout,
            pool_w = params.pool_size.width,
            pool_h = params.pool_size.height,
            "configured pooling"
        );

        Ok(Self {
            params,
            run_method,
            name: format!("{OP}/{}", uk.name),
            window,
            split_dimension,
            layout,
        })
    }

    /// Border the NCHW source must carry; empty for NHWC.
    pub fn border_size(&self) -> BorderSize {
        if self.layout == DataLayout::Nchw {
            self.params.border
        } else {
            BorderSize::default()
        }
    }

    /// Border fill that keeps padding from changing the result.
    pub fn border_mode(&self) -> BorderMode {
        if self.params.pool_type == PoolingType::Max {
            BorderMode::Replicate
        } else {
            BorderMode::Constant
        }
    }

    pub fn params(&self) -> &PoolParams {
        &self.params
    }
}

impl CpuKernel for CpuPool2dKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let src = tensors.tensor(TensorType::SRC);
        let dst = tensors.tensor(TensorType::DST);
        let indices = tensors.get_tensor(TensorType::Dst1).map(|t| &**t);
        (self.run_method)(src, dst, indices, &self.params, window);
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
    use tensor_core::{PadStrideInfo, QuantizationInfo};

    fn cpu() -> CpuInfo {
        CpuInfo::with_isa(CpuIsa::armv82_dot(), 1)
    }

    fn run(k: &CpuPool2dKernel, src: Tensor, dst: &Arc<Tensor>, indices: Option<&Arc<Tensor>>) {
        let mut pack = TensorPack::new()
            .with_const(TensorType::SRC, Arc::new(src))
            .with(TensorType::DST, Arc::clone(dst));
        if let Some(i) = indices {
            pack.add_tensor(TensorType::Dst1, Arc::clone(i));
        }
        k.run_op(&pack, k.window(), &ThreadInfo::SINGLE);
    }

    #[test]
    fn test_table_order_selects_specialised_entries() {
        let src = TensorInfo::new(TensorShape::new(&[8, 8, 1]), DataType::F32);
        let pool = |s| PoolingLayerInfo::new(PoolingType::Max, s, DataLayout::Nchw, PadStrideInfo::new(1, 1, 0, 0), false);
        let names: Vec<_> = [2, 3, 7, 4]
            .iter()
            .map(|&s| {
                let mut d = TensorInfo::empty();
                CpuPool2dKernel::configure(&src, &mut d, &pool(s), None, &cpu()).unwrap().name().to_string()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "CpuPool2dKernel/neon_fp32_nchw_pool2",
                "CpuPool2dKernel/neon_fp32_nchw_pool3",
                "CpuPool2dKernel/neon_fp32_nchw_pool7",
                "CpuPool2dKernel/neon_fp32_nchw_poolMxN",
            ]
        );
    }

    #[test]
    fn test_nhwc_max_with_indices() {
        // C=1, W=4, H=2
        let src_info = TensorInfo::new(TensorShape::new(&[1, 4, 2]), DataType::F32).with_layout(DataLayout::Nhwc);
        let info = PoolingLayerInfo::new(
            PoolingType::Max,
            2,
            DataLayout::Nhwc,
            PadStrideInfo::new(2, 2, 0, 0),
            false,
        );
        let mut d = TensorInfo::empty();
        let mut idx = TensorInfo::empty();
        let k = CpuPool2dKernel::configure(&src_info, &mut d, &info, Some(&mut idx), &cpu()).unwrap();
        assert_eq!(d.shape(), &TensorShape::new(&[1, 2, 1]));
        assert_eq!(idx.data_type(), DataType::U32);
        let dst = Arc::new(Tensor::new(d));
        let indices = Arc::new(Tensor::new(idx));
        let values = [1.0f32, 9.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        run(&k, Tensor::from_slice(src_info, &values).unwrap(), &dst, Some(&indices));
        assert_eq!(dst.to_vec::<f32>(), vec![9.0, 8.0]);
        assert_eq!(indices.to_vec::<u32>(), vec![1, 7]);
    }

    #[test]
    fn test_nhwc_avg_exclude_padding() {
        let src_info = TensorInfo::new(TensorShape::new(&[1, 2, 2]), DataType::F32).with_layout(DataLayout::Nhwc);
        let psi = PadStrideInfo::new(1, 1, 1, 1);
        let mut d = TensorInfo::empty();
        let excl = PoolingLayerInfo::new(PoolingType::Avg, 2, DataLayout::Nhwc, psi, true);
        let k = CpuPool2dKernel::configure(&src_info, &mut d, &excl, None, &cpu()).unwrap();
        assert_eq!(d.shape(), &TensorShape::new(&[1, 3, 3]));
        let dst = Arc::new(Tensor::new(d));
        run(&k, Tensor::from_slice(src_info.clone(), &[4.0f32; 4]).unwrap(), &dst, None);
        assert!(dst.to_vec::<f32>().iter().all(|&v| v == 4.0));

        let mut d = TensorInfo::empty();
        let incl = PoolingLayerInfo::new(PoolingType::Avg, 2, DataLayout::Nhwc, psi, false);
        let k = CpuPool2dKernel::configure(&src_info, &mut d, &incl, None, &cpu()).unwrap();
        let dst = Arc::new(Tensor::new(d));
        run(&k, Tensor::from_slice(src_info, &[4.0f32; 4]).unwrap(), &dst, None);
        let out = dst.to_vec::<f32>();
        assert_eq!(out[0], 1.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn test_nchw_quantized_steps() {
        let src = TensorInfo::new(TensorShape::new(&[32, 4]), DataType::QAsymm8)
            .with_quantization(QuantizationInfo::new(1.0, 0));
        let info = PoolingLayerInfo::new(PoolingType::Max, 2, DataLayout::Nchw, PadStrideInfo::new(2, 2, 0, 0), false);
        let mut d = TensorInfo::empty();
        let k = CpuPool2dKernel::configure(&src, &mut d, &info, None, &cpu()).unwrap();
        assert_eq!(k.name(), "CpuPool2dKernel/neon_qu8_nchw_pool2");
        assert_eq!(k.window().x().step(), 8);
        assert_eq!(k.window().num_iterations(Window::DIM_X), 2);

        let values: Vec<u8> = (0..128u32).map(|v| v as u8).collect();
        let dst = Arc::new(Tensor::new(d));
        run(&k, Tensor::from_slice(src, &values).unwrap(), &dst, None);
        let out = dst.to_vec::<u8>();
        assert_eq!(out.len(), 32);
        assert_eq!(out[0], 33);
        assert_eq!(out[15], 63);
    }

    #[test]
    fn test_validation_rules() {
        let q = TensorInfo::new(TensorShape::new(&[1, 4, 4]), DataType::QAsymm8).with_layout(DataLayout::Nhwc);
        let l2 = PoolingLayerInfo::new(PoolingType::L2, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 0, 0), false);
        assert!(CpuPool2dKernel::validate(&q, &TensorInfo::empty(), &l2, None, &cpu()).is_err());
        let avg = PoolingLayerInfo::new(PoolingType::Avg, 2, DataLayout::Nhwc, PadStrideInfo::new(1, 1, 1, 1), false);
        assert!(CpuPool2dKernel::validate(&q, &TensorInfo::empty(), &avg, None, &cpu()).is_err());
        let f = TensorInfo::new(TensorShape::new(&[4, 4]), DataType::F32);
        let avg3 = PoolingLayerInfo::new(PoolingType::Avg, 3, DataLayout::Nchw, PadStrideInfo::new(1, 1, 0, 0), false);
        let idx = TensorInfo::empty();
        assert!(CpuPool2dKernel::validate(&f, &TensorInfo::empty(), &avg3, Some(&idx), &cpu()).is_err());
        let huge = PoolingLayerInfo::new(PoolingType::Max, 9, DataLayout::Nchw, PadStrideInfo::new(1, 1, 0, 0), false);
        assert!(CpuPool2dKernel::validate(&f, &TensorInfo::empty(), &huge, None, &cpu()).is_err());
    }

    #[test]
    fn test_global_pooling() {
        let src = TensorInfo::new(TensorShape::new(&[3, 3, 2]), DataType::F32);
        let info = PoolingLayerInfo::global(PoolingType::Avg, DataLayout::Nchw);
        let mut d = TensorInfo::empty();
        let k = CpuPool2dKernel::configure(&src, &mut d, &info, None, &cpu()).unwrap();
        assert_eq!(d.shape(), &TensorShape::new(&[1, 1, 2]));
        assert_eq!(k.split_dimension(), Window::DIM_Z);
        let values: Vec<f32> = (0..18).map(|v| v as f32).collect();
        let dst = Arc::new(Tensor::new(d));
        run(&k, Tensor::from_slice(src, &values).unwrap(), &dst, None);
        assert_eq!(dst.to_vec::<f32>(), vec![4.0, 13.0]);
    }
}
