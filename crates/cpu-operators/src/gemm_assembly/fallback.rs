// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The typed half of the assembly dispatch.
//!
//! One `Fallback<Ti, Tw, To, S>` exists per configured dispatcher and owns
//! the backend handle. It decides which auxiliary buffers the handle needs,
//! fills them (explicit transpose of `B`, pretransposed `B`, the indirect
//! row-pointer table) and attaches the operand pointers before every run.

use super::{AsmConvMethod, AsmGemmInfo};
use crate::operator::required;
use crate::{CpuPermute, Operator, OperatorContext};
use cpu_kernels::CpuGemmAssemblyWrapperKernel;
use gemm_backend::{
    gemm, get_gemm_method, ConvolutionParameters, DequantizeFloat, Element, GemmArgs, GemmArrays, GemmCommon,
    GemmConfig, GemmHandle, GemmMethod, HasGemmImplementations, KernelDescription, Nothing, OutputElement,
    OutputStage, Requantize32,
};
use memory_manager::{AuxTensorHandler, MemoryInfo, MemoryLifetime, MemoryRequirements, PersistentSlots};
use runtime::{Hints, StrategyHint, ThreadInfo, Workload, SPLIT_DIMENSIONS_ALL};
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;
use std::sync::Arc;
use tensor_core::{
    offset_int_vec, DataType, GemmLowpOutputStageInfo, PermutationVector, QuantizationInfo, Tensor, TensorInfo,
    TensorPack, TensorShape, TensorType, Window,
};

const ASM_GEMM_WORKSPACE: u32 = 0;
const PRE_PRETRANSPOSED_B: u32 = 1;
const PRETRANSPOSE: u32 = 2;

const WORKSPACE_ALIGNMENT: usize = 4096;
/// 32-bit kernels read packed panels with 128-byte loads.
const PRETRANSPOSE_ALIGNMENT: usize = 128;
const GRANULE_THRESHOLD: i32 = 200;

const OP: &str = "CpuGemmAssemblyDispatch";

/// How the wrapper kernel's window is split for a given backend method.
///
/// Interleaved FP32 kernels are split dynamically along x; 2-D interleaved
/// kernels and the 2-D quantize wrapper are split over the whole (x, y)
/// plane. Everything else uses a static split along x.
pub fn scheduling_hint_heuristic(method: GemmMethod, data_type: DataType) -> Hints {
    match (method, data_type) {
        (GemmMethod::GemmInterleaved, DataType::F32) => {
            Hints::new(Window::DIM_X).with_strategy(StrategyHint::Dynamic, GRANULE_THRESHOLD)
        }
        (GemmMethod::GemmInterleaved2d, DataType::F32 | DataType::F16 | DataType::U8 | DataType::S8)
        | (GemmMethod::QuantizeWrapper2d, DataType::QAsymm8 | DataType::QAsymm8Signed) => {
            Hints::new(SPLIT_DIMENSIONS_ALL).with_strategy(StrategyHint::Static, GRANULE_THRESHOLD)
        }
        _ => Hints::new(Window::DIM_X),
    }
}

/// Per-channel shifts split into the two halves the backend applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequantizeShifts {
    /// At least one channel shifts left.
    pub need_left: bool,
    /// Non-negative shifts applied before the multiply.
    pub left_shifts: Vec<i32>,
    /// Non-positive shifts applied after the multiply.
    pub right_shifts: Vec<i32>,
}

/// Splits right-positive `shifts` into left and right parts.
///
/// # Example
/// ```
/// use cpu_operators::gemm_assembly::split_requantize_shifts;
/// let s = split_requantize_shifts(&[3, -2, 0]);
/// assert_eq!(s.left_shifts, vec![0, 2, 0]);
/// assert_eq!(s.right_shifts, vec![-3, 0, 0]);
/// assert!(s.need_left);
/// ```
pub fn split_requantize_shifts(shifts: &[i32]) -> RequantizeShifts {
    RequantizeShifts {
        need_left: shifts.iter().any(|&s| s < 0),
        left_shifts: shifts.iter().map(|&s| (-s).max(0)).collect(),
        right_shifts: shifts.iter().map(|&s| (-s).min(0)).collect(),
    }
}

/// Backend offsets `(a, b)` for the zero points of `a` and `b`.
fn zero_point_offsets(a: &QuantizationInfo, b: &QuantizationInfo, negated_offsets: bool) -> (i32, i32) {
    let negation = if negated_offsets { 1 } else { -1 };
    (
        -a.uniform().offset * negation,
        -b.uniform().offset * negation,
    )
}

fn requantize32_from(
    os: &GemmLowpOutputStageInfo,
    a: &QuantizationInfo,
    b: &QuantizationInfo,
    negated_offsets: bool,
) -> Requantize32 {
    let (a_offset, b_offset) = zero_point_offsets(a, b, negated_offsets);
    if os.gemmlowp_shifts.len() > 1 {
        let shifts = split_requantize_shifts(&os.gemmlowp_shifts);
        let left = if shifts.need_left { shifts.left_shifts } else { Vec::new() };
        Requantize32::per_channel(
            a_offset,
            b_offset,
            os.gemmlowp_offset,
            left,
            shifts.right_shifts,
            os.gemmlowp_multipliers.clone(),
            os.gemmlowp_min_bound,
            os.gemmlowp_max_bound,
        )
    } else {
        Requantize32::per_layer(
            a_offset,
            b_offset,
            os.gemmlowp_offset,
            -os.gemmlowp_shift,
            os.gemmlowp_multiplier,
            os.gemmlowp_min_bound,
            os.gemmlowp_max_bound,
        )
    }
}

/// Output stages the dispatcher knows how to parameterise.
pub(crate) trait AsmOutputStage: OutputStage {
    fn from_quantization(
        os: &GemmLowpOutputStageInfo,
        a: &QuantizationInfo,
        b: &QuantizationInfo,
        negated_offsets: bool,
    ) -> Self;

    /// Parameters derived from the live tensors have to be refreshed every run.
    fn is_dynamic(_a: &QuantizationInfo, _b: &QuantizationInfo) -> bool {
        false
    }

    fn refresh<Ti, Tw, To>(_gemm: &mut dyn GemmCommon<Ti, Tw, To>, _a: &QuantizationInfo, _b: &QuantizationInfo) {}
}

impl AsmOutputStage for Nothing {
    fn from_quantization(_: &GemmLowpOutputStageInfo, _: &QuantizationInfo, _: &QuantizationInfo, _: bool) -> Self {
        Nothing
    }
}

impl AsmOutputStage for Requantize32 {
    fn from_quantization(
        os: &GemmLowpOutputStageInfo,
        a: &QuantizationInfo,
        b: &QuantizationInfo,
        negated_offsets: bool,
    ) -> Self {
        requantize32_from(os, a, b, negated_offsets)
    }
}

impl AsmOutputStage for DequantizeFloat {
    fn from_quantization(
        _: &GemmLowpOutputStageInfo,
        a: &QuantizationInfo,
        b: &QuantizationInfo,
        negated_offsets: bool,
    ) -> Self {
        let (a_offset, b_offset) = zero_point_offsets(a, b, negated_offsets);
        DequantizeFloat::new(a.uniform().scale * b.uniform().scale, a_offset, b_offset)
    }

    fn is_dynamic(a: &QuantizationInfo, b: &QuantizationInfo) -> bool {
        a.is_dynamic || b.is_dynamic
    }

    fn refresh<Ti, Tw, To>(gemm: &mut dyn GemmCommon<Ti, Tw, To>, a: &QuantizationInfo, b: &QuantizationInfo) {
        gemm.set_dequantize_scale(a.uniform().scale * b.uniform().scale);
    }
}

/// Type-erased view of a [`Fallback`].
pub(crate) trait AsmFallback: Send {
    fn prepare(&mut self, ctx: &OperatorContext, tensors: &TensorPack);
    fn run(&mut self, ctx: &OperatorContext, tensors: &TensorPack);
    fn workspace(&self) -> MemoryRequirements;
    fn is_configured(&self) -> bool;
    fn kernel_name(&self) -> &str;
    fn method(&self) -> GemmMethod;
    fn get_config(&self) -> GemmConfig;
    fn update_quantization_parameters(
        &mut self,
        output: &GemmLowpOutputStageInfo,
        a: &QuantizationInfo,
        b: &QuantizationInfo,
        is_prepared: bool,
        negated_offsets: bool,
    );
}

/// A value shared with scheduler workloads.
#[derive(Clone, Copy)]
struct SharedPtr<P>(P);

// SAFETY: workloads write disjoint pieces of the pointed-to buffers and the
// scheduler joins them before the buffers can be released.
unsafe impl<P> Send for SharedPtr<P> {}
unsafe impl<P> Sync for SharedPtr<P> {}

impl<P: Copy> SharedPtr<P> {
    fn get(self) -> P {
        self.0
    }
}

/// Row pointers for indirect input.
///
/// `buf` holds one pointer per (batch, kernel tap, output pixel); `arg`
/// holds one pointer into `buf` per (batch, kernel tap) and is what the
/// backend receives. Neither vector is resized after construction.
struct IndirectBuffer<Ti> {
    pad: Vec<Ti>,
    buf: Vec<*const Ti>,
    arg: Vec<*const *const Ti>,
    batches: usize,
    last_a: *const u8,
}

// SAFETY: the pointers reference `pad`, `buf` and the caller's input tensor,
// and are only dereferenced by the backend during a run.
unsafe impl<Ti: Send> Send for IndirectBuffer<Ti> {}

fn run_parallel_pretranspose<Ti, Tw, To>(
    ctx: &OperatorContext,
    gemm: &dyn GemmCommon<Ti, Tw, To>,
    dst: *mut u8,
    b: *const Tw,
    ldb: usize,
    multi_stride: usize,
    transposed: bool,
) {
    let wsize = gemm.get_b_pretranspose_window_size();
    let num_threads = wsize.min(ctx.num_threads()).max(1);
    let (dst, b) = (SharedPtr(dst), SharedPtr(b));
    let workloads: Vec<Workload<'_>> = (0..num_threads)
        .map(move |t| {
            let start = t * wsize / num_threads;
            let end = (t + 1) * wsize / num_threads;
            Box::new(move |_: &ThreadInfo| {
                if start < end {
                    gemm.pretranspose_b_array_part(dst.get(), b.get(), ldb, multi_stride, transposed, start, end);
                }
            }) as Workload<'_>
        })
        .collect();
    ctx.scheduler()
        .run_tagged_workloads(workloads, "CpuGemmAssemblyDispatch/pretranspose_B_array");
}

pub(crate) struct Fallback<Ti, Tw, To, S> {
    gemm: GemmHandle<Ti, Tw, To>,
    kernel_info: KernelDescription,
    name: String,
    info: AsmGemmInfo,
    workspace_info: TensorInfo,
    /// Thread count the working space was sized for; runs never exceed it.
    max_threads: usize,
    pretranspose_info: TensorInfo,
    /// Explicit transpose of `B` for kernels that cannot fold it into packing.
    pre_pretranspose: Option<(CpuPermute, TensorInfo)>,
    b_pre_pretranspose_required: bool,
    /// Captured at configure; the handle clears its own flag once packed.
    b_pretranspose_required: bool,
    /// Pretransposed `B` of the last prepare, for a constant `B`.
    pretransposed_b: Option<Tensor>,
    persistent: PersistentSlots,
    aux_mem: MemoryRequirements,
    cp: Option<ConvolutionParameters>,
    indirect: Option<IndirectBuffer<Ti>>,
    is_prepared: bool,
    _stage: PhantomData<S>,
}

impl<Ti, Tw, To, S> Fallback<Ti, Tw, To, S>
where
    Ti: Element,
    Tw: Element,
    To: OutputElement,
    S: AsmOutputStage + HasGemmImplementations<Ti, Tw, To>,
{
    /// Asks the catalogue for a kernel and wraps it.
    ///
    /// Returns `None` when no implementation supports `args`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn configure(
        ctx: &OperatorContext,
        a: &TensorInfo,
        b: &TensorInfo,
        d: &TensorInfo,
        mut args: GemmArgs,
        info: &AsmGemmInfo,
        os: S,
    ) -> Option<Self> {
        let kernel_info = get_gemm_method::<Ti, Tw, To, S>(&args, &os);
        if kernel_info.method != GemmMethod::GemvBatched {
            args.cfg = Some(GemmConfig::with_filter(kernel_info.name.clone()));
        }
        let handle = gemm::<Ti, Tw, To, S>(&args, &os)?;
        Self::with_handle(ctx, a, b, d, &args, info, handle, kernel_info)
    }
}

impl<Ti, Tw, To, S> Fallback<Ti, Tw, To, S>
where
    Ti: Element,
    Tw: Element,
    To: OutputElement,
    S: AsmOutputStage,
{
    /// Wraps an existing handle and declares the buffers it needs.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_handle(
        ctx: &OperatorContext,
        a: &TensorInfo,
        b: &TensorInfo,
        d: &TensorInfo,
        args: &GemmArgs,
        info: &AsmGemmInfo,
        mut gemm: GemmHandle<Ti, Tw, To>,
        kernel_info: KernelDescription,
    ) -> Option<Self> {
        let window_size = gemm.get_window_size().total_size();
        if window_size < args.maxthreads {
            gemm.set_nthreads(window_size);
        }
        let name = match gemm.get_config().filter {
            filter if !filter.is_empty() => filter,
            _ => kernel_info.name.clone(),
        };

        let workspace_size = gemm.get_working_size();
        let workspace_info = TensorInfo::new(TensorShape::new(&[workspace_size]), DataType::U8);
        let mut aux_mem = vec![
            MemoryInfo::new(offset_int_vec(ASM_GEMM_WORKSPACE), MemoryLifetime::Temporary, workspace_size)
                .with_alignment(WORKSPACE_ALIGNMENT),
        ];

        let is_b_constant = b.are_values_constant();
        let b_pretranspose_required = gemm.b_pretranspose_required();
        let b_pre_pretranspose_required = info.transpose_b && !args.fixed_format;
        let fuse_transpose = b_pretranspose_required && gemm.b_pretranspose_supports_transpose();

        let pre_pretranspose = if b_pre_pretranspose_required && !fuse_transpose {
            let mut permuted = TensorInfo::empty();
            let mut op = CpuPermute::with_context(ctx.clone());
            if let Err(e) = op.configure(b, &mut permuted, PermutationVector::new(&[1, 0, 2, 3])) {
                tracing::debug!(error = %e, "cannot transpose B ahead of the backend");
                return None;
            }
            Some((op, permuted))
        } else {
            None
        };
        let pre_lifetime = if is_b_constant {
            MemoryLifetime::Prepare
        } else {
            MemoryLifetime::Temporary
        };
        aux_mem.push(MemoryInfo::new(
            offset_int_vec(PRE_PRETRANSPOSED_B),
            pre_lifetime,
            pre_pretranspose.as_ref().map_or(0, |(_, p)| p.total_size()),
        ));

        let pretranspose_size = if b_pretranspose_required {
            gemm.get_b_pretransposed_array_size()
        } else {
            0
        };
        let pretranspose_info = TensorInfo::new(TensorShape::new(&[pretranspose_size]), DataType::U8);
        let lifetime = if is_b_constant {
            MemoryLifetime::Persistent
        } else {
            MemoryLifetime::Temporary
        };
        aux_mem.push(
            MemoryInfo::new(offset_int_vec(PRETRANSPOSE), lifetime, pretranspose_size)
                .with_alignment(PRETRANSPOSE_ALIGNMENT),
        );

        let mut fallback = Self {
            gemm,
            kernel_info,
            name,
            info: info.clone(),
            workspace_info,
            max_threads: args.maxthreads,
            pretranspose_info,
            pre_pretranspose,
            b_pre_pretranspose_required,
            b_pretranspose_required,
            pretransposed_b: None,
            persistent: PersistentSlots::new(),
            aux_mem,
            cp: None,
            indirect: None,
            is_prepared: false,
            _stage: PhantomData,
        };
        if matches!(info.method, AsmConvMethod::Conv | AsmConvMethod::Indirect) {
            fallback.configure_indirect(a, b, d);
        }
        tracing::debug!(
            kernel = %fallback.name,
            workspace = workspace_size,
            pretranspose = pretranspose_size,
            explicit_transpose = fallback.pre_pretranspose.is_some(),
            "assembly GEMM buffers"
        );
        Some(fallback)
    }

    fn configure_indirect(&mut self, a: &TensorInfo, b: &TensorInfo, d: &TensorInfo) {
        let zeropad = if a.data_type().is_quantized() {
            a.quantization_info().uniform().offset as f32
        } else {
            0.0
        };
        let cp = ConvolutionParameters {
            input_width: a.dimension(1),
            input_height: a.dimension(2),
            input_channels: a.dimension(0),
            kernel_width: b.dimension(2),
            kernel_height: b.dimension(3),
            output_width: d.dimension(1),
            output_height: d.dimension(2),
            output_stride_w: self.info.ps_info.stride_x,
            output_stride_h: self.info.ps_info.stride_y,
            padding_top: self.info.padding_top,
            padding_left: self.info.padding_left,
            padding_value: zeropad,
        };
        self.cp = Some(cp);

        match self.info.method {
            AsmConvMethod::Conv => self.gemm.set_convolution_parameters(cp),
            AsmConvMethod::Indirect => {
                let batches = a.shape().total_size_upper(3);
                let kernel_hw = cp.kernel_width * cp.kernel_height;
                let output_hw = cp.output_width * cp.output_height;
                let buf = vec![ptr::null::<Ti>(); batches * kernel_hw * output_hw];
                let base = buf.as_ptr();
                let arg = (0..batches * kernel_hw)
                    .map(|row| base.wrapping_add(row * output_hw))
                    .collect::<Vec<_>>();
                self.gemm.set_indirect_parameters(a.dimension(0), arg.as_ptr());
                self.indirect = Some(IndirectBuffer {
                    pad: vec![Ti::from_f32(zeropad); cp.input_channels],
                    buf,
                    arg,
                    batches,
                    last_a: ptr::null(),
                });
            }
            AsmConvMethod::Im2Col => {}
        }
    }

    /// Points every (batch, tap, output pixel) entry at its input row, or
    /// at the padding row when the tap falls outside the input.
    fn prepare_indirect_buffer(&mut self, a: &Tensor) {
        let (Some(cp), Some(ind)) = (self.cp, self.indirect.as_mut()) else {
            return;
        };
        let es = size_of::<Ti>();
        let strides = a.info().strides_in_bytes();
        let stride_a = strides[1] / es;
        let batch_stride_a = strides[3] / es;
        let a_ptr = a.buffer().cast_const().cast::<Ti>();
        let pad = ind.pad.as_ptr();

        let output_hw = cp.output_width * cp.output_height;
        let batch_stride = cp.kernel_width * cp.kernel_height * output_hw;
        for batch in 0..ind.batches {
            for oy in 0..cp.output_height {
                for ox in 0..cp.output_width {
                    let oxy = oy * cp.output_width + ox;
                    for ky in 0..cp.kernel_height {
                        for kx in 0..cp.kernel_width {
                            let ix = (ox * cp.output_stride_w + kx) as isize - cp.padding_left as isize;
                            let iy = (oy * cp.output_stride_h + ky) as isize - cp.padding_top as isize;
                            let kxy = ky * cp.kernel_width + kx;
                            let inside = ix >= 0
                                && iy >= 0
                                && (ix as usize) < cp.input_width
                                && (iy as usize) < cp.input_height;
                            ind.buf[batch * batch_stride + kxy * output_hw + oxy] = if inside {
                                let ixy = iy as usize * cp.input_width + ix as usize;
                                a_ptr.wrapping_add(batch * batch_stride_a + ixy * stride_a)
                            } else {
                                pad
                            };
                        }
                    }
                }
            }
        }
        ind.last_a = a.buffer().cast_const();
    }

    /// Packs `b` into `dst`, transposing it first when the kernel cannot.
    fn pretranspose_b(&mut self, ctx: &OperatorContext, tensors: &TensorPack, b: &Arc<Tensor>, dst: &Tensor) {
        let transposed_b;
        let src: &Tensor = match self.pre_pretranspose.as_mut() {
            Some((op, info)) => {
                transposed_b = AuxTensorHandler::new(offset_int_vec(PRE_PRETRANSPOSED_B), info, tensors, false);
                let pack = TensorPack::new()
                    .with_const(TensorType::SRC, Arc::clone(b))
                    .with(TensorType::DST, transposed_b.to_arc());
                op.run(&pack);
                transposed_b.get()
            }
            None => b,
        };
        let es = size_of::<Tw>();
        let strides = src.info().strides_in_bytes();
        let transposed = self.b_pre_pretranspose_required && self.gemm.b_pretranspose_supports_transpose();
        run_parallel_pretranspose(
            ctx,
            &*self.gemm,
            dst.buffer(),
            src.buffer().cast_const().cast::<Tw>(),
            strides[1] / es,
            strides[2] / es,
            transposed,
        );
    }

    fn set_quantized_bias(&mut self, c: Option<&Arc<Tensor>>) {
        if let Some(c) = c.filter(|c| c.info().data_type() == DataType::S32) {
            self.gemm.set_quantized_bias(&c.to_vec::<i32>(), 0);
        }
    }

    /// Redoes the input-dependent prepare work when `B` or an integer bias
    /// may have changed since the last run.
    ///
    /// The returned handler owns a transient pretranspose buffer and must
    /// outlive the scheduled GEMM.
    fn refresh_non_constant(
        &mut self,
        ctx: &OperatorContext,
        tensors: &TensorPack,
        b: &Arc<Tensor>,
        c: Option<&Arc<Tensor>>,
    ) -> Option<AuxTensorHandler> {
        let b_constant = b.are_values_constant();
        let int_bias = c.filter(|c| c.info().data_type() == DataType::S32);
        let mut scratch = None;
        if !b_constant || int_bias.is_some_and(|c| !c.are_values_constant()) {
            self.set_quantized_bias(c);
            if self.b_pretranspose_required {
                if !b_constant {
                    let handler =
                        AuxTensorHandler::new(offset_int_vec(PRETRANSPOSE), &self.pretranspose_info, tensors, false);
                    self.pretranspose_b(ctx, tensors, b, handler.get());
                    self.pretransposed_b = None;
                    scratch = Some(handler);
                } else if let Some(packed) = self.pretransposed_b.clone() {
                    self.pretranspose_b(ctx, tensors, b, &packed);
                }
            }
        }
        if b_constant && self.b_pretranspose_required && self.pretransposed_b.is_none() {
            self.is_prepared = false;
        }
        scratch
    }
}

impl<Ti, Tw, To, S> AsmFallback for Fallback<Ti, Tw, To, S>
where
    Ti: Element,
    Tw: Element,
    To: OutputElement,
    S: AsmOutputStage,
{
    fn prepare(&mut self, ctx: &OperatorContext, tensors: &TensorPack) {
        if self.is_prepared {
            return;
        }
        let b = required(tensors, OP, TensorType::Src1);
        self.set_quantized_bias(tensors.get_const_tensor(TensorType::Src2));

        // A non-constant B is packed by every run instead.
        if self.b_pretranspose_required && b.are_values_constant() {
            let packed = self.persistent.resolve(
                offset_int_vec(PRETRANSPOSE),
                &self.pretranspose_info,
                PRETRANSPOSE_ALIGNMENT,
                tensors,
            );
            self.pretranspose_b(ctx, tensors, &b, &packed);
            self.pretransposed_b = Some(packed);
        }
        if self.info.method == AsmConvMethod::Indirect {
            let a = required(tensors, OP, TensorType::Src0);
            self.prepare_indirect_buffer(&a);
        }
        self.is_prepared = true;
    }

    fn run(&mut self, ctx: &OperatorContext, tensors: &TensorPack) {
        let a = required(tensors, OP, TensorType::Src0);
        let b = required(tensors, OP, TensorType::Src1);
        let c = tensors.get_const_tensor(TensorType::Src2).cloned();
        let d = required(tensors, OP, TensorType::DST);

        let (es_in, es_w, es_out) = (size_of::<Ti>(), size_of::<Tw>(), size_of::<To>());
        let a_strides = a.info().strides_in_bytes();
        let d_strides = d.info().strides_in_bytes();
        let a_batch_idx = if self.info.reinterpret_input_as_3d { 3 } else { 2 };
        let d_batch_idx = if self.info.depth_output_gemm3d != 0 { 3 } else { 2 };
        let mut arrays = GemmArrays::<Ti, Tw, To> {
            a: a.buffer().cast_const().cast::<Ti>(),
            lda: a_strides[1] / es_in,
            a_batch_stride: a_strides[a_batch_idx] / es_in,
            a_multi_stride: a_strides[a_batch_idx + 1] / es_in,
            c: d.buffer().cast::<To>(),
            ldc: d_strides[1] / es_out,
            c_batch_stride: d_strides[d_batch_idx] / es_out,
            c_multi_stride: d_strides[d_batch_idx + 1] / es_out,
            ..GemmArrays::default()
        };
        if !self.gemm.b_is_pretransposed() {
            let b_strides = b.info().strides_in_bytes();
            arrays.b = b.buffer().cast_const().cast::<Tw>();
            arrays.ldb = b_strides[1] / es_w;
            arrays.b_multi_stride = match self.info.method {
                AsmConvMethod::Im2Col => b_strides[2] / es_w,
                AsmConvMethod::Conv | AsmConvMethod::Indirect => 0,
            };
        }

        if S::is_dynamic(a.info().quantization_info(), b.info().quantization_info()) {
            S::refresh(
                &mut *self.gemm,
                a.info().quantization_info(),
                b.info().quantization_info(),
            );
        }
        let _pretranspose_scratch = self.refresh_non_constant(ctx, tensors, &b, c.as_ref());

        let threads = ctx.num_threads().min(self.max_threads);
        if threads < ctx.num_threads() {
            tracing::debug!(
                kernel = %self.name,
                configured = self.max_threads,
                available = ctx.num_threads(),
                "scheduler grew after configure, capping threads"
            );
        }
        let hints =
            scheduling_hint_heuristic(self.kernel_info.method, d.info().data_type()).with_max_threads(self.max_threads);
        let workspace = AuxTensorHandler::new(
            offset_int_vec(ASM_GEMM_WORKSPACE),
            &self.workspace_info,
            tensors,
            false,
        );
        if self.workspace_info.total_size() > 0 {
            self.gemm.set_working_space(workspace.get().buffer());
            let range = self.gemm.get_window_size();
            let mut num_threads = threads.min(range.total_size());
            if hints.split_dimension() != SPLIT_DIMENSIONS_ALL {
                num_threads = num_threads.min(range.get_size(hints.split_dimension()));
            }
            self.gemm.set_nthreads(num_threads.max(1));
        }

        self.prepare(ctx, tensors);

        if let Some(c) = c.as_ref().filter(|c| c.info().data_type() != DataType::S32) {
            arrays.bias = c.buffer().cast_const().cast::<To>();
        }
        if self.info.method == AsmConvMethod::Indirect {
            if self
                .indirect
                .as_ref()
                .is_some_and(|ind| ind.last_a != a.buffer().cast_const())
            {
                self.prepare_indirect_buffer(&a);
            }
            arrays.a = ptr::null();
            arrays.lda = 0;
            arrays.a_batch_stride = 0;
            arrays.a_multi_stride = 0;
        }
        self.gemm.set_arrays(arrays);

        tracing::debug!(
            kernel = %self.name,
            split = hints.split_dimension(),
            strategy = ?hints.strategy(),
            threads,
            "running assembly GEMM"
        );
        let kernel = CpuGemmAssemblyWrapperKernel::configure(&*self.gemm, self.name.as_str());
        ctx.schedule_hints(&kernel, &hints, tensors);
    }

    fn workspace(&self) -> MemoryRequirements {
        self.aux_mem.clone()
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn kernel_name(&self) -> &str {
        &self.name
    }

    fn method(&self) -> GemmMethod {
        self.kernel_info.method
    }

    fn get_config(&self) -> GemmConfig {
        self.gemm.get_config()
    }

    fn update_quantization_parameters(
        &mut self,
        output: &GemmLowpOutputStageInfo,
        a: &QuantizationInfo,
        b: &QuantizationInfo,
        is_prepared: bool,
        negated_offsets: bool,
    ) {
        let requant = requantize32_from(output, a, b, negated_offsets);
        self.gemm.update_quantization_parameters(&requant);
        self.is_prepared = is_prepared;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_info::{CpuInfo, CpuIsa};
    use gemm_backend::{NdCoord, NdRange};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts pretranspose and execute calls and does nothing else.
    struct CountingGemm {
        pretransposes: Arc<AtomicUsize>,
        executes: Arc<AtomicUsize>,
        max_thread: Arc<AtomicUsize>,
        arrays: GemmArrays<f32, f32, f32>,
    }

    // SAFETY: the stub never dereferences its arrays.
    unsafe impl Send for CountingGemm {}
    unsafe impl Sync for CountingGemm {}

    impl GemmCommon<f32, f32, f32> for CountingGemm {
        fn set_arrays(&mut self, arrays: GemmArrays<f32, f32, f32>) {
            self.arrays = arrays;
        }

        fn arrays(&self) -> GemmArrays<f32, f32, f32> {
            self.arrays
        }

        fn get_window_size(&self) -> NdRange {
            NdRange::new(&[4])
        }

        fn b_is_pretransposed(&self) -> bool {
            true
        }

        fn b_pretranspose_required(&self) -> bool {
            true
        }

        fn get_b_pretransposed_array_size(&self) -> usize {
            64
        }

        fn pretranspose_b_array_part(
            &self,
            _buf: *mut u8,
            _b: *const f32,
            _ldb: usize,
            _multi_stride: usize,
            _transposed: bool,
            _start: usize,
            _end: usize,
        ) {
            self.pretransposes.fetch_add(1, Ordering::SeqCst);
        }

        fn get_config(&self) -> GemmConfig {
            GemmConfig::with_filter("counting_stub")
        }

        fn execute(&self, _work: &NdCoord, _thread_locator: &NdCoord, thread_id: usize) {
            self.executes.fetch_add(1, Ordering::SeqCst);
            self.max_thread.fetch_max(thread_id, Ordering::SeqCst);
        }
    }

    struct Harness {
        fallback: Fallback<f32, f32, f32, Nothing>,
        ctx: OperatorContext,
        pretransposes: Arc<AtomicUsize>,
        executes: Arc<AtomicUsize>,
        max_thread: Arc<AtomicUsize>,
        pack: TensorPack,
        b: Arc<Tensor>,
    }

    fn harness() -> Harness {
        let ctx = crate::test_context(2);
        let a_info = TensorInfo::new(TensorShape::new(&[3, 4]), DataType::F32);
        let b_info = TensorInfo::new(TensorShape::new(&[5, 3]), DataType::F32);
        let d_info = TensorInfo::new(TensorShape::new(&[5, 4]), DataType::F32);
        let pretransposes = Arc::new(AtomicUsize::new(0));
        let executes = Arc::new(AtomicUsize::new(0));
        let max_thread = Arc::new(AtomicUsize::new(0));
        let stub = CountingGemm {
            pretransposes: Arc::clone(&pretransposes),
            executes: Arc::clone(&executes),
            max_thread: Arc::clone(&max_thread),
            arrays: GemmArrays::default(),
        };
        let args = GemmArgs::new(CpuInfo::with_isa(CpuIsa::default(), 2), 4, 5, 3).with_threads(2);
        let fallback = Fallback::<f32, f32, f32, Nothing>::with_handle(
            &ctx,
            &a_info,
            &b_info,
            &d_info,
            &args,
            &AsmGemmInfo::default(),
            Box::new(stub),
            KernelDescription::default(),
        )
        .unwrap();
        let b = Arc::new(Tensor::new(b_info));
        let pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::new(Tensor::new(a_info)))
            .with_const(TensorType::Src1, Arc::clone(&b))
            .with(TensorType::DST, Arc::new(Tensor::new(d_info)));
        Harness {
            fallback,
            ctx,
            pretransposes,
            executes,
            max_thread,
            pack,
            b,
        }
    }

    #[test]
    fn test_constant_b_is_pretransposed_once() {
        let mut h = harness();
        h.fallback.prepare(&h.ctx, &h.pack);
        h.fallback.prepare(&h.ctx, &h.pack);
        // The stub reports a pretranspose window of one piece.
        assert_eq!(h.pretransposes.load(Ordering::SeqCst), 1);
        h.fallback.run(&h.ctx, &h.pack);
        h.fallback.run(&h.ctx, &h.pack);
        assert_eq!(h.pretransposes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_constant_b_is_pretransposed_every_run() {
        let mut h = harness();
        h.b.set_values_constant(false);
        h.fallback.run(&h.ctx, &h.pack);
        h.fallback.run(&h.ctx, &h.pack);
        h.fallback.run(&h.ctx, &h.pack);
        assert_eq!(h.pretransposes.load(Ordering::SeqCst), 3);

        // Constant again: one more persistent pass, then reuse.
        h.b.set_values_constant(true);
        h.fallback.run(&h.ctx, &h.pack);
        h.fallback.run(&h.ctx, &h.pack);
        assert_eq!(h.pretransposes.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_growing_the_pool_keeps_configured_thread_count() {
        let mut h = harness();
        h.ctx.scheduler().set_num_threads(6);
        assert_eq!(h.ctx.num_threads(), 6);
        h.fallback.run(&h.ctx, &h.pack);
        // The stub window has 4 pieces; six workers would use ids up to 3.
        assert!(h.executes.load(Ordering::SeqCst) >= 1);
        assert!(h.max_thread.load(Ordering::SeqCst) < 2);
    }

    #[test]
    fn test_workspace_slots() {
        let h = harness();
        let ws = h.fallback.workspace();
        assert_eq!(ws.len(), 3);
        assert_eq!(ws[0].alignment, WORKSPACE_ALIGNMENT);
        assert_eq!(ws[2].size, 64);
        assert_eq!(ws[2].alignment, PRETRANSPOSE_ALIGNMENT);
        assert_eq!(ws[2].lifetime, MemoryLifetime::Persistent);
    }

    #[test]
    fn test_scheduling_hints() {
        let h = scheduling_hint_heuristic(GemmMethod::GemmInterleaved, DataType::F32);
        assert_eq!(h.split_dimension(), Window::DIM_X);
        assert_eq!(h.strategy(), StrategyHint::Dynamic);
        assert_eq!(h.threshold(), GRANULE_THRESHOLD);

        let h = scheduling_hint_heuristic(GemmMethod::GemmInterleaved2d, DataType::U8);
        assert_eq!(h.split_dimension(), SPLIT_DIMENSIONS_ALL);
        let h = scheduling_hint_heuristic(GemmMethod::QuantizeWrapper2d, DataType::QAsymm8Signed);
        assert_eq!(h.split_dimension(), SPLIT_DIMENSIONS_ALL);
        let h = scheduling_hint_heuristic(GemmMethod::GemmHybrid, DataType::F32);
        assert_eq!(h.split_dimension(), Window::DIM_X);
        assert_eq!(h.strategy(), StrategyHint::Static);
    }

    #[test]
    fn test_per_layer_requantize_flips_shift() {
        let os = GemmLowpOutputStageInfo {
            gemmlowp_offset: 3,
            gemmlowp_multiplier: 1 << 30,
            gemmlowp_shift: 2,
            gemmlowp_min_bound: 0,
            gemmlowp_max_bound: 255,
            gemmlowp_shifts: vec![2],
            gemmlowp_multipliers: vec![1 << 30],
            ..GemmLowpOutputStageInfo::default()
        };
        let a = QuantizationInfo::new(0.5, 10);
        let b = QuantizationInfo::new(0.25, -4);
        let rq = requantize32_from(&os, &a, &b, true);
        assert_eq!((rq.a_offset, rq.b_offset, rq.c_offset), (-10, 4, 3));
        assert_eq!(rq.per_layer_right_shift, -2);
        assert_eq!(rq.per_layer_left_shift, 0);
        assert!(!rq.per_channel_requant);

        let rq = requantize32_from(&os, &a, &b, false);
        assert_eq!((rq.a_offset, rq.b_offset), (10, -4));
    }

    #[test]
    fn test_per_channel_requantize_drops_unused_left_shifts() {
        let os = GemmLowpOutputStageInfo {
            gemmlowp_shifts: vec![1, 2],
            gemmlowp_multipliers: vec![7, 9],
            ..GemmLowpOutputStageInfo::default()
        };
        let q = QuantizationInfo::new(1.0, 0);
        let rq = requantize32_from(&os, &q, &q, true);
        assert!(rq.per_channel_requant);
        assert!(rq.per_channel_left_shifts.is_empty());
        assert_eq!(rq.per_channel_right_shifts, vec![-1, -2]);
        assert_eq!(rq.per_channel_muls, vec![7, 9]);
    }
}
