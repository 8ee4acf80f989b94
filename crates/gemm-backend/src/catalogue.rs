// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Implementation tables and selection.
//!
//! Each supported combination of operand, result and output-stage types
//! has an ordered table. Selection walks the table, skips entries excluded
//! by the configuration or unsupported on the CPU, and returns the first
//! recommended entry. Failing that, the first supported entry wins.

use crate::args::{GemmArgs, GemmMethod, KernelDescription, WeightFormat};
use crate::common::{GemmCommon, Strategy};
use crate::element::{Element, OutputElement};
use crate::gemv_batched::GemvBatched;
use crate::hybrid::GemmHybrid;
use crate::interleaved::GemmInterleaved;
use crate::output_stage::{DequantizeFloat, Epilogue, Nothing, OutputStage, Requantize32};
use half::{bf16, f16};

pub type GemmHandle<Ti, Tw, To> = Box<dyn GemmCommon<Ti, Tw, To>>;

/// One catalogue entry.
pub struct GemmImplementation<Ti, Tw, To, S> {
    pub method: GemmMethod,
    pub name: &'static str,
    /// `Unspecified` for entries that need a pretransposed `B`.
    pub weight_format: WeightFormat,
    pub is_supported: fn(&GemmArgs, &S) -> bool,
    pub is_recommended: fn(&GemmArgs, &S) -> bool,
    pub instantiate: fn(&GemmArgs, &S) -> Option<GemmHandle<Ti, Tw, To>>,
}

impl<Ti, Tw, To, S> GemmImplementation<Ti, Tw, To, S> {
    pub const fn new(
        method: GemmMethod,
        name: &'static str,
        is_supported: fn(&GemmArgs, &S) -> bool,
        is_recommended: fn(&GemmArgs, &S) -> bool,
        instantiate: fn(&GemmArgs, &S) -> Option<GemmHandle<Ti, Tw, To>>,
    ) -> Self {
        Self {
            method,
            name,
            weight_format: WeightFormat::Unspecified,
            is_supported,
            is_recommended,
            instantiate,
        }
    }

    pub const fn with_weight_format(mut self, weight_format: WeightFormat) -> Self {
        self.weight_format = weight_format;
        self
    }

    fn describe(&self, is_default: bool) -> KernelDescription {
        KernelDescription {
            method: self.method,
            name: self.name.to_string(),
            is_default,
            weight_format: self.weight_format,
        }
    }
}

/// Output stages with an implementation table for `Ti x Tw -> To`.
pub trait HasGemmImplementations<Ti, Tw, To>: OutputStage {
    fn implementation_list() -> &'static [GemmImplementation<Ti, Tw, To, Self>];
}

/// Whether `imp` may be considered for `args` at all.
fn qualifies<Ti, Tw, To, S>(imp: &GemmImplementation<Ti, Tw, To, S>, args: &GemmArgs, os: &S) -> bool {
    if let Some(cfg) = &args.cfg {
        if cfg.method != GemmMethod::Default && cfg.method != imp.method {
            return false;
        }
        if !cfg.filter.is_empty() && !imp.name.contains(cfg.filter.as_str()) {
            return false;
        }
    }
    if args.fixed_format != imp.weight_format.is_fixed_format() {
        return false;
    }
    if args.fixed_format && args.weight_format != WeightFormat::Any && args.weight_format != imp.weight_format {
        return false;
    }
    (imp.is_supported)(args, os)
}

/// Picks the implementation `gemm` would instantiate.
pub fn find_implementation<Ti, Tw, To, S>(
    args: &GemmArgs,
    os: &S,
) -> Option<&'static GemmImplementation<Ti, Tw, To, S>>
where
    S: HasGemmImplementations<Ti, Tw, To>,
{
    let mut first_supported = None;
    for imp in S::implementation_list() {
        if !qualifies(imp, args, os) {
            continue;
        }
        if (imp.is_recommended)(args, os) {
            return Some(imp);
        }
        first_supported.get_or_insert(imp);
    }
    first_supported
}

/// Builds a handle for `args`, or `None` when nothing supports it.
pub fn gemm<Ti, Tw, To, S>(args: &GemmArgs, os: &S) -> Option<GemmHandle<Ti, Tw, To>>
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
    S: HasGemmImplementations<Ti, Tw, To>,
{
    let Some(imp) = find_implementation::<Ti, Tw, To, S>(args, os) else {
        tracing::debug!(m = args.m, n = args.n, k = args.k, "no GEMM implementation found");
        return None;
    };
    tracing::debug!(
        method = %imp.method,
        name = imp.name,
        m = args.m,
        n = args.n,
        k = args.k,
        batches = args.nbatches,
        multis = args.nmulti,
        "selected GEMM implementation"
    );
    (imp.instantiate)(args, os)
}

/// Describes the implementation `gemm` would pick; a default description when none.
pub fn get_gemm_method<Ti, Tw, To, S>(args: &GemmArgs, os: &S) -> KernelDescription
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
    S: HasGemmImplementations<Ti, Tw, To>,
{
    find_implementation::<Ti, Tw, To, S>(args, os)
        .map(|imp| imp.describe(true))
        .unwrap_or_default()
}

/// Weight format of the implementation that would be picked, if any.
///
/// Only queries the catalogue; nothing is instantiated.
pub fn has_opt_impl<Ti, Tw, To, S>(args: &GemmArgs, os: &S) -> Option<WeightFormat>
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
    S: HasGemmImplementations<Ti, Tw, To>,
{
    find_implementation::<Ti, Tw, To, S>(args, os).map(|imp| imp.weight_format)
}

/// Every implementation able to run `args`, the default one flagged.
pub fn get_compatible_kernels<Ti, Tw, To, S>(args: &GemmArgs, os: &S) -> Vec<KernelDescription>
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
    S: HasGemmImplementations<Ti, Tw, To>,
{
    let chosen = find_implementation::<Ti, Tw, To, S>(args, os).map(|imp| imp.name);
    S::implementation_list()
        .iter()
        .filter(|imp| qualifies(imp, args, os))
        .map(|imp| imp.describe(Some(imp.name) == chosen))
        .collect()
}

// ── Builders ────────────────────────────────────────────────────

fn hybrid<Ti, Tw, To, S>(args: &GemmArgs, os: &S, strategy: Strategy) -> Option<GemmHandle<Ti, Tw, To>>
where
    Ti: Element,
    Tw: Element<Acc = Ti::Acc>,
    To: OutputElement,
    S: Epilogue<Ti::Acc, To>,
{
    Some(Box::new(GemmHybrid::<Ti, Tw, To, S>::new(args, os.clone(), strategy)))
}

fn interleaved<Ti, Tw, To, S>(args: &GemmArgs, os: &S, strategy: Strategy) -> Option<GemmHandle<Ti, Tw, To>>
where
    Ti: Element,
    Tw: Element<Acc = Ti::Acc>,
    To: OutputElement,
    S: Epilogue<Ti::Acc, To>,
{
    Some(Box::new(GemmInterleaved::<Ti, Tw, To, S>::new(args, os.clone(), strategy)))
}

fn gemv_batched<Ti, Tw, To, S>(args: &GemmArgs, os: &S) -> Option<GemmHandle<Ti, Tw, To>>
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
    S: HasGemmImplementations<Ti, Tw, To>,
{
    GemvBatched::new(args, os).map(|g| Box::new(g) as GemmHandle<Ti, Tw, To>)
}

fn always<S>(_: &GemmArgs, _: &S) -> bool {
    true
}

fn never<S>(_: &GemmArgs, _: &S) -> bool {
    false
}

fn gemv_batched_supported<S>(args: &GemmArgs, _: &S) -> bool {
    args.m == 1 && args.nbatches > 1 && !args.indirect_input && args.ksections == 1
}

/// Interleaved kernels read `A` as a plain matrix.
fn plain_input<S>(args: &GemmArgs, _: &S) -> bool {
    !args.indirect_input && args.ksections == 1
}

/// Small or skinny problems are better served reading `A` in place.
fn hybrid_preferred<S>(args: &GemmArgs, _: &S) -> bool {
    args.indirect_input || args.ksections > 1 || args.m <= 64 || args.n < 12
}

fn no_left_shift(qp: &Requantize32) -> bool {
    if qp.per_channel_requant {
        qp.per_channel_left_shifts.iter().all(|&s| s == 0)
    } else {
        qp.per_layer_left_shift == 0
    }
}

fn quant_hybrid_symmetric(qp: &Requantize32) -> bool {
    no_left_shift(qp) && qp.b_offset == 0
}

fn quant_hybrid_asymmetric(qp: &Requantize32) -> bool {
    no_left_shift(qp) && !qp.per_channel_requant
}

fn sve_width(args: &GemmArgs, lanes_per_128: usize) -> usize {
    (args.ci.sve_vector_length_bits() / 128).max(1) * lanes_per_128
}

// ── Strategies ──────────────────────────────────────────────────

const A64_HYBRID_FP32_6X16: Strategy = Strategy::new("a64_hybrid_fp32_mla_6x16", 6, 16, 1);
const A64_FFHYBRID_FP32_6X16: Strategy = Strategy::new("a64_ffhybrid_fp32_mla_6x16", 6, 16, 1);
const A64_SGEMM_8X12: Strategy = Strategy::new("a64_sgemm_8x12", 8, 12, 1);
const A64_HYBRID_FP16_6X32: Strategy = Strategy::new("a64_hybrid_fp16_mla_6x32", 6, 32, 1);
const A64_HGEMM_8X24: Strategy = Strategy::new("a64_hgemm_8x24", 8, 24, 1);
const A64_HYBRID_BF16FP32_6X16: Strategy = Strategy::new("a64_hybrid_bf16fp32_dot_6x16", 6, 16, 2);
const A64_INTERLEAVED_BF16FP32_8X12: Strategy = Strategy::new("a64_interleaved_bf16fp32_mmla_8x12", 8, 12, 4);
const A64_HYBRID_U8U32_6X16: Strategy = Strategy::new("a64_hybrid_u8u32_dot_6x16", 6, 16, 4);
const A64_INTERLEAVED_U8U32_8X12: Strategy = Strategy::new("a64_interleaved_u8u32_mmla_8x12", 8, 12, 8);
const A64_GEMM_U8_8X12: Strategy = Strategy::new("a64_gemm_u8_8x12", 8, 12, 4);
const A64_HYBRID_S8S32_6X16: Strategy = Strategy::new("a64_hybrid_s8s32_dot_6x16", 6, 16, 4);
const A64_INTERLEAVED_S8S32_8X12: Strategy = Strategy::new("a64_interleaved_s8s32_mmla_8x12", 8, 12, 8);
const A64_GEMM_S8_8X12: Strategy = Strategy::new("a64_gemm_s8_8x12", 8, 12, 4);
const A64_HYBRID_U8S8S32_6X16: Strategy = Strategy::new("a64_hybrid_u8s8s32_mmla_6x16", 6, 16, 8);
const A64_INTERLEAVED_U8S8S32_8X12: Strategy = Strategy::new("a64_interleaved_u8s8s32_mmla_8x12", 8, 12, 8);
const A64_HYBRID_U8QA_4X16: Strategy = Strategy::new("a64_hybrid_u8qa_dot_4x16", 4, 16, 4);
const A64_HYBRID_S8QA_4X16: Strategy = Strategy::new("a64_hybrid_s8qa_dot_4x16", 4, 16, 4);
const A64_HYBRID_S8QS_6X16: Strategy = Strategy::new("a64_hybrid_s8qs_dot_6x16", 6, 16, 4);
const A64_HYBRID_U8S8QA_4X16: Strategy = Strategy::new("a64_hybrid_u8s8qa_mmla_4x16", 4, 16, 8);

// ── Tables ──────────────────────────────────────────────────────

static GEMM_FP32: &[GemmImplementation<f32, f32, f32, Nothing>] = &[
    GemmImplementation::new(
        GemmMethod::GemvBatched,
        "gemv_batched",
        gemv_batched_supported,
        always,
        gemv_batched,
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "sve_hybrid_fp32_mla_6x4VL",
        |args, _| args.ci.has_sve(),
        always,
        |args, os| hybrid(args, os, Strategy::new("sve_hybrid_fp32_mla_6x4VL", 6, sve_width(args, 4), 1)),
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_ffhybrid_fp32_mla_6x16",
        always,
        always,
        |args, os| {
            Some(Box::new(GemmHybrid::<f32, f32, f32, Nothing>::fixed_format(
                args,
                *os,
                A64_FFHYBRID_FP32_6X16,
                WeightFormat::Ohwio4,
            )))
        },
    )
    .with_weight_format(WeightFormat::Ohwio4),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_fp32_mla_6x16",
        always,
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_FP32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved2d,
        "a64_sgemm_8x12_2d",
        plain_input,
        |args, _| args.maxthreads >= 8 && args.m >= 256 && args.n >= 256,
        |args, os| {
            Some(Box::new(GemmInterleaved::<f32, f32, f32, Nothing>::new_2d(
                args,
                *os,
                A64_SGEMM_8X12,
            )))
        },
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_sgemm_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_SGEMM_8X12),
    ),
];

static GEMM_FP16: &[GemmImplementation<f16, f16, f16, Nothing>] = &[
    GemmImplementation::new(
        GemmMethod::GemvBatched,
        "gemv_batched",
        gemv_batched_supported,
        always,
        gemv_batched,
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_fp16_mla_6x32",
        |args, _| args.ci.has_fp16(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_FP16_6X32),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_hgemm_8x24",
        |args, os| args.ci.has_fp16() && plain_input(args, os),
        always,
        |args, os| interleaved(args, os, A64_HGEMM_8X24),
    ),
];

static GEMM_BF16: &[GemmImplementation<bf16, bf16, f32, Nothing>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_bf16fp32_dot_6x16",
        |args, _| args.ci.has_bf16(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_BF16FP32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_interleaved_bf16fp32_mmla_8x12",
        |args, os| args.ci.has_bf16() && plain_input(args, os),
        always,
        |args, os| interleaved(args, os, A64_INTERLEAVED_BF16FP32_8X12),
    ),
];

static GEMM_U8U32: &[GemmImplementation<u8, u8, u32, Nothing>] = &[
    GemmImplementation::new(
        GemmMethod::GemvBatched,
        "gemv_batched",
        gemv_batched_supported,
        always,
        gemv_batched,
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8u32_dot_6x16",
        |args, _| args.ci.has_dotprod(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_U8U32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_interleaved_u8u32_mmla_8x12",
        |args, os| args.ci.has_i8mm() && plain_input(args, os),
        always,
        |args, os| interleaved(args, os, A64_INTERLEAVED_U8U32_8X12),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_gemm_u8_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_GEMM_U8_8X12),
    ),
];

static GEMM_S8S32: &[GemmImplementation<i8, i8, i32, Nothing>] = &[
    GemmImplementation::new(
        GemmMethod::GemvBatched,
        "gemv_batched",
        gemv_batched_supported,
        always,
        gemv_batched,
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_s8s32_dot_6x16",
        |args, _| args.ci.has_dotprod(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_S8S32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_interleaved_s8s32_mmla_8x12",
        |args, os| args.ci.has_i8mm() && plain_input(args, os),
        always,
        |args, os| interleaved(args, os, A64_INTERLEAVED_S8S32_8X12),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_gemm_s8_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_GEMM_S8_8X12),
    ),
];

static GEMM_U8S8S32: &[GemmImplementation<u8, i8, i32, Nothing>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8s8s32_mmla_6x16",
        |args, _| args.ci.has_i8mm(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_U8S8S32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_interleaved_u8s8s32_mmla_8x12",
        |args, os| args.ci.has_i8mm() && plain_input(args, os),
        always,
        |args, os| interleaved(args, os, A64_INTERLEAVED_U8S8S32_8X12),
    ),
];

static GEMM_QASYMM8: &[GemmImplementation<u8, u8, u8, Requantize32>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8qa_dot_4x16",
        |args, qp| args.ci.has_dotprod() && quant_hybrid_asymmetric(qp),
        |args, _| args.n <= 256 || args.m <= 64 || args.indirect_input,
        |args, os| hybrid(args, os, A64_HYBRID_U8QA_4X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8u32_dot_6x16",
        |args, _| args.ci.has_dotprod(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_U8U32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_gemm_u8_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_GEMM_U8_8X12),
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8u32_6x16",
        always,
        never,
        |args, os| hybrid(args, os, Strategy::new("a64_hybrid_u8u32_6x16", 6, 16, 4)),
    ),
];

static GEMM_QASYMM8_SIGNED: &[GemmImplementation<i8, i8, i8, Requantize32>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_s8qs_dot_6x16",
        |args, qp| args.ci.has_dotprod() && quant_hybrid_symmetric(qp),
        always,
        |args, os| hybrid(args, os, A64_HYBRID_S8QS_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_s8qa_dot_4x16",
        |args, qp| args.ci.has_dotprod() && quant_hybrid_asymmetric(qp),
        |args, _| args.n <= 256 || args.m <= 64 || args.indirect_input,
        |args, os| hybrid(args, os, A64_HYBRID_S8QA_4X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_gemm_s8_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_GEMM_S8_8X12),
    ),
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_s8s32_6x16",
        always,
        never,
        |args, os| hybrid(args, os, Strategy::new("a64_hybrid_s8s32_6x16", 6, 16, 4)),
    ),
];

static GEMM_QASYMM8_MIXED: &[GemmImplementation<u8, i8, u8, Requantize32>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8s8qa_mmla_4x16",
        |args, qp| args.ci.has_i8mm() && quant_hybrid_asymmetric(qp),
        |args, _| args.n <= 256 || args.m <= 64 || args.indirect_input,
        |args, os| hybrid(args, os, A64_HYBRID_U8S8QA_4X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_interleaved_u8s8s32_mmla_8x12",
        |args, os| args.ci.has_i8mm() && plain_input(args, os),
        always,
        |args, os| interleaved(args, os, A64_INTERLEAVED_U8S8S32_8X12),
    ),
];

static GEMM_U8_DEQUANT: &[GemmImplementation<u8, u8, f32, DequantizeFloat>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_u8u32_dot_6x16",
        |args, _| args.ci.has_dotprod(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_U8U32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_gemm_u8_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_GEMM_U8_8X12),
    ),
];

static GEMM_S8_DEQUANT: &[GemmImplementation<i8, i8, f32, DequantizeFloat>] = &[
    GemmImplementation::new(
        GemmMethod::GemmHybrid,
        "a64_hybrid_s8s32_dot_6x16",
        |args, _| args.ci.has_dotprod(),
        hybrid_preferred,
        |args, os| hybrid(args, os, A64_HYBRID_S8S32_6X16),
    ),
    GemmImplementation::new(
        GemmMethod::GemmInterleaved,
        "a64_gemm_s8_8x12",
        plain_input,
        always,
        |args, os| interleaved(args, os, A64_GEMM_S8_8X12),
    ),
];

macro_rules! impl_tables {
    ($($os:ty: $ti:ty, $tw:ty => $to:ty = $table:ident;)*) => {
        $(
            impl HasGemmImplementations<$ti, $tw, $to> for $os {
                fn implementation_list() -> &'static [GemmImplementation<$ti, $tw, $to, Self>] {
                    $table
                }
            }
        )*
    };
}

impl_tables! {
    Nothing: f32, f32 => f32 = GEMM_FP32;
    Nothing: f16, f16 => f16 = GEMM_FP16;
    Nothing: bf16, bf16 => f32 = GEMM_BF16;
    Nothing: u8, u8 => u32 = GEMM_U8U32;
    Nothing: i8, i8 => i32 = GEMM_S8S32;
    Nothing: u8, i8 => i32 = GEMM_U8S8S32;
    Requantize32: u8, u8 => u8 = GEMM_QASYMM8;
    Requantize32: i8, i8 => i8 = GEMM_QASYMM8_SIGNED;
    Requantize32: u8, i8 => u8 = GEMM_QASYMM8_MIXED;
    DequantizeFloat: u8, u8 => f32 = GEMM_U8_DEQUANT;
    DequantizeFloat: i8, i8 => f32 = GEMM_S8_DEQUANT;
}
