// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Maps tensor data types onto the typed backend entry points.

use super::fallback::{AsmFallback, AsmOutputStage, Fallback};
use super::{extract_parameters, map_to_gemm_activation, AsmGemmInfo};
use crate::OperatorContext;
use cpu_info::CpuInfo;
use gemm_backend::{
    DequantizeFloat, Element, GemmArgs, HasGemmImplementations, Nothing, OutputElement, Requantize32,
};
use half::{bf16, f16};
use tensor_core::{DataType, TensorInfo, WeightFormat};

/// Element types and output stage of one backend table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combo {
    F32,
    F16,
    Bf16F32,
    U8U32,
    U8S8S32,
    S8S32,
    QAsymm8,
    QAsymm8Signed,
    QAsymm8Mixed,
    U8Dequant,
    S8Dequant,
}

fn is_signed_8bit(dt: DataType) -> bool {
    matches!(
        dt,
        DataType::S8 | DataType::QAsymm8Signed | DataType::QSymm8PerChannel
    )
}

fn combo(a: DataType, b: DataType, d: DataType) -> Option<Combo> {
    let b_signed = is_signed_8bit(b);
    let c = match a {
        DataType::F32 => Combo::F32,
        DataType::F16 => Combo::F16,
        DataType::BFloat16 => Combo::Bf16F32,
        DataType::U8 | DataType::QAsymm8 => match (d, b_signed) {
            (DataType::S32 | DataType::U32, false) => Combo::U8U32,
            (DataType::S32 | DataType::U32, true) => Combo::U8S8S32,
            (DataType::F32, false) => Combo::U8Dequant,
            (DataType::F32, true) => return None,
            (_, false) => Combo::QAsymm8,
            (_, true) => Combo::QAsymm8Mixed,
        },
        DataType::S8 | DataType::QAsymm8Signed => match d {
            DataType::S32 => Combo::S8S32,
            DataType::F32 => Combo::S8Dequant,
            _ => Combo::QAsymm8Signed,
        },
        _ => return None,
    };
    Some(c)
}

/// Expands `$f::<Ti, Tw, To, S>(args..)` for the table `$combo` names.
macro_rules! with_combo {
    ($combo:expr, $f:ident($($arg:expr),* $(,)?)) => {
        match $combo {
            Combo::F32 => $f::<f32, f32, f32, Nothing>($($arg),*),
            Combo::F16 => $f::<f16, f16, f16, Nothing>($($arg),*),
            Combo::Bf16F32 => $f::<bf16, bf16, f32, Nothing>($($arg),*),
            Combo::U8U32 => $f::<u8, u8, u32, Nothing>($($arg),*),
            Combo::U8S8S32 => $f::<u8, i8, i32, Nothing>($($arg),*),
            Combo::S8S32 => $f::<i8, i8, i32, Nothing>($($arg),*),
            Combo::QAsymm8 => $f::<u8, u8, u8, Requantize32>($($arg),*),
            Combo::QAsymm8Signed => $f::<i8, i8, i8, Requantize32>($($arg),*),
            Combo::QAsymm8Mixed => $f::<u8, i8, u8, Requantize32>($($arg),*),
            Combo::U8Dequant => $f::<u8, u8, f32, DequantizeFloat>($($arg),*),
            Combo::S8Dequant => $f::<i8, i8, f32, DequantizeFloat>($($arg),*),
        }
    };
}

pub(crate) fn to_backend_format(wf: WeightFormat) -> gemm_backend::WeightFormat {
    match wf {
        WeightFormat::Unspecified => gemm_backend::WeightFormat::Unspecified,
        WeightFormat::Any => gemm_backend::WeightFormat::Any,
        WeightFormat::Ohwi => gemm_backend::WeightFormat::Ohwi,
        WeightFormat::Ohwio4 => gemm_backend::WeightFormat::Ohwio4,
        WeightFormat::Ohwio8 => gemm_backend::WeightFormat::Ohwio8,
        WeightFormat::Ohwio16 => gemm_backend::WeightFormat::Ohwio16,
    }
}

pub(crate) fn from_backend_format(wf: gemm_backend::WeightFormat) -> WeightFormat {
    match wf {
        gemm_backend::WeightFormat::Unspecified => WeightFormat::Unspecified,
        gemm_backend::WeightFormat::Any => WeightFormat::Any,
        gemm_backend::WeightFormat::Ohwi => WeightFormat::Ohwi,
        gemm_backend::WeightFormat::Ohwio4 => WeightFormat::Ohwio4,
        gemm_backend::WeightFormat::Ohwio8 => WeightFormat::Ohwio8,
        gemm_backend::WeightFormat::Ohwio16 => WeightFormat::Ohwio16,
    }
}

fn gemm_args(
    a: &TensorInfo,
    b: &TensorInfo,
    d: &TensorInfo,
    info: &AsmGemmInfo,
    cpu: &CpuInfo,
    num_threads: usize,
) -> GemmArgs {
    let p = extract_parameters(a, b, d, info);
    // Half precision accumulates in half unless told otherwise.
    let fast_mode = info.fast_mode || (a.data_type() == DataType::F16 && !info.fp32_accumulation);
    GemmArgs::new(cpu.clone(), p.m, p.n, p.k)
        .with_batches(p.batches, p.multis)
        .with_sections(p.sections, p.indirect)
        .with_activation(map_to_gemm_activation(&info.activation_info))
        .with_threads(num_threads.max(1))
        .with_fast_mode(fast_mode)
        .with_fixed_format(info.fixed_format, to_backend_format(info.weight_format))
}

fn output_stage<S: AsmOutputStage>(a: &TensorInfo, b: &TensorInfo, info: &AsmGemmInfo) -> S {
    S::from_quantization(
        &info.output_stage,
        a.quantization_info(),
        b.quantization_info(),
        info.negated_offsets,
    )
}

fn query<Ti, Tw, To, S>(
    a: &TensorInfo,
    b: &TensorInfo,
    d: &TensorInfo,
    info: &AsmGemmInfo,
    cpu: &CpuInfo,
    num_threads: usize,
) -> Option<gemm_backend::WeightFormat>
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
    S: AsmOutputStage + HasGemmImplementations<Ti, Tw, To>,
{
    let args = gemm_args(a, b, d, info, cpu, num_threads);
    gemm_backend::has_opt_impl::<Ti, Tw, To, S>(&args, &output_stage::<S>(a, b, info))
}

fn build<Ti, Tw, To, S>(
    ctx: &OperatorContext,
    a: &TensorInfo,
    b: &TensorInfo,
    d: &TensorInfo,
    info: &AsmGemmInfo,
) -> Option<Box<dyn AsmFallback>>
where
    Ti: Element,
    Tw: Element,
    To: OutputElement,
    S: AsmOutputStage + HasGemmImplementations<Ti, Tw, To> + Send + 'static,
{
    let args = gemm_args(a, b, d, info, ctx.cpu_info(), ctx.num_threads());
    let os = output_stage::<S>(a, b, info);
    let fallback = Fallback::<Ti, Tw, To, S>::configure(ctx, a, b, d, args, info, os)?;
    Some(Box::new(fallback))
}

/// Weight format of the kernel the backend would pick for `a x b -> d`.
pub(crate) fn has_opt_impl(
    a: &TensorInfo,
    b: &TensorInfo,
    d: &TensorInfo,
    info: &AsmGemmInfo,
    cpu: &CpuInfo,
    num_threads: usize,
) -> Option<WeightFormat> {
    let c = combo(a.data_type(), b.data_type(), d.data_type())?;
    with_combo!(c, query(a, b, d, info, cpu, num_threads)).map(from_backend_format)
}

/// Builds the typed fallback for `a x b -> d`, if the backend has a kernel.
pub(crate) fn create(
    ctx: &OperatorContext,
    a: &TensorInfo,
    b: &TensorInfo,
    d: &TensorInfo,
    info: &AsmGemmInfo,
) -> Option<Box<dyn AsmFallback>> {
    let c = combo(a.data_type(), b.data_type(), d.data_type())?;
    tracing::trace!(combo = ?c, "assembly GEMM element types");
    with_combo!(c, build(ctx, a, b, d, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_info::CpuIsa;
    use tensor_core::TensorShape;

    #[test]
    fn test_combo_table() {
        use DataType::*;
        assert_eq!(combo(F32, F32, F32), Some(Combo::F32));
        assert_eq!(combo(BFloat16, BFloat16, F32), Some(Combo::Bf16F32));
        assert_eq!(combo(U8, U8, U32), Some(Combo::U8U32));
        assert_eq!(combo(QAsymm8, QAsymm8Signed, S32), Some(Combo::U8S8S32));
        assert_eq!(combo(QAsymm8, QAsymm8Signed, QAsymm8), Some(Combo::QAsymm8Mixed));
        assert_eq!(combo(QAsymm8Signed, QSymm8PerChannel, QAsymm8Signed), Some(Combo::QAsymm8Signed));
        assert_eq!(combo(QAsymm8, QAsymm8, F32), Some(Combo::U8Dequant));
        assert_eq!(combo(QAsymm8, QAsymm8Signed, F32), None);
        assert_eq!(combo(S16, S16, S32), None);
    }

    #[test]
    fn test_weight_format_query() {
        let cpu = CpuInfo::with_isa(CpuIsa::default(), 1);
        let a = TensorInfo::new(TensorShape::new(&[16, 4]), DataType::F32);
        let b = TensorInfo::new(TensorShape::new(&[8, 16]), DataType::F32);
        let d = TensorInfo::new(TensorShape::new(&[8, 4]), DataType::F32);

        let plain = AsmGemmInfo::default();
        assert_eq!(has_opt_impl(&a, &b, &d, &plain, &cpu, 1), Some(WeightFormat::Unspecified));

        let any = AsmGemmInfo {
            fixed_format: true,
            weight_format: WeightFormat::Any,
            ..AsmGemmInfo::default()
        };
        assert_eq!(has_opt_impl(&a, &b, &d, &any, &cpu, 1), Some(WeightFormat::Ohwio4));
    }

    #[test]
    fn test_weight_format_mapping_is_lossless() {
        for wf in [
            WeightFormat::Unspecified,
            WeightFormat::Any,
            WeightFormat::Ohwi,
            WeightFormat::Ohwio4,
            WeightFormat::Ohwio8,
            WeightFormat::Ohwio16,
        ] {
            assert_eq!(from_backend_format(to_backend_format(wf)), wf);
        }
    }
}
