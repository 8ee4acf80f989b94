// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Drives a backend GEMM from tensor descriptors.
//!
//! [`CpuGemmAssemblyDispatch`] validates a type combination, builds the
//! [`GemmArgs`](gemm_backend::GemmArgs) for it and hands the problem to a
//! typed `Fallback`, which owns the backend handle and everything the
//! handle needs between runs:
//!
//! ```text
//! configure ──► extract_parameters ──► get_gemm_method ──► gemm() handle
//!                                                              │
//!   aux slots: Int(0) workspace (Temporary, 4096-aligned)     │
//!              Int(1) explicitly transposed B                 │
//!              Int(2) pretransposed B (128-aligned)           │
//!                                                              ▼
//! run ──► [B not constant: bias + pretranspose again]
//!     ──► working space, thread count
//!     ──► prepare (once: bias, pretranspose B, indirect table)
//!     ──► set_arrays ──► schedule CpuGemmAssemblyWrapperKernel
//! ```
//!
//! A combination nobody implements is not an error: `configure` leaves the
//! dispatcher unconfigured and the caller takes a portable path instead.

mod factory;
mod fallback;
mod params;

pub use fallback::{scheduling_hint_heuristic, split_requantize_shifts, RequantizeShifts};
pub use params::{extract_parameters, Params};

use crate::{Operator, OperatorContext};
use cpu_info::CpuInfo;
use fallback::AsmFallback;
use gemm_backend::{Activation, GemmConfig, GemmMethod};
use memory_manager::MemoryRequirements;
use tensor_core::validate;
use tensor_core::{
    ActivationFunction, ActivationLayerInfo, ComputeError, DataType, GemmInfo, GemmLowpOutputStageInfo,
    PadStrideInfo, QuantizationInfo, Status, TensorInfo, TensorPack, WeightFormat,
};

/// How `A` reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsmConvMethod {
    /// `A` is a plain (possibly im2col'd) matrix.
    #[default]
    Im2Col,
    /// The backend walks the NHWC input with its own sliding window.
    Conv,
    /// `A` is read through a table of row pointers, one per output pixel and kernel tap.
    Indirect,
}

/// Options of an assembly GEMM.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmGemmInfo {
    pub method: AsmConvMethod,
    pub ps_info: PadStrideInfo,
    pub activation_info: ActivationLayerInfo,
    pub output_stage: GemmLowpOutputStageInfo,
    /// Zero points are subtracted (stored negated) rather than added.
    pub negated_offsets: bool,
    pub reinterpret_input_as_3d: bool,
    pub depth_output_gemm3d: usize,
    pub padding_top: usize,
    pub padding_left: usize,
    pub padding_value: f32,
    pub fast_mode: bool,
    pub fp32_accumulation: bool,
    pub fixed_format: bool,
    pub weight_format: WeightFormat,
    /// `B` arrives transposed and has to be transposed back.
    pub transpose_b: bool,
}

impl Default for AsmGemmInfo {
    fn default() -> Self {
        Self {
            method: AsmConvMethod::Im2Col,
            ps_info: PadStrideInfo::new(1, 1, 0, 0),
            activation_info: ActivationLayerInfo::disabled(),
            output_stage: GemmLowpOutputStageInfo::default(),
            negated_offsets: true,
            reinterpret_input_as_3d: false,
            depth_output_gemm3d: 0,
            padding_top: 0,
            padding_left: 0,
            padding_value: 0.0,
            fast_mode: false,
            fp32_accumulation: false,
            fixed_format: false,
            weight_format: WeightFormat::Unspecified,
            transpose_b: false,
        }
    }
}

impl AsmGemmInfo {
    /// The assembly view of a [`GemmInfo`].
    pub fn from_gemm_info(info: &GemmInfo) -> Self {
        Self {
            activation_info: info.activation,
            output_stage: info.output_stage.clone(),
            reinterpret_input_as_3d: info.reinterpret_input_as_3d,
            depth_output_gemm3d: info.depth_output_gemm3d,
            fast_mode: info.fast_math,
            fp32_accumulation: info.fp32_accumulation,
            fixed_format: info.fixed_format,
            weight_format: info.weight_format,
            transpose_b: info.pretranspose_b,
            ..Self::default()
        }
    }
}

/// The fused activations the backend applies in its epilogue.
pub fn map_to_gemm_activation(act: &ActivationLayerInfo) -> Activation {
    match act.activation() {
        Some(ActivationFunction::Relu) => Activation::ReLU,
        Some(ActivationFunction::BoundedRelu) => Activation::BoundedReLU {
            param1: act.a(),
            param2: 0.0,
        },
        Some(ActivationFunction::LuBoundedRelu) => Activation::BoundedReLU {
            param1: act.a(),
            param2: act.b(),
        },
        _ => Activation::None,
    }
}

/// Assembly GEMM operator. See the [module documentation](self).
#[derive(Default)]
pub struct CpuGemmAssemblyDispatch {
    ctx: OperatorContext,
    arm_gemm: Option<Box<dyn AsmFallback>>,
}

impl CpuGemmAssemblyDispatch {
    const OP: &'static str = "CpuGemmAssemblyDispatch";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self { ctx, arm_gemm: None }
    }

    /// Checks whether the backend serves `a x b -> d`.
    ///
    /// `c` is the optional bias. The check covers data types, the CPU's
    /// half-precision support and, when the backend would pick a
    /// fixed-format kernel, the weight format the caller asked for.
    pub fn validate(
        a: &TensorInfo,
        b: &TensorInfo,
        c: Option<&TensorInfo>,
        d: &TensorInfo,
        info: &AsmGemmInfo,
        cpu: &CpuInfo,
    ) -> Status {
        validate::cpu_f16_supported(Self::OP, a, cpu.has_fp16())?;
        validate::cpu_bf16_supported(Self::OP, a, cpu.has_bf16())?;
        validate::data_type_in(
            Self::OP,
            a,
            &[
                DataType::U8,
                DataType::QAsymm8,
                DataType::QAsymm8Signed,
                DataType::S8,
                DataType::BFloat16,
                DataType::F16,
                DataType::F32,
            ],
        )?;
        validate::data_type_in(
            Self::OP,
            b,
            &[
                DataType::U8,
                DataType::QAsymm8,
                DataType::QAsymm8Signed,
                DataType::QSymm8PerChannel,
                DataType::S8,
                DataType::BFloat16,
                DataType::F16,
                DataType::F32,
            ],
        )?;
        if b.data_type().is_quantized_per_channel() {
            validate::data_type_in(Self::OP, a, &[DataType::QAsymm8Signed, DataType::S8])?;
        } else if !(a.data_type() == DataType::QAsymm8 && b.data_type() == DataType::QAsymm8Signed) {
            validate::matching_data_types(Self::OP, a, b)?;
        }
        let allowed_out: &[DataType] = match a.data_type() {
            DataType::F32 => &[DataType::F32],
            DataType::F16 => &[DataType::F16],
            DataType::BFloat16 => &[DataType::F32],
            DataType::U8 => &[DataType::U32, DataType::S32],
            DataType::S8 => &[DataType::S32],
            DataType::QAsymm8 => &[DataType::QAsymm8, DataType::S32, DataType::F32],
            _ => &[DataType::QAsymm8Signed, DataType::S32, DataType::F32],
        };
        validate::data_type_in(Self::OP, d, allowed_out)?;

        // Kernel availability does not depend on the thread count, only the
        // recommendation does, so the full core count is enough here.
        let expected = Self::has_opt_impl(a, b, c, d, info, cpu, cpu.num_cpus())?;
        if !matches!(expected, WeightFormat::Any | WeightFormat::Unspecified) && expected != info.weight_format {
            return Err(ComputeError::invalid(
                Self::OP,
                format!(
                    "the kernel expects {expected:?} weights but {:?} was requested",
                    info.weight_format
                ),
            ));
        }
        Ok(())
    }

    /// Weight format of the kernel the backend would pick, without building it.
    ///
    /// `WeightFormat::Unspecified` means `B` is pretransposed at prepare
    /// time; a blocked format means `B` must already be in that layout.
    pub fn has_opt_impl(
        a: &TensorInfo,
        b: &TensorInfo,
        _c: Option<&TensorInfo>,
        d: &TensorInfo,
        info: &AsmGemmInfo,
        cpu: &CpuInfo,
        num_threads: usize,
    ) -> Result<WeightFormat, ComputeError> {
        factory::has_opt_impl(a, b, d, info, cpu, num_threads).ok_or_else(|| ComputeError::NoMicroKernel {
            op: Self::OP,
            detail: format!(
                "{} x {} -> {} ({:?})",
                a.data_type(),
                b.data_type(),
                d.data_type(),
                info.method
            ),
        })
    }

    pub fn is_activation_supported(act: &ActivationLayerInfo) -> bool {
        !map_to_gemm_activation(act).is_none()
    }

    /// Builds the backend GEMM for `a x b -> d`.
    ///
    /// Combinations [`validate`](Self::validate) rejects, including those
    /// with no kernel on this CPU, leave the dispatcher unconfigured.
    pub fn configure(
        &mut self,
        a: &TensorInfo,
        b: &TensorInfo,
        c: Option<&TensorInfo>,
        d: &TensorInfo,
        info: &AsmGemmInfo,
    ) {
        self.arm_gemm = None;
        if let Err(e) = Self::validate(a, b, c, d, info, self.ctx.cpu_info()) {
            tracing::debug!(error = %e, "assembly GEMM not available");
            return;
        }
        self.arm_gemm = factory::create(&self.ctx, a, b, d, info);
        match &self.arm_gemm {
            Some(g) => tracing::info!(kernel = g.kernel_name(), method = %g.method(), "configured assembly GEMM"),
            None => tracing::debug!(a = %a.data_type(), d = %d.data_type(), "backend has no GEMM for these types"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.arm_gemm.as_ref().is_some_and(|g| g.is_configured())
    }

    /// Name of the backend kernel, once configured.
    pub fn kernel_name(&self) -> Option<&str> {
        self.arm_gemm.as_ref().map(|g| g.kernel_name())
    }

    pub fn gemm_method(&self) -> Option<GemmMethod> {
        self.arm_gemm.as_ref().map(|g| g.method())
    }

    pub fn gemm_config(&self) -> Option<GemmConfig> {
        self.arm_gemm.as_ref().map(|g| g.get_config())
    }

    /// Installs new requantization parameters for dynamically quantized inputs.
    ///
    /// `is_prepared` is stored as the new prepared state: pass `false` to
    /// redo the prepare-time work (column sums of `B`) on the next run.
    pub fn update_quantization_parameters(
        &mut self,
        output: &GemmLowpOutputStageInfo,
        a: &QuantizationInfo,
        b: &QuantizationInfo,
        is_prepared: bool,
        negated_offsets: bool,
    ) {
        let Some(g) = self.arm_gemm.as_mut() else {
            panic!("{}::update_quantization_parameters called before configure", Self::OP);
        };
        g.update_quantization_parameters(output, a, b, is_prepared, negated_offsets);
    }
}

impl Operator for CpuGemmAssemblyDispatch {
    fn prepare(&mut self, tensors: &TensorPack) {
        let Some(g) = self.arm_gemm.as_mut() else {
            panic!("{}::prepare called on an unconfigured dispatcher", Self::OP);
        };
        g.prepare(&self.ctx, tensors);
    }

    fn run(&mut self, tensors: &TensorPack) {
        let Some(g) = self.arm_gemm.as_mut() else {
            panic!("{}::run called on an unconfigured dispatcher", Self::OP);
        };
        g.run(&self.ctx, tensors);
    }

    fn workspace(&self) -> MemoryRequirements {
        self.arm_gemm.as_ref().map(|g| g.workspace()).unwrap_or_default()
    }
}

impl std::fmt::Debug for CpuGemmAssemblyDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuGemmAssemblyDispatch")
            .field("kernel", &self.kernel_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_info::CpuIsa;
    use tensor_core::TensorShape;

    type AsmGemm = CpuGemmAssemblyDispatch;

    fn info(dims: &[usize], dt: DataType) -> TensorInfo {
        TensorInfo::new(TensorShape::new(dims), dt)
    }

    #[test]
    fn test_validate_output_types() {
        let cpu = CpuInfo::with_isa(CpuIsa::default(), 1);
        let asm = AsmGemmInfo::default();
        let f32_ok = AsmGemm::validate(
            &info(&[3, 4], DataType::F32),
            &info(&[5, 3], DataType::F32),
            None,
            &info(&[5, 4], DataType::F32),
            &asm,
            &cpu,
        );
        assert!(f32_ok.is_ok());
        let wrong_out = AsmGemm::validate(
            &info(&[3, 4], DataType::F32),
            &info(&[5, 3], DataType::F32),
            None,
            &info(&[5, 4], DataType::S32),
            &asm,
            &cpu,
        );
        assert!(wrong_out.is_err());
        let mismatched = AsmGemm::validate(
            &info(&[3, 4], DataType::S8),
            &info(&[5, 3], DataType::U8),
            None,
            &info(&[5, 4], DataType::S32),
            &asm,
            &cpu,
        );
        assert!(matches!(mismatched, Err(ComputeError::MismatchingDataTypes { .. })));
    }

    #[test]
    fn test_mixed_sign_quantized_needs_i8mm() {
        let a = info(&[3, 4], DataType::QAsymm8);
        let b = info(&[5, 3], DataType::QAsymm8Signed);
        let d = info(&[5, 4], DataType::S32);
        let asm = AsmGemmInfo::default();

        let plain = CpuInfo::with_isa(CpuIsa::default(), 1);
        let err = AsmGemm::validate(&a, &b, None, &d, &asm, &plain).unwrap_err();
        assert!(matches!(err, ComputeError::NoMicroKernel { .. }), "{err}");

        let v9 = CpuInfo::with_isa(CpuIsa::armv9(), 1);
        assert!(AsmGemm::validate(&a, &b, None, &d, &asm, &v9).is_ok());
    }

    #[test]
    fn test_mixed_sign_to_f32_has_no_kernel() {
        let a = info(&[3, 4], DataType::QAsymm8);
        let b = info(&[5, 3], DataType::QAsymm8Signed);
        let d = info(&[5, 4], DataType::F32);
        for isa in [CpuIsa::default(), CpuIsa::armv9()] {
            let cpu = CpuInfo::with_isa(isa, 1);
            let err = AsmGemm::validate(&a, &b, None, &d, &AsmGemmInfo::default(), &cpu).unwrap_err();
            assert!(matches!(err, ComputeError::NoMicroKernel { .. }), "{err}");
        }
    }

    #[test]
    fn test_validate_agrees_with_configure() {
        let a = info(&[3, 4], DataType::QAsymm8);
        let b = info(&[5, 3], DataType::QAsymm8Signed);
        let d = info(&[5, 4], DataType::S32);
        let asm = AsmGemmInfo::default();
        for threads in [1, 4] {
            let ctx = crate::test_context(threads);
            let accepted = AsmGemm::validate(&a, &b, None, &d, &asm, ctx.cpu_info()).is_ok();
            let mut op = CpuGemmAssemblyDispatch::with_context(ctx);
            op.configure(&a, &b, None, &d, &asm);
            assert_eq!(accepted, op.is_configured());
            assert!(!accepted);
        }
    }

    #[test]
    fn test_activation_mapping() {
        assert!(AsmGemm::is_activation_supported(&ActivationLayerInfo::new(
            ActivationFunction::Relu,
            0.0,
            0.0
        )));
        assert!(!AsmGemm::is_activation_supported(&ActivationLayerInfo::new(
            ActivationFunction::Tanh,
            1.0,
            1.0
        )));
        let act = map_to_gemm_activation(&ActivationLayerInfo::new(ActivationFunction::LuBoundedRelu, 6.0, -1.0));
        assert_eq!(
            act,
            Activation::BoundedReLU {
                param1: 6.0,
                param2: -1.0
            }
        );
    }

    #[test]
    fn test_unsupported_types_leave_it_unconfigured() {
        let mut op = CpuGemmAssemblyDispatch::with_context(crate::test_context(1));
        op.configure(
            &info(&[3, 4], DataType::S16),
            &info(&[5, 3], DataType::S16),
            None,
            &info(&[5, 4], DataType::S32),
            &AsmGemmInfo::default(),
        );
        assert!(!op.is_configured());
        assert!(op.workspace().is_empty());
    }
}
