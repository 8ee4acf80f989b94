// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `d = alpha * (a x b) + beta * c`, followed by an optional activation.
//!
//! ```text
//!               assembly backend available?
//!             yes │                    │ no
//!                 ▼                    ▼
//!   CpuGemmAssemblyDispatch      interleave A ─┐
//!   (bias fused when beta == 1)  transpose B ──┼─► matrix multiply ─► + bias
//!   alpha as a linear activation               │   (alpha folded in)
//!                 │                            │
//!                 └──────────┬─────────────────┘
//!                            ▼
//!               + beta * c (beta ∉ {0, 1}) ─► activation
//! ```

use crate::gemm_assembly::{AsmGemmInfo, CpuGemmAssemblyDispatch};
use crate::operator::required;
use crate::{CpuActivation, CpuAdd, Operator, OperatorContext};
use cpu_info::CpuInfo;
use cpu_kernels::{
    CpuGemmInterleave4x4Kernel, CpuGemmMatrixAdditionKernel, CpuGemmMatrixMultiplyKernel, CpuGemmTranspose1xWKernel,
    GemmReshapeInfo,
};
use memory_manager::{AuxTensorHandler, MemoryInfo, MemoryLifetime, MemoryRequirements, PersistentSlots};
use runtime::CpuKernel;
use std::sync::Arc;
use tensor_core::{
    validate, ActivationFunction, ActivationLayerInfo, ComputeError, ConvertPolicy, DataType, GemmInfo, Status,
    Tensor, TensorInfo, TensorPack, TensorShape, TensorType, WeightFormat, Window,
};

const OP: &str = "CpuGemm";

// Slots 0..=2 belong to the assembly dispatch.
const INTERLEAVED_LHS: u32 = 3;
const TRANSPOSED_RHS: u32 = 4;
const TEMP_RESULT: u32 = 5;

const TRANSPOSED_RHS_ALIGNMENT: usize = 64;

/// Shape of `d` for `a x b`, honouring the 3-D reinterpretations.
fn compute_output_shape(a: &TensorInfo, b: &TensorInfo, info: &GemmInfo) -> TensorShape {
    let n = if info.pretranspose_b { b.dimension(1) } else { b.dimension(0) };
    let mut shape = *a.shape();
    shape.set(0, n);
    if info.depth_output_gemm3d != 0 && !info.reinterpret_input_as_3d {
        let depth = info.depth_output_gemm3d;
        shape.set(1, a.dimension(1) / depth);
        shape.set(2, depth);
        shape.set(3, a.dimension(2));
    }
    shape
}

/// Whether the assembly path can take the whole GEMM.
///
/// The backend has no `beta` coefficient and batches a non-constant `B`
/// differently from the portable kernels.
fn use_assembly(
    a: &TensorInfo,
    b: &TensorInfo,
    c: Option<&TensorInfo>,
    d: &TensorInfo,
    beta: f32,
    asm_info: &AsmGemmInfo,
    cpu: &CpuInfo,
) -> bool {
    let bias = if beta == 1.0 { c } else { None };
    CpuGemmAssemblyDispatch::validate(a, b, bias, d, asm_info, cpu).is_ok()
        && (c.is_none() || beta == 0.0 || beta == 1.0)
        && !(!b.are_values_constant() && b.shape().z() > 1)
}

/// General matrix multiplication.
///
/// `a` is `[K, M, ..]`, `b` is `[N, K, ..]` (`[K, N]` with
/// `GemmInfo::pretranspose_b`) and `d` is `[N, M, ..]`. A constant `b` is
/// reshaped once by `prepare` and kept in a persistent slot.
#[derive(Default)]
pub struct CpuGemm {
    ctx: OperatorContext,
    asm_glue: Option<CpuGemmAssemblyDispatch>,
    interleave: Option<CpuGemmInterleave4x4Kernel>,
    transpose: Option<CpuGemmTranspose1xWKernel>,
    mm: Option<CpuGemmMatrixMultiplyKernel>,
    add_bias: Option<CpuAdd>,
    ma: Option<CpuGemmMatrixAdditionKernel>,
    alpha_scale: Option<CpuActivation>,
    activation: Option<CpuActivation>,
    tmp_a: TensorInfo,
    tmp_b: TensorInfo,
    tmp_d: TensorInfo,
    reshape_b_only_on_first_run: bool,
    run_vector_matrix_multiplication: bool,
    run_bias_addition: bool,
    transposed_b: Option<Tensor>,
    persistent: PersistentSlots,
    aux_mem: MemoryRequirements,
    is_prepared: bool,
}

impl CpuGemm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(ctx: OperatorContext) -> Self {
        Self {
            ctx,
            ..Self::default()
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn validate(
        a: &TensorInfo,
        b: &TensorInfo,
        c: Option<&TensorInfo>,
        d: &TensorInfo,
        alpha: f32,
        beta: f32,
        info: &GemmInfo,
        cpu: &CpuInfo,
    ) -> Status {
        let is_c_bias = beta == 1.0 && c.is_some();
        let run_addition = c.is_some() && beta != 0.0 && beta != 1.0;

        validate::cpu_f16_supported(OP, a, cpu.has_fp16())?;
        validate::cpu_bf16_supported(OP, a, cpu.has_bf16())?;
        validate::data_type_in(OP, a, &[DataType::BFloat16, DataType::F16, DataType::F32])?;
        validate::matching_data_types(OP, a, b)?;

        let (n, k_b) = if info.pretranspose_b {
            (b.dimension(1), b.dimension(0))
        } else {
            (b.dimension(0), b.dimension(1))
        };
        let block_by = info.weight_format.interleave_by();
        if a.dimension(0) != k_b && !(info.fixed_format && block_by > 1 && a.dimension(0) % block_by == 0) {
            return Err(ComputeError::invalid(
                OP,
                format!(
                    "columns of A ({}) must equal rows of B ({k_b})",
                    a.dimension(0)
                ),
            ));
        }
        if a.data_type() != DataType::BFloat16 && d.is_initialised() {
            validate::matching_data_types(OP, a, d)?;
        }

        if let Some(c) = c.filter(|_| run_addition) {
            if info.depth_output_gemm3d != 0 || info.reinterpret_input_as_3d {
                return Err(ComputeError::invalid(OP, "beta * C cannot be combined with 3-D reinterpretation"));
            }
            if d.is_initialised() {
                validate::matching_data_types(OP, c, d)?;
            }
            if a.dimension(1) != c.dimension(1) || n != c.dimension(0) {
                return Err(ComputeError::invalid(
                    OP,
                    format!(
                        "C must be [{n}, {}], got [{}, {}]",
                        a.dimension(1),
                        c.dimension(0),
                        c.dimension(1)
                    ),
                ));
            }
        }

        if d.is_initialised() {
            if !info.fixed_format && n != d.dimension(0) {
                return Err(ComputeError::invalid(
                    OP,
                    format!("dst columns: expected {n}, got {}", d.dimension(0)),
                ));
            }
            let rows_match = match (info.depth_output_gemm3d, info.reinterpret_input_as_3d) {
                (0, _) => a.dimension(1) == d.dimension(1),
                (_, true) => a.dimension(1) == d.dimension(1) && a.dimension(2) == d.dimension(2),
                (_, false) => a.dimension(1) == d.dimension(1) * d.dimension(2),
            };
            if !rows_match {
                return Err(ComputeError::invalid(OP, "dst rows do not match the rows of A"));
            }
        }

        let mut d_info = d.clone();
        if !d_info.is_initialised() {
            d_info = output_info(a, b, info);
        }
        let asm_info = AsmGemmInfo::from_gemm_info(info);
        if !use_assembly(a, b, c, &d_info, beta, &asm_info, cpu) {
            if info.reinterpret_input_as_3d {
                return Err(ComputeError::invalid(OP, "cannot reinterpret the input as 3-D without the assembly path"));
            }
            if info.depth_output_gemm3d != 0 {
                return Err(ComputeError::invalid(OP, "cannot reinterpret the output as 3-D without the assembly path"));
            }
            if info.pretranspose_b {
                return Err(ComputeError::invalid(OP, "a transposed B needs the assembly path"));
            }
            let is_vector = a.dimension(1) < 2;
            let reshape_info = GemmReshapeInfo::new(a.dimension(1), b.dimension(0), a.dimension(0));
            let mut tmp_d = TensorInfo::empty();
            if is_vector {
                CpuGemmMatrixMultiplyKernel::configure(a, b, &mut tmp_d, alpha, false, &reshape_info, cpu)?;
            } else {
                let mut tmp_a = TensorInfo::empty();
                let mut tmp_b = TensorInfo::empty();
                CpuGemmInterleave4x4Kernel::configure(a, &mut tmp_a)?;
                CpuGemmTranspose1xWKernel::configure(b, &mut tmp_b)?;
                CpuGemmMatrixMultiplyKernel::configure(&tmp_a, &tmp_b, &mut tmp_d, alpha, true, &reshape_info, cpu)?;
            }
            if let Some(c) = c.filter(|_| is_c_bias) {
                CpuAdd::validate(&tmp_d, c, &d_info, cpu)?;
            }
        }

        if let Some(c) = c.filter(|_| run_addition) {
            CpuGemmMatrixAdditionKernel::validate(c, &d_info, cpu)?;
        }
        if info.activation.enabled() {
            CpuActivation::validate(&d_info, &d_info, &info.activation, cpu)?;
        }
        Ok(())
    }

    /// Builds the pipeline and initialises an empty `d`.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        &mut self,
        a: &TensorInfo,
        b: &TensorInfo,
        c: Option<&TensorInfo>,
        d: &mut TensorInfo,
        alpha: f32,
        beta: f32,
        info: &GemmInfo,
    ) -> Status {
        if !d.is_initialised() {
            *d = output_info(a, b, info);
        }
        let cpu = self.ctx.cpu_info().clone();
        Self::validate(a, b, c, d, alpha, beta, info, &cpu)?;

        let asm_info = AsmGemmInfo::from_gemm_info(info);
        let is_c_bias = beta == 1.0 && c.is_some();
        let run_optimised = use_assembly(a, b, c, d, beta, &asm_info, &cpu);

        *self = Self::with_context(self.ctx.clone());
        self.reshape_b_only_on_first_run = b.are_values_constant();
        self.run_vector_matrix_multiplication = a.dimension(1) < 2;
        self.run_bias_addition = is_c_bias;
        let run_addition = beta != 0.0 && beta != 1.0 && c.is_some();
        let run_activation = info.activation.enabled()
            && (!run_optimised || !CpuGemmAssemblyDispatch::is_activation_supported(&info.activation));

        if run_optimised {
            let mut glue = CpuGemmAssemblyDispatch::with_context(self.ctx.clone());
            glue.configure(a, b, if is_c_bias { c } else { None }, d, &asm_info);
            if !glue.is_configured() {
                return Err(ComputeError::invalid(OP, "assembly dispatch accepted the GEMM but built nothing"));
            }
            self.aux_mem.extend(glue.workspace());
            tracing::info!(kernel = glue.kernel_name().unwrap_or_default(), "CpuGemm uses the assembly path");
            self.asm_glue = Some(glue);
            if alpha != 1.0 {
                let mut op = CpuActivation::with_context(self.ctx.clone());
                op.configure(
                    d,
                    &mut d.clone(),
                    ActivationLayerInfo::new(ActivationFunction::Linear, alpha, 0.0),
                )?;
                self.alpha_scale = Some(op);
            }
        } else {
            let m = a.dimension(1);
            let n = b.dimension(0);
            let k = a.dimension(0);
            let mut mm_out = if self.run_bias_addition {
                TensorInfo::empty()
            } else {
                d.clone()
            };
            let mm = if self.run_vector_matrix_multiplication {
                CpuGemmMatrixMultiplyKernel::configure(a, b, &mut mm_out, alpha, false, &GemmReshapeInfo::default(), &cpu)?
            } else {
                self.interleave = Some(CpuGemmInterleave4x4Kernel::configure(a, &mut self.tmp_a)?);
                self.aux_mem.push(MemoryInfo::new(
                    tensor_core::offset_int_vec(INTERLEAVED_LHS),
                    MemoryLifetime::Temporary,
                    self.tmp_a.total_size(),
                ));
                self.transpose = Some(CpuGemmTranspose1xWKernel::configure(b, &mut self.tmp_b)?);
                let lifetime = if self.reshape_b_only_on_first_run {
                    MemoryLifetime::Persistent
                } else {
                    MemoryLifetime::Temporary
                };
                self.aux_mem.push(
                    MemoryInfo::new(
                        tensor_core::offset_int_vec(TRANSPOSED_RHS),
                        lifetime,
                        self.tmp_b.total_size(),
                    )
                    .with_alignment(TRANSPOSED_RHS_ALIGNMENT),
                );
                CpuGemmMatrixMultiplyKernel::configure(
                    &self.tmp_a,
                    &self.tmp_b,
                    &mut mm_out,
                    alpha,
                    true,
                    &GemmReshapeInfo::new(m, n, k),
                    &cpu,
                )?
            };
            tracing::info!(kernel = mm.name(), "CpuGemm uses the portable path");
            self.mm = Some(mm);

            if let Some(c) = c.filter(|_| self.run_bias_addition) {
                let mut add = CpuAdd::with_context(self.ctx.clone());
                add.configure(&mm_out, c, &mut d.clone(), ConvertPolicy::Saturate)?;
                self.aux_mem.push(MemoryInfo::new(
                    tensor_core::offset_int_vec(TEMP_RESULT),
                    MemoryLifetime::Temporary,
                    mm_out.total_size(),
                ));
                self.tmp_d = mm_out;
                self.add_bias = Some(add);
            }
        }

        if let Some(c) = c.filter(|_| run_addition) {
            self.ma = Some(CpuGemmMatrixAdditionKernel::configure(c, d, beta, &cpu)?);
        }
        if run_activation {
            let mut op = CpuActivation::with_context(self.ctx.clone());
            op.configure(d, &mut d.clone(), info.activation)?;
            self.activation = Some(op);
        }
        Ok(())
    }

    /// Weight format the assembly backend expects for `b`.
    pub fn has_opt_impl(
        a: &TensorInfo,
        b: &TensorInfo,
        c: Option<&TensorInfo>,
        d: &TensorInfo,
        info: &GemmInfo,
        cpu: &CpuInfo,
    ) -> Result<WeightFormat, ComputeError> {
        let asm_info = AsmGemmInfo::from_gemm_info(info);
        CpuGemmAssemblyDispatch::has_opt_impl(a, b, c, d, &asm_info, cpu, cpu.num_cpus())
    }

    /// `true` when the assembly backend runs the multiplication.
    pub fn is_optimised(&self) -> bool {
        self.asm_glue.as_ref().is_some_and(CpuGemmAssemblyDispatch::is_configured)
    }

    /// Name of the kernel doing the multiplication.
    pub fn kernel_name(&self) -> Option<&str> {
        match (&self.asm_glue, &self.mm) {
            (Some(glue), _) => glue.kernel_name(),
            (None, Some(mm)) => Some(mm.name()),
            (None, None) => None,
        }
    }

    /// The pack the assembly dispatch sees: `SRC_2` only when it is the bias.
    fn asm_pack(&self, tensors: &TensorPack) -> TensorPack {
        let mut pack = tensors.clone();
        if !self.run_bias_addition {
            pack.remove(TensorType::Src2);
        }
        pack
    }

    fn run_portable(&mut self, tensors: &TensorPack) {
        let a = required(tensors, OP, TensorType::Src0);
        let b = required(tensors, OP, TensorType::Src1);
        let d = required(tensors, OP, TensorType::DST);
        let Some(mm) = &self.mm else {
            panic!("{OP}::run called before configure");
        };

        let temp_d = self
            .run_bias_addition
            .then(|| AuxTensorHandler::new(tensor_core::offset_int_vec(TEMP_RESULT), &self.tmp_d, tensors, false));
        let mm_dst = temp_d.as_ref().map_or_else(|| Arc::clone(&d), AuxTensorHandler::to_arc);

        let mut mm_pack = TensorPack::new()
            .with_const(TensorType::Src0, Arc::clone(&a))
            .with_const(TensorType::Src1, Arc::clone(&b))
            .with(TensorType::DST, Arc::clone(&mm_dst));
        let mut _transient = None;
        if let (Some(interleave), Some(transpose)) = (&self.interleave, &self.transpose) {
            let interleaved_a =
                AuxTensorHandler::new(tensor_core::offset_int_vec(INTERLEAVED_LHS), &self.tmp_a, tensors, false);
            let pack = TensorPack::new()
                .with_const(TensorType::SRC, Arc::clone(&a))
                .with(TensorType::DST, interleaved_a.to_arc());
            self.ctx.schedule_split(interleave, Window::DIM_Y, &pack);

            let transposed_b = match &self.transposed_b {
                Some(t) => Arc::new(t.clone()),
                None => {
                    let handler =
                        AuxTensorHandler::new(tensor_core::offset_int_vec(TRANSPOSED_RHS), &self.tmp_b, tensors, false);
                    let t = handler.to_arc();
                    let pack = TensorPack::new()
                        .with_const(TensorType::SRC, Arc::clone(&b))
                        .with(TensorType::DST, Arc::clone(&t));
                    self.ctx.schedule_split(transpose, Window::DIM_Y, &pack);
                    _transient = Some(handler);
                    t
                }
            };
            mm_pack.add_const_tensor(TensorType::Src0, interleaved_a.to_arc());
            mm_pack.add_const_tensor(TensorType::Src1, transposed_b);
        }
        let split = if self.run_vector_matrix_multiplication {
            Window::DIM_X
        } else {
            Window::DIM_Y
        };
        self.ctx.schedule_split(mm, split, &mm_pack);

        if let Some(add) = self.add_bias.as_mut() {
            let c = required(tensors, OP, TensorType::Src2);
            let pack = TensorPack::new()
                .with_const(TensorType::Src0, mm_dst)
                .with_const(TensorType::Src1, c)
                .with(TensorType::DST, d);
            add.run(&pack);
        }
    }
}

/// Descriptor `configure` gives an empty `d`.
fn output_info(a: &TensorInfo, b: &TensorInfo, info: &GemmInfo) -> TensorInfo {
    let dt = match a.data_type() {
        DataType::BFloat16 => DataType::F32,
        dt => dt,
    };
    a.clone()
        .with_shape(compute_output_shape(a, b, info))
        .with_data_type(dt)
}

impl Operator for CpuGemm {
    fn prepare(&mut self, tensors: &TensorPack) {
        if self.is_prepared {
            return;
        }
        if self.asm_glue.is_some() {
            let pack = self.asm_pack(tensors);
            if let Some(glue) = self.asm_glue.as_mut() {
                glue.prepare(&pack);
            }
        } else if self.reshape_b_only_on_first_run {
            if let Some(transpose) = &self.transpose {
                let b = required(tensors, OP, TensorType::Src1);
                let dst = self.persistent.resolve(
                    tensor_core::offset_int_vec(TRANSPOSED_RHS),
                    &self.tmp_b,
                    TRANSPOSED_RHS_ALIGNMENT,
                    tensors,
                );
                let pack = TensorPack::new()
                    .with_const(TensorType::SRC, b)
                    .with(TensorType::DST, Arc::new(dst.clone()));
                self.ctx.schedule_split(transpose, Window::DIM_Y, &pack);
                self.transposed_b = Some(dst);
            }
        }
        self.is_prepared = true;
    }

    fn run(&mut self, tensors: &TensorPack) {
        self.prepare(tensors);
        let d = required(tensors, OP, TensorType::DST);

        if self.asm_glue.is_some() {
            let pack = self.asm_pack(tensors);
            if let Some(glue) = self.asm_glue.as_mut() {
                glue.run(&pack);
            }
            if let Some(scale) = self.alpha_scale.as_mut() {
                let pack = TensorPack::new()
                    .with_const(TensorType::SRC, Arc::clone(&d))
                    .with(TensorType::DST, Arc::clone(&d));
                scale.run(&pack);
            }
        } else {
            self.run_portable(tensors);
        }

        if let Some(ma) = &self.ma {
            let c = required(tensors, OP, TensorType::Src2);
            let pack = TensorPack::new()
                .with_const(TensorType::SRC, c)
                .with(TensorType::DST, Arc::clone(&d));
            self.ctx.schedule_split(ma, Window::DIM_Y, &pack);
        }
        if let Some(act) = self.activation.as_mut() {
            let pack = TensorPack::new()
                .with_const(TensorType::SRC, Arc::clone(&d))
                .with(TensorType::DST, d);
            act.run(&pack);
        }
    }

    fn workspace(&self) -> MemoryRequirements {
        self.aux_mem.clone()
    }
}

impl std::fmt::Debug for CpuGemm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuGemm")
            .field("kernel", &self.kernel_name())
            .field("optimised", &self.is_optimised())
            .finish()
    }
}
