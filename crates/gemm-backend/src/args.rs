// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Problem descriptors handed to the catalogue.

use cpu_info::CpuInfo;
use std::fmt;

/// Family of a GEMM implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum GemmMethod {
    /// No constraint (in a [`GemmConfig`]) or no implementation.
    #[default]
    Default,
    /// `M == 1` problems with batches, recast as one GEMM over the batches.
    GemvBatched,
    GemvPretransposed,
    /// Row-panel kernels reading `A` in place (supports indirect input).
    GemmHybrid,
    /// Kernels packing blocks of `A` into per-thread working space.
    GemmInterleaved,
    /// Interleaved kernels over a 2-D (rows x columns) work space.
    GemmInterleaved2d,
    /// A raw integer GEMM followed by a separate requantization pass.
    QuantizeWrapper,
    QuantizeWrapper2d,
}

impl GemmMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            GemmMethod::Default => "DEFAULT",
            GemmMethod::GemvBatched => "GEMV_BATCHED",
            GemmMethod::GemvPretransposed => "GEMV_PRETRANSPOSED",
            GemmMethod::GemmHybrid => "GEMM_HYBRID",
            GemmMethod::GemmInterleaved => "GEMM_INTERLEAVED",
            GemmMethod::GemmInterleaved2d => "GEMM_INTERLEAVED_2D",
            GemmMethod::QuantizeWrapper => "QUANTIZE_WRAPPER",
            GemmMethod::QuantizeWrapper2d => "QUANTIZE_WRAPPER_2D",
        }
    }
}

impl fmt::Display for GemmMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout of `B` expected by fixed-format kernels.
///
/// `OhwioN` interleaves `N` output channels; blocked formats read `B`
/// directly without a pretranspose pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum WeightFormat {
    #[default]
    Unspecified,
    Any,
    Ohwi,
    Ohwio4,
    Ohwio8,
    Ohwio16,
}

impl WeightFormat {
    /// Number of interleaved output channels.
    pub fn interleave_by(self) -> usize {
        match self {
            WeightFormat::Ohwio4 => 4,
            WeightFormat::Ohwio8 => 8,
            WeightFormat::Ohwio16 => 16,
            _ => 1,
        }
    }

    pub fn is_fixed_format(self) -> bool {
        matches!(self, WeightFormat::Ohwio4 | WeightFormat::Ohwio8 | WeightFormat::Ohwio16)
    }
}

/// Fused activation of a GEMM.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub enum Activation {
    #[default]
    None,
    ReLU,
    /// `min(upper, max(0, x))` with `upper = param1`, or `min(param1, max(param2, x))`.
    BoundedReLU { param1: f32, param2: f32 },
}

impl Activation {
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match *self {
            Activation::None => x,
            Activation::ReLU => x.max(0.0),
            Activation::BoundedReLU { param1, param2 } => x.max(param2).min(param1),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Activation::None)
    }
}

/// Optional constraints on implementation choice.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct GemmConfig {
    pub method: GemmMethod,
    /// Only implementations whose name contains this string qualify.
    pub filter: String,
    /// K block size (0 lets the implementation choose).
    pub inner_block_size: usize,
    /// N block size (0 lets the implementation choose).
    pub outer_block_size: usize,
    pub weight_format: WeightFormat,
}

impl GemmConfig {
    pub fn with_method(method: GemmMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }
}

/// Shape and environment of one GEMM problem.
///
/// `ksections > 1` describes convolution-as-GEMM: the reduction runs over
/// `ksections` blocks of `k` elements each (one block per kernel tap).
#[derive(Debug, Clone)]
pub struct GemmArgs {
    pub ci: CpuInfo,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub ksections: usize,
    pub nbatches: usize,
    pub nmulti: usize,
    pub indirect_input: bool,
    pub act: Activation,
    pub maxthreads: usize,
    pub fixed_format: bool,
    pub fast_mode: bool,
    pub weight_format: WeightFormat,
    pub cfg: Option<GemmConfig>,
}

impl GemmArgs {
    /// A plain GEMM with a single batch, multi and section.
    ///
    /// # Example
    /// ```
    /// use cpu_info::{CpuInfo, CpuIsa};
    /// use gemm_backend::GemmArgs;
    /// let args = GemmArgs::new(CpuInfo::with_isa(CpuIsa::default(), 4), 4, 5, 3);
    /// assert_eq!(args.maxthreads, 4);
    /// assert_eq!(args.total_k(), 3);
    /// ```
    pub fn new(ci: CpuInfo, m: usize, n: usize, k: usize) -> Self {
        let maxthreads = ci.num_cpus();
        Self {
            ci,
            m,
            n,
            k,
            ksections: 1,
            nbatches: 1,
            nmulti: 1,
            indirect_input: false,
            act: Activation::None,
            maxthreads,
            fixed_format: false,
            fast_mode: false,
            weight_format: WeightFormat::Any,
            cfg: None,
        }
    }

    pub fn with_batches(mut self, nbatches: usize, nmulti: usize) -> Self {
        self.nbatches = nbatches.max(1);
        self.nmulti = nmulti.max(1);
        self
    }

    pub fn with_sections(mut self, ksections: usize, indirect_input: bool) -> Self {
        self.ksections = ksections.max(1);
        self.indirect_input = indirect_input;
        self
    }

    pub fn with_activation(mut self, act: Activation) -> Self {
        self.act = act;
        self
    }

    pub fn with_threads(mut self, maxthreads: usize) -> Self {
        self.maxthreads = maxthreads.max(1);
        self
    }

    pub fn with_fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    pub fn with_fixed_format(mut self, fixed_format: bool, weight_format: WeightFormat) -> Self {
        self.fixed_format = fixed_format;
        self.weight_format = weight_format;
        self
    }

    pub fn with_config(mut self, cfg: GemmConfig) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Reduction length across every section.
    pub fn total_k(&self) -> usize {
        self.k * self.ksections
    }
}

/// Geometry of a convolution run directly by an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConvolutionParameters {
    pub input_width: usize,
    pub input_height: usize,
    pub input_channels: usize,
    pub kernel_width: usize,
    pub kernel_height: usize,
    pub output_width: usize,
    pub output_height: usize,
    pub output_stride_w: usize,
    pub output_stride_h: usize,
    pub padding_top: usize,
    pub padding_left: usize,
    /// Value read for taps outside the input (a zero point, or 0).
    pub padding_value: f32,
}

/// Describes one catalogue entry, as reported by
/// [`get_gemm_method`](crate::get_gemm_method) and
/// [`get_compatible_kernels`](crate::get_compatible_kernels).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct KernelDescription {
    pub method: GemmMethod,
    pub name: String,
    /// `true` for the entry the catalogue would pick.
    pub is_default: bool,
    pub weight_format: WeightFormat,
}

impl Default for KernelDescription {
    fn default() -> Self {
        Self {
            method: GemmMethod::Default,
            name: String::new(),
            is_default: false,
            weight_format: WeightFormat::Unspecified,
        }
    }
}
