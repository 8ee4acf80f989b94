// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer descriptors passed to kernels and operators at configure time.

use crate::{DataLayout, DataType, TensorShape, MAX_DIMS};

// ── Activation ──────────────────────────────────────────────────

/// Element-wise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ActivationFunction {
    Logistic,
    Tanh,
    Relu,
    /// `min(a, max(0, x))`
    BoundedRelu,
    /// `min(a, max(b, x))`
    LuBoundedRelu,
    LeakyRelu,
    SoftRelu,
    Elu,
    Abs,
    Square,
    Sqrt,
    /// `a * x + b`
    Linear,
    Identity,
    HardSwish,
    Swish,
    Gelu,
}

/// Activation function plus its two scalar parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ActivationLayerInfo {
    func: Option<ActivationFunction>,
    a: f32,
    b: f32,
}

impl ActivationLayerInfo {
    /// An enabled activation.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{ActivationFunction, ActivationLayerInfo};
    /// let act = ActivationLayerInfo::new(ActivationFunction::BoundedRelu, 6.0, 0.0);
    /// assert_eq!(act.apply(7.5), 6.0);
    /// assert_eq!(act.apply(-1.0), 0.0);
    /// ```
    pub fn new(func: ActivationFunction, a: f32, b: f32) -> Self {
        Self {
            func: Some(func),
            a,
            b,
        }
    }

    /// The disabled activation.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> bool {
        self.func.is_some()
    }

    /// Returns the function, or `None` when disabled.
    pub fn activation(&self) -> Option<ActivationFunction> {
        self.func
    }

    pub fn a(&self) -> f32 {
        self.a
    }

    pub fn b(&self) -> f32 {
        self.b
    }

    /// Reference scalar evaluation.
    pub fn apply(&self, x: f32) -> f32 {
        let (a, b) = (self.a, self.b);
        match self.func {
            None | Some(ActivationFunction::Identity) => x,
            Some(ActivationFunction::Logistic) => 1.0 / (1.0 + (-x).exp()),
            Some(ActivationFunction::Tanh) => a * (b * x).tanh(),
            Some(ActivationFunction::Relu) => x.max(0.0),
            Some(ActivationFunction::BoundedRelu) => a.min(x.max(0.0)),
            Some(ActivationFunction::LuBoundedRelu) => a.min(x.max(b)),
            Some(ActivationFunction::LeakyRelu) => {
                if x > 0.0 {
                    x
                } else {
                    a * x
                }
            }
            Some(ActivationFunction::SoftRelu) => {
                if x > 12.0 {
                    x
                } else {
                    (1.0 + x.exp()).ln()
                }
            }
            Some(ActivationFunction::Elu) => {
                if x >= 0.0 {
                    x
                } else {
                    a * (x.exp() - 1.0)
                }
            }
            Some(ActivationFunction::Abs) => x.abs(),
            Some(ActivationFunction::Square) => x * x,
            Some(ActivationFunction::Sqrt) => x.sqrt(),
            Some(ActivationFunction::Linear) => a * x + b,
            Some(ActivationFunction::HardSwish) => x * ((x + 3.0).clamp(0.0, 6.0) / 6.0),
            Some(ActivationFunction::Swish) => x / (1.0 + (-a * x).exp()),
            Some(ActivationFunction::Gelu) => {
                0.5 * x * (1.0 + erf_approx(x / std::f32::consts::SQRT_2))
            }
        }
    }
}

/// Abramowitz-Stegun approximation of `erf`, accurate to ~1.5e-7.
fn erf_approx(x: f32) -> f32 {
    let t = 1.0 / (1.0 + 0.327_591_1 * x.abs());
    let y = 1.0
        - (((((1.061_405_4 * t - 1.453_152_1) * t) + 1.421_413_8) * t - 0.284_496_74) * t
            + 0.254_829_6)
            * t
            * (-x * x).exp();
    if x >= 0.0 {
        y
    } else {
        -y
    }
}

// ── Convolution / pooling geometry ──────────────────────────────

/// Rounding used when an output extent does not divide evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DimensionRoundingType {
    #[default]
    Floor,
    Ceil,
}

/// Stride and padding of a sliding-window operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PadStrideInfo {
    pub stride_x: usize,
    pub stride_y: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub round: DimensionRoundingType,
}

impl PadStrideInfo {
    /// Symmetric padding on each axis.
    pub fn new(stride_x: usize, stride_y: usize, pad_x: usize, pad_y: usize) -> Self {
        Self::asymmetric(stride_x, stride_y, pad_x, pad_x, pad_y, pad_y)
    }

    pub fn asymmetric(
        stride_x: usize,
        stride_y: usize,
        pad_left: usize,
        pad_right: usize,
        pad_top: usize,
        pad_bottom: usize,
    ) -> Self {
        Self {
            stride_x,
            stride_y,
            pad_left,
            pad_right,
            pad_top,
            pad_bottom,
            round: DimensionRoundingType::Floor,
        }
    }

    pub fn with_rounding(mut self, round: DimensionRoundingType) -> Self {
        self.round = round;
        self
    }

    pub fn has_padding(&self) -> bool {
        self.pad_left + self.pad_right + self.pad_top + self.pad_bottom != 0
    }
}

impl Default for PadStrideInfo {
    fn default() -> Self {
        Self::new(1, 1, 0, 0)
    }
}

/// Width/height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Size2D {
    pub width: usize,
    pub height: usize,
}

impl Size2D {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Output extent of a sliding window, or `None` if the window never fits.
///
/// # Examples
/// ```
/// use tensor_core::{scaled_dimensions, PadStrideInfo};
/// let (w, h) = scaled_dimensions(5, 5, 3, 3, &PadStrideInfo::new(2, 2, 1, 1)).unwrap();
/// assert_eq!((w, h), (3, 3));
/// ```
pub fn scaled_dimensions(
    width: usize,
    height: usize,
    kernel_w: usize,
    kernel_h: usize,
    info: &PadStrideInfo,
) -> Option<(usize, usize)> {
    let padded_w = width + info.pad_left + info.pad_right;
    let padded_h = height + info.pad_top + info.pad_bottom;
    if kernel_w > padded_w || kernel_h > padded_h || info.stride_x == 0 || info.stride_y == 0 {
        return None;
    }
    let span_w = padded_w - kernel_w;
    let span_h = padded_h - kernel_h;
    let (w, h) = match info.round {
        DimensionRoundingType::Floor => (span_w / info.stride_x + 1, span_h / info.stride_y + 1),
        DimensionRoundingType::Ceil => (
            span_w.div_ceil(info.stride_x) + 1,
            span_h.div_ceil(info.stride_y) + 1,
        ),
    };
    Some((w, h))
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PoolingType {
    Max,
    Avg,
    L2,
}

/// Configuration of a 2-D pooling layer.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolingLayerInfo {
    pub pool_type: PoolingType,
    pub pool_size: Size2D,
    pub data_layout: DataLayout,
    pub pad_stride_info: PadStrideInfo,
    /// Average pooling divides by the number of valid (non-padding) elements.
    pub exclude_padding: bool,
    pub is_global_pooling: bool,
    pub use_kernel_indices: bool,
}

impl PoolingLayerInfo {
    pub fn new(
        pool_type: PoolingType,
        pool_size: usize,
        data_layout: DataLayout,
        pad_stride_info: PadStrideInfo,
        exclude_padding: bool,
    ) -> Self {
        Self {
            pool_type,
            pool_size: Size2D::new(pool_size, pool_size),
            data_layout,
            pad_stride_info,
            exclude_padding,
            is_global_pooling: false,
            use_kernel_indices: false,
        }
    }

    /// Pooling over the whole spatial extent.
    pub fn global(pool_type: PoolingType, data_layout: DataLayout) -> Self {
        Self {
            pool_type,
            pool_size: Size2D::default(),
            data_layout,
            pad_stride_info: PadStrideInfo::default(),
            exclude_padding: false,
            is_global_pooling: true,
            use_kernel_indices: false,
        }
    }

    pub fn with_pool_size(mut self, size: Size2D) -> Self {
        self.pool_size = size;
        self
    }
}

// ── Permutation ─────────────────────────────────────────────────

/// Dimension reordering: output dimension `i` reads input dimension `self[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermutationVector {
    perm: [usize; MAX_DIMS],
    len: usize,
}

impl PermutationVector {
    /// # Panics
    /// Panics on more than [`MAX_DIMS`] entries.
    pub fn new(perm: &[usize]) -> Self {
        assert!(perm.len() <= MAX_DIMS, "permutation too long");
        let mut p = [0usize; MAX_DIMS];
        for (i, slot) in p.iter_mut().enumerate() {
            *slot = i;
        }
        p[..perm.len()].copy_from_slice(perm);
        Self {
            perm: p,
            len: perm.len(),
        }
    }

    pub fn num_dimensions(&self) -> usize {
        self.len
    }

    /// Source dimension of output dimension `i` (identity past the end).
    pub fn get(&self, i: usize) -> usize {
        self.perm[i]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.perm[..self.len]
    }

    /// Returns `true` if every index appears exactly once.
    pub fn is_valid(&self) -> bool {
        let mut seen = [false; MAX_DIMS];
        for &p in self.as_slice() {
            if p >= self.len || seen[p] {
                return false;
            }
            seen[p] = true;
        }
        true
    }

    /// Returns the permutation that undoes this one.
    pub fn inverse(&self) -> PermutationVector {
        let mut inv = [0usize; MAX_DIMS];
        for (i, &p) in self.as_slice().iter().enumerate() {
            inv[p] = i;
        }
        PermutationVector::new(&inv[..self.len])
    }
}

// ── Elementwise ─────────────────────────────────────────────────

/// Overflow policy for integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ConvertPolicy {
    #[default]
    Wrap,
    Saturate,
}

/// Binary elementwise arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ArithmeticOperation {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    SquaredDiff,
    Power,
    Prelu,
}

// ── Borders ─────────────────────────────────────────────────────

/// Border widths around the spatial plane of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorderSize {
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
    pub left: usize,
}

impl BorderSize {
    pub fn new(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top + self.right + self.bottom + self.left == 0
    }
}

/// How border elements are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// Leave the border untouched.
    Undefined,
    /// Fill with a constant value.
    Constant,
    /// Repeat the nearest valid element.
    Replicate,
}

// ── GEMM / MatMul descriptors ───────────────────────────────────

/// Weight layouts understood by fixed-format GEMM kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum WeightFormat {
    #[default]
    Unspecified,
    /// Let the backend pick any fixed format.
    Any,
    Ohwi,
    Ohwio4,
    Ohwio8,
    Ohwio16,
}

impl WeightFormat {
    /// Interleave factor of the output-channel axis (1 for non-blocked formats).
    pub fn interleave_by(self) -> usize {
        match self {
            WeightFormat::Ohwio4 => 4,
            WeightFormat::Ohwio8 => 8,
            WeightFormat::Ohwio16 => 16,
            _ => 1,
        }
    }

    pub fn is_fixed_format(self) -> bool {
        !matches!(self, WeightFormat::Unspecified | WeightFormat::Any | WeightFormat::Ohwi)
    }
}

/// Kind of output stage applied to an integer GEMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GemmLowpOutputStageType {
    /// Keep the raw S32 accumulators.
    #[default]
    None,
    /// Fixed-point requantization.
    QuantizeDownFixedpoint,
}

/// Requantization parameters of an integer GEMM.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GemmLowpOutputStageInfo {
    pub stage_type: GemmLowpOutputStageType,
    /// Output zero point.
    pub gemmlowp_offset: i32,
    pub gemmlowp_multiplier: i32,
    /// Positive = right shift.
    pub gemmlowp_shift: i32,
    pub gemmlowp_min_bound: i32,
    pub gemmlowp_max_bound: i32,
    /// Per-channel multipliers (length 1 for per-tensor).
    pub gemmlowp_multipliers: Vec<i32>,
    /// Per-channel shifts (length 1 for per-tensor).
    pub gemmlowp_shifts: Vec<i32>,
    pub is_quantized_per_channel: bool,
    pub output_data_type: DataType,
}

/// Options of a GEMM operator call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GemmInfo {
    /// `A` is a 3-D tensor whose dims 1 and 2 are collapsed into rows.
    pub reinterpret_input_as_3d: bool,
    /// Output rows are split into `depth_output_gemm3d` planes.
    pub depth_output_gemm3d: usize,
    pub fast_math: bool,
    /// Accumulate half-precision GEMMs in single precision.
    pub fp32_accumulation: bool,
    pub fixed_format: bool,
    pub weight_format: WeightFormat,
    pub activation: ActivationLayerInfo,
    pub output_stage: GemmLowpOutputStageInfo,
    /// `B` is supplied transposed (`[K, N]` instead of `[N, K]`).
    pub pretranspose_b: bool,
}

/// Adjoint flags of a batched matrix multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatMulInfo {
    pub adj_lhs: bool,
    pub adj_rhs: bool,
}

/// Output shape of a permutation.
pub fn permute_shape(shape: &TensorShape, perm: &PermutationVector) -> TensorShape {
    shape.permuted(perm)
}
