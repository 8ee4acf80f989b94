// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor descriptors and the per-invocation plumbing shared by every
//! kernel and operator of the compute runtime.
//!
//! This crate provides:
//! - [`TensorShape`], [`DataType`], [`DataLayout`], [`QuantizationInfo`] and
//!   [`TensorInfo`]: descriptors kernels validate and configure against.
//! - [`Tensor`]: an aligned buffer bound to a descriptor.
//! - [`TensorPack`]: the role → tensor map handed to `run()`.
//! - [`Window`]: the iteration domain a kernel covers, and its split
//!   across worker threads.
//! - [`ComputeError`] / [`Status`]: the result of every `validate()`.
//! - Layer descriptors (activation, pooling, pad/stride, GEMM options).
//!
//! # Shape ordering
//! Dimension 0 is innermost. A matrix of `M` rows and `K` columns has shape
//! `[K, M]`; an NHWC activation has shape `[C, W, H, N]`.

mod dtype;
mod error;
mod info;
mod layout;
mod pack;
mod quantization;
mod shape;
mod tensor;
mod types;
pub mod validate;
mod window;

pub use dtype::DataType;
pub use error::{ComputeError, ErrorCode, Status};
pub use info::{Strides, TensorInfo};
pub use layout::{DataLayout, DataLayoutDimension};
pub use pack::{offset_int_vec, TensorPack, TensorType};
pub use quantization::{
    calculate_quantized_multiplier, dequantize_qasymm8, dequantize_qasymm8_signed,
    dequantize_qsymm16, multiply_by_quantized_multiplier, quantize_qasymm8,
    quantize_qasymm8_signed, quantize_qsymm16, quantized_type_range, rounding_divide_by_pow2,
    saturating_rounding_doubling_highmul, softmax_output_quantization_info, QuantizationInfo,
    UniformQuantizationInfo,
};
pub use shape::{TensorShape, MAX_DIMS};
pub use tensor::Tensor;
pub use types::{
    permute_shape, scaled_dimensions, ActivationFunction, ActivationLayerInfo,
    ArithmeticOperation, BorderMode, BorderSize, ConvertPolicy, DimensionRoundingType, GemmInfo,
    GemmLowpOutputStageInfo, GemmLowpOutputStageType, MatMulInfo, PadStrideInfo,
    PermutationVector, PoolingLayerInfo, PoolingType, Size2D, WeightFormat,
};
pub use window::{
    calculate_max_window, calculate_squashed_or_max_window, Coordinates, Dimension, Steps, Window,
};
