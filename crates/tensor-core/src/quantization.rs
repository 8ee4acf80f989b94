// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantization parameters and fixed-point helpers.
//!
//! Asymmetric quantization maps a real value `r` to `q = round(r / scale) + offset`.
//! Per-channel quantization stores one scale per output channel and no offset.

use crate::{ComputeError, DataType};

/// Scale and zero-point parameters of a quantized tensor.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct QuantizationInfo {
    /// One scale per tensor, or one per channel.
    pub scale: Vec<f32>,
    /// Zero points matching `scale` (may be empty for symmetric types).
    pub offset: Vec<i32>,
    /// Whether the parameters may change between runs.
    #[serde(default)]
    pub is_dynamic: bool,
}

/// Per-tensor view of a [`QuantizationInfo`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformQuantizationInfo {
    pub scale: f32,
    pub offset: i32,
}

impl QuantizationInfo {
    /// Per-tensor parameters.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::QuantizationInfo;
    /// let q = QuantizationInfo::new(0.5, 10);
    /// assert_eq!(q.uniform().offset, 10);
    /// ```
    pub fn new(scale: f32, offset: i32) -> Self {
        Self {
            scale: vec![scale],
            offset: vec![offset],
            is_dynamic: false,
        }
    }

    /// Per-channel symmetric parameters.
    pub fn per_channel(scales: Vec<f32>) -> Self {
        Self {
            scale: scales,
            offset: Vec::new(),
            is_dynamic: false,
        }
    }

    /// Marks the parameters as changeable between runs.
    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }

    /// Returns `true` when no parameters were set.
    pub fn is_empty(&self) -> bool {
        self.scale.is_empty() && self.offset.is_empty()
    }

    /// Returns the first scale/offset pair.
    pub fn uniform(&self) -> UniformQuantizationInfo {
        UniformQuantizationInfo {
            scale: self.scale.first().copied().unwrap_or(0.0),
            offset: self.offset.first().copied().unwrap_or(0),
        }
    }
}

// ── Quantize / dequantize ───────────────────────────────────────

/// Quantizes `value` to QASYMM8.
pub fn quantize_qasymm8(value: f32, qinfo: UniformQuantizationInfo) -> u8 {
    let q = (value / qinfo.scale).round() as i32 + qinfo.offset;
    q.clamp(0, 255) as u8
}

/// Quantizes `value` to QASYMM8_SIGNED.
pub fn quantize_qasymm8_signed(value: f32, qinfo: UniformQuantizationInfo) -> i8 {
    let q = (value / qinfo.scale).round() as i32 + qinfo.offset;
    q.clamp(-128, 127) as i8
}

/// Quantizes `value` to QSYMM16.
pub fn quantize_qsymm16(value: f32, qinfo: UniformQuantizationInfo) -> i16 {
    let q = (value / qinfo.scale).round() as i32;
    q.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Dequantizes a QASYMM8 value.
pub fn dequantize_qasymm8(value: u8, qinfo: UniformQuantizationInfo) -> f32 {
    (value as i32 - qinfo.offset) as f32 * qinfo.scale
}

/// Dequantizes a QASYMM8_SIGNED value.
pub fn dequantize_qasymm8_signed(value: i8, qinfo: UniformQuantizationInfo) -> f32 {
    (value as i32 - qinfo.offset) as f32 * qinfo.scale
}

/// Dequantizes a QSYMM16 value.
pub fn dequantize_qsymm16(value: i16, qinfo: UniformQuantizationInfo) -> f32 {
    value as f32 * qinfo.scale
}

/// Representable `(min, max)` of a quantized type, as integers.
pub fn quantized_type_range(dt: DataType) -> Result<(i32, i32), ComputeError> {
    match dt {
        DataType::QAsymm8 | DataType::U8 => Ok((0, 255)),
        DataType::QAsymm8Signed | DataType::QSymm8 | DataType::QSymm8PerChannel | DataType::S8 => {
            Ok((-128, 127))
        }
        DataType::QSymm16 | DataType::S16 => Ok((i16::MIN as i32, i16::MAX as i32)),
        DataType::QAsymm16 | DataType::U16 => Ok((0, u16::MAX as i32)),
        DataType::S32 => Ok((i32::MIN, i32::MAX)),
        other => Err(ComputeError::UnsupportedDataType {
            op: "quantized_type_range",
            dtype: other,
        }),
    }
}

/// Fixed output quantization of the quantized softmax kernels.
pub fn softmax_output_quantization_info(dt: DataType, is_log: bool) -> QuantizationInfo {
    match (dt, is_log) {
        (DataType::QAsymm8, false) => QuantizationInfo::new(1.0 / 256.0, 0),
        (DataType::QAsymm8, true) => QuantizationInfo::new(16.0 / 256.0, 255),
        (DataType::QAsymm8Signed, false) => QuantizationInfo::new(1.0 / 256.0, -128),
        (DataType::QAsymm8Signed, true) => QuantizationInfo::new(16.0 / 256.0, 127),
        _ => QuantizationInfo::default(),
    }
}

// ── Fixed-point multipliers ─────────────────────────────────────

/// Splits `x` into a mantissa in `[0.5, 1)` and a power-of-two exponent.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let mut exp = x.abs().log2().floor() as i32 + 1;
    let mut mant = x / 2f64.powi(exp);
    // log2 can be off by one ulp near powers of two.
    if mant.abs() >= 1.0 {
        mant /= 2.0;
        exp += 1;
    } else if mant.abs() < 0.5 {
        mant *= 2.0;
        exp -= 1;
    }
    (mant, exp)
}

/// Converts a real multiplier into a Q0.31 fixed-point multiplier and a shift.
///
/// A positive shift is a right shift; a negative shift is a left shift.
///
/// # Examples
/// ```
/// use tensor_core::calculate_quantized_multiplier;
/// let (mult, shift) = calculate_quantized_multiplier(0.25).unwrap();
/// assert_eq!(mult, 1 << 30);
/// assert_eq!(shift, 1);
/// let (_, shift) = calculate_quantized_multiplier(3.0).unwrap();
/// assert_eq!(shift, -2);
/// ```
pub fn calculate_quantized_multiplier(multiplier: f32) -> Result<(i32, i32), ComputeError> {
    const ONE_Q31: i64 = 1 << 31;
    if multiplier < 0.0 || !multiplier.is_finite() {
        return Err(ComputeError::invalid(
            "calculate_quantized_multiplier",
            format!("multiplier {multiplier} must be finite and non-negative"),
        ));
    }
    if multiplier == 0.0 {
        return Ok((0, 0));
    }
    let (q, exp) = frexp(multiplier as f64);
    let mut shift = -exp;
    let mut q_fixed = (q * ONE_Q31 as f64).round() as i64;
    if q_fixed == ONE_Q31 {
        q_fixed /= 2;
        shift -= 1;
    }
    if shift > 31 {
        // Too small to represent: the product rounds to zero.
        return Ok((0, 0));
    }
    Ok((q_fixed as i32, shift))
}

/// Saturating rounding doubling high multiply (`SQRDMULH`).
pub fn saturating_rounding_doubling_highmul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// Divides by `2^exponent`, rounding half away from zero.
pub fn rounding_divide_by_pow2(x: i32, exponent: i32) -> i32 {
    if exponent <= 0 {
        return x;
    }
    let exponent = exponent.min(31);
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i32::from(x < 0);
    (x >> exponent) + i32::from(remainder > threshold)
}

/// Applies a fixed-point multiplier with the shift convention of
/// [`calculate_quantized_multiplier`].
pub fn multiply_by_quantized_multiplier(x: i32, multiplier: i32, shift: i32) -> i32 {
    let left = (-shift).max(0);
    let right = shift.max(0);
    let shifted = ((x as i64) << left).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    rounding_divide_by_pow2(saturating_rounding_doubling_highmul(shifted, multiplier), right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_roundtrip_qasymm8() {
        let q = UniformQuantizationInfo {
            scale: 0.1,
            offset: 128,
        };
        let v = quantize_qasymm8(1.0, q);
        assert_eq!(v, 138);
        assert!((dequantize_qasymm8(v, q) - 1.0).abs() < 1e-6);
        assert_eq!(quantize_qasymm8(100.0, q), 255);
    }

    #[test]
    fn test_quantize_signed_clamps() {
        let q = UniformQuantizationInfo {
            scale: 1.0,
            offset: 0,
        };
        assert_eq!(quantize_qasymm8_signed(-500.0, q), -128);
        assert_eq!(quantize_qasymm8_signed(3.4, q), 3);
    }

    #[test]
    fn test_multiplier_less_than_one() {
        let (m, s) = calculate_quantized_multiplier(0.5).unwrap();
        assert_eq!(m, 1 << 30);
        assert_eq!(s, 0);
        let (m, s) = calculate_quantized_multiplier(0.1).unwrap();
        assert_eq!(s, 3);
        let back = m as f64 / (1i64 << 31) as f64 / 2f64.powi(s);
        assert!((back - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_multiplier_greater_than_one() {
        let (m, s) = calculate_quantized_multiplier(1.5).unwrap();
        assert_eq!(s, -1);
        assert_eq!(m, 0x6000_0000);
    }

    #[test]
    fn test_zero_multiplier() {
        assert_eq!(calculate_quantized_multiplier(0.0).unwrap(), (0, 0));
        assert!(calculate_quantized_multiplier(-1.0).is_err());
    }

    #[test]
    fn test_rounding_divide() {
        assert_eq!(rounding_divide_by_pow2(5, 1), 3);
        assert_eq!(rounding_divide_by_pow2(-5, 1), -3);
        assert_eq!(rounding_divide_by_pow2(4, 1), 2);
        assert_eq!(rounding_divide_by_pow2(7, 0), 7);
    }

    #[test]
    fn test_sqrdmulh_saturates() {
        assert_eq!(saturating_rounding_doubling_highmul(i32::MIN, i32::MIN), i32::MAX);
        assert_eq!(saturating_rounding_doubling_highmul(1 << 30, 1 << 30), 1 << 29);
    }

    #[test]
    fn test_multiply_by_quantized_multiplier() {
        let (m, s) = calculate_quantized_multiplier(0.25).unwrap();
        assert_eq!(multiply_by_quantized_multiplier(100, m, s), 25);
        let (m, s) = calculate_quantized_multiplier(3.0).unwrap();
        assert_eq!(multiply_by_quantized_multiplier(10, m, s), 30);
    }

    #[test]
    fn test_softmax_output_qinfo() {
        let q = softmax_output_quantization_info(DataType::QAsymm8Signed, false);
        assert_eq!(q.uniform().offset, -128);
        assert!((q.uniform().scale - 1.0 / 256.0).abs() < f32::EPSILON);
    }
}
