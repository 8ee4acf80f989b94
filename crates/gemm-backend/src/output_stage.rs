// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Output stages: what happens to an accumulator before it is stored.
//!
//! Offsets follow the additive convention: `a_offset` and `b_offset` are
//! the *negated* zero points of `A` and `B`, so the zero-point corrected
//! product is
//!
//! ```text
//! acc + b_offset * row_sum(A) + a_offset * col_sum(B) + K * a_offset * b_offset
//! ```
//!
//! The column part (plus any integer bias) is computed once per `B` by
//! [`OutputStage::column_bias`]; the row part per output row.

use crate::args::Activation;
use crate::element::{Accum, OutputElement};
use std::fmt::Debug;

/// Kind of output stage, for tables and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStageKind {
    Nothing,
    Requantize32,
    DequantizeFloat,
}

/// Zero-point corrections of one output element.
#[derive(Debug, Clone, Copy, Default)]
pub struct Correction {
    /// `b_offset * row_sum(A)` of the output row.
    pub row_term: i32,
    /// Column bias of the output column (see [`OutputStage::column_bias`]).
    pub col_term: i32,
    /// Output channel, for per-channel parameters.
    pub channel: usize,
}

/// Parameters shared by every output stage.
pub trait OutputStage: Clone + Debug + Send + Sync + 'static {
    const KIND: OutputStageKind;

    /// Whether row sums of `A` are needed (`b_offset != 0`).
    fn needs_row_sums(&self) -> bool {
        false
    }

    /// Whether a per-column bias has to be precomputed from `B`.
    fn needs_col_sums(&self) -> bool {
        false
    }

    fn a_offset(&self) -> i32 {
        0
    }

    fn b_offset(&self) -> i32 {
        0
    }

    /// Column term for a column of `B` summing to `col_sum` over `depth` rows.
    fn column_bias(&self, _col_sum: i32, _depth: usize, _multi: usize, _col: usize) -> i32 {
        0
    }

    /// Installs an integer bias folded into [`column_bias`](Self::column_bias).
    fn set_bias(&mut self, _bias: &[i32], _bias_multi_stride: usize) {}

    /// Replaces the requantization parameters (dynamic quantization).
    fn update(&mut self, _requant: &Requantize32) {}

    /// Replaces the dequantization scale (dynamic quantization).
    fn set_scale(&mut self, _scale: f32) {}
}

/// Converts an accumulator of type `Acc` into an output of type `To`.
pub trait Epilogue<Acc: Accum, To: OutputElement>: OutputStage {
    fn apply(&self, acc: Acc, corr: Correction, bias: Option<To>, act: &Activation) -> To;
}

// ── Nothing ─────────────────────────────────────────────────────

/// Stores the raw accumulator (plus bias and activation for float outputs).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Nothing;

impl OutputStage for Nothing {
    const KIND: OutputStageKind = OutputStageKind::Nothing;
}

impl<To: OutputElement> Epilogue<f32, To> for Nothing {
    #[inline]
    fn apply(&self, acc: f32, _corr: Correction, bias: Option<To>, act: &Activation) -> To {
        let v = acc + bias.map_or(0.0, OutputElement::to_f32);
        To::from_f32(act.apply(v))
    }
}

impl<To: OutputElement> Epilogue<i32, To> for Nothing {
    #[inline]
    fn apply(&self, acc: i32, _corr: Correction, bias: Option<To>, _act: &Activation) -> To {
        To::from_i32(acc.wrapping_add(bias.map_or(0, OutputElement::to_i32)))
    }
}

// ── Requantize32 ────────────────────────────────────────────────

/// Fixed-point requantization of 32-bit accumulators to 8 bits.
///
/// Shifts are stored split: a non-negative left shift applied before the
/// multiply and a non-positive right shift applied after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requantize32 {
    pub bias: Vec<i32>,
    pub bias_multi_stride: usize,
    pub a_offset: i32,
    pub b_offset: i32,
    pub c_offset: i32,
    pub per_channel_requant: bool,
    pub per_layer_left_shift: i32,
    pub per_layer_right_shift: i32,
    pub per_layer_mul: i32,
    pub per_channel_left_shifts: Vec<i32>,
    pub per_channel_right_shifts: Vec<i32>,
    pub per_channel_muls: Vec<i32>,
    pub minval: i32,
    pub maxval: i32,
}

impl Requantize32 {
    /// Per-layer parameters. `requant_shift` follows the left-positive
    /// convention: positive values shift left.
    pub fn per_layer(
        a_offset: i32,
        b_offset: i32,
        c_offset: i32,
        requant_shift: i32,
        requant_mul: i32,
        minval: i32,
        maxval: i32,
    ) -> Self {
        Self {
            a_offset,
            b_offset,
            c_offset,
            per_layer_left_shift: requant_shift.max(0),
            per_layer_right_shift: requant_shift.min(0),
            per_layer_mul: requant_mul,
            minval,
            maxval,
            ..Self::default()
        }
    }

    /// Per-channel parameters. An empty `left_shifts` means no channel
    /// needs a left shift.
    #[allow(clippy::too_many_arguments)]
    pub fn per_channel(
        a_offset: i32,
        b_offset: i32,
        c_offset: i32,
        left_shifts: Vec<i32>,
        right_shifts: Vec<i32>,
        muls: Vec<i32>,
        minval: i32,
        maxval: i32,
    ) -> Self {
        Self {
            a_offset,
            b_offset,
            c_offset,
            per_channel_requant: true,
            per_channel_left_shifts: left_shifts,
            per_channel_right_shifts: right_shifts,
            per_channel_muls: muls,
            minval,
            maxval,
            ..Self::default()
        }
    }

    fn params(&self, channel: usize) -> (i32, i32, i32) {
        if self.per_channel_requant {
            let left = self.per_channel_left_shifts.get(channel).copied().unwrap_or(0);
            let right = self.per_channel_right_shifts.get(channel).copied().unwrap_or(0);
            let mul = self.per_channel_muls.get(channel).copied().unwrap_or(0);
            (left, right, mul)
        } else {
            (self.per_layer_left_shift, self.per_layer_right_shift, self.per_layer_mul)
        }
    }

    /// Requantizes a corrected accumulator for `channel`.
    pub fn requantize(&self, value: i32, channel: usize) -> i32 {
        let (left, right, mul) = self.params(channel);
        let shifted = ((value as i64) << left.clamp(0, 31)).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let scaled = rounding_shift_right(sqrdmulh(shifted, mul), -right);
        scaled
            .saturating_add(self.c_offset)
            .clamp(self.minval, self.maxval)
    }
}

impl OutputStage for Requantize32 {
    const KIND: OutputStageKind = OutputStageKind::Requantize32;

    fn needs_row_sums(&self) -> bool {
        self.b_offset != 0
    }

    fn needs_col_sums(&self) -> bool {
        true
    }

    fn a_offset(&self) -> i32 {
        self.a_offset
    }

    fn b_offset(&self) -> i32 {
        self.b_offset
    }

    fn column_bias(&self, col_sum: i32, depth: usize, multi: usize, col: usize) -> i32 {
        let mut v = self
            .a_offset
            .wrapping_mul(self.b_offset)
            .wrapping_mul(depth as i32)
            .wrapping_add(col_sum.wrapping_mul(self.a_offset));
        if let Some(b) = self.bias.get(multi * self.bias_multi_stride + col) {
            v = v.wrapping_add(*b);
        }
        v
    }

    fn set_bias(&mut self, bias: &[i32], bias_multi_stride: usize) {
        self.bias = bias.to_vec();
        self.bias_multi_stride = bias_multi_stride;
    }

    fn update(&mut self, requant: &Requantize32) {
        let bias = std::mem::take(&mut self.bias);
        let stride = self.bias_multi_stride;
        *self = requant.clone();
        if self.bias.is_empty() {
            self.bias = bias;
            self.bias_multi_stride = stride;
        }
    }
}

impl<To: OutputElement> Epilogue<i32, To> for Requantize32 {
    #[inline]
    fn apply(&self, acc: i32, corr: Correction, _bias: Option<To>, _act: &Activation) -> To {
        let v = acc.wrapping_add(corr.row_term).wrapping_add(corr.col_term);
        To::from_i32(self.requantize(v, corr.channel))
    }
}

// ── DequantizeFloat ─────────────────────────────────────────────

/// Converts corrected 32-bit accumulators to `f32` with one scale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DequantizeFloat {
    pub scale: f32,
    pub a_offset: i32,
    pub b_offset: i32,
}

impl DequantizeFloat {
    pub fn new(scale: f32, a_offset: i32, b_offset: i32) -> Self {
        Self {
            scale,
            a_offset,
            b_offset,
        }
    }
}

impl OutputStage for DequantizeFloat {
    const KIND: OutputStageKind = OutputStageKind::DequantizeFloat;

    fn needs_row_sums(&self) -> bool {
        self.b_offset != 0
    }

    fn needs_col_sums(&self) -> bool {
        self.a_offset != 0
    }

    fn a_offset(&self) -> i32 {
        self.a_offset
    }

    fn b_offset(&self) -> i32 {
        self.b_offset
    }

    fn column_bias(&self, col_sum: i32, depth: usize, _multi: usize, _col: usize) -> i32 {
        self.a_offset
            .wrapping_mul(self.b_offset)
            .wrapping_mul(depth as i32)
            .wrapping_add(col_sum.wrapping_mul(self.a_offset))
    }

    fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }
}

impl<To: OutputElement> Epilogue<i32, To> for DequantizeFloat {
    #[inline]
    fn apply(&self, acc: i32, corr: Correction, bias: Option<To>, act: &Activation) -> To {
        let v = acc.wrapping_add(corr.row_term).wrapping_add(corr.col_term);
        let real = v as f32 * self.scale + bias.map_or(0.0, OutputElement::to_f32);
        To::from_f32(act.apply(real))
    }
}

// ── Fixed point ─────────────────────────────────────────────────

/// Saturating rounding doubling high multiply.
#[inline]
pub fn sqrdmulh(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// Arithmetic right shift by `shift`, rounding to nearest (ties away from zero).
#[inline]
pub fn rounding_shift_right(x: i32, shift: i32) -> i32 {
    if shift <= 0 {
        return x;
    }
    let shift = shift.min(31);
    let mask = ((1i64 << shift) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i32::from(x < 0);
    (x >> shift) + i32::from(remainder > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_layer_shift_split() {
        let rq = Requantize32::per_layer(0, 0, 0, -3, 1 << 30, -128, 127);
        assert_eq!(rq.per_layer_left_shift, 0);
        assert_eq!(rq.per_layer_right_shift, -3);
        let rq = Requantize32::per_layer(0, 0, 0, 2, 1 << 30, -128, 127);
        assert_eq!(rq.per_layer_left_shift, 2);
        assert_eq!(rq.per_layer_right_shift, 0);
    }

    #[test]
    fn test_requantize_per_layer() {
        // mul 0.5, right shift 1: x * 0.25
        let rq = Requantize32::per_layer(0, 0, 10, -1, 1 << 30, 0, 255);
        assert_eq!(rq.requantize(100, 0), 35);
        assert_eq!(rq.requantize(10_000, 0), 255);
        assert_eq!(rq.requantize(-1_000, 0), 0);
    }

    #[test]
    fn test_requantize_left_shift() {
        // mul 0.5, left shift 2: x * 2
        let rq = Requantize32::per_layer(0, 0, 0, 2, 1 << 30, -128, 127);
        assert_eq!(rq.requantize(20, 0), 40);
    }

    #[test]
    fn test_per_channel_parameters() {
        let rq = Requantize32::per_channel(
            0,
            0,
            0,
            vec![1, 0],
            vec![0, -2],
            vec![1 << 30, 1 << 30],
            -1000,
            1000,
        );
        assert_eq!(rq.requantize(100, 0), 100);
        assert_eq!(rq.requantize(100, 1), 13);
    }

    #[test]
    fn test_zero_point_correction() {
        // A = [2, 3] (zero point 1), B = [4, 5] (zero point 2): (1*2 + 2*3) = 8.
        let rq = Requantize32::per_layer(-1, -2, 0, 0, i32::MAX, -1000, 1000);
        let acc = 2 * 4 + 3 * 5;
        let col = rq.column_bias(4 + 5, 2, 0, 0);
        let row = rq.b_offset * (2 + 3);
        let out: i32 = rq.apply(
            acc,
            Correction {
                row_term: row,
                col_term: col,
                channel: 0,
            },
            None,
            &Activation::None,
        );
        assert_eq!(out, 8);
    }

    #[test]
    fn test_dequantize() {
        let dq = DequantizeFloat::new(0.5, 0, 0);
        let out: f32 = dq.apply(7, Correction::default(), Some(1.0f32), &Activation::None);
        assert_eq!(out, 4.5);
    }

    #[test]
    fn test_update_keeps_bias() {
        let mut rq = Requantize32::per_layer(0, 0, 0, 0, 1 << 30, 0, 255);
        rq.set_bias(&[1, 2, 3], 3);
        rq.update(&Requantize32::per_layer(0, 0, 5, 0, 1 << 30, 0, 255));
        assert_eq!(rq.c_offset, 5);
        assert_eq!(rq.bias, vec![1, 2, 3]);
    }

    #[test]
    fn test_rounding_shift() {
        assert_eq!(rounding_shift_right(5, 1), 3);
        assert_eq!(rounding_shift_right(-5, 1), -3);
        assert_eq!(rounding_shift_right(7, 0), 7);
    }
}
