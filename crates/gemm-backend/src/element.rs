// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand and accumulator element types.
//!
//! Floating-point operands (f32, f16, bf16) accumulate in `f32`; 8-bit
//! integer operands accumulate in `i32` with wrapping arithmetic, the way
//! the dot-product instructions do.

use half::{bf16, f16};
use std::fmt::Debug;

/// An accumulator type.
pub trait Accum: Copy + Default + Debug + Send + Sync + 'static {
    /// `self + a * b`.
    fn mul_add(self, a: Self, b: Self) -> Self;
    fn add(self, other: Self) -> Self;
    fn to_f32(self) -> f32;
    fn to_i32(self) -> i32;
}

impl Accum for f32 {
    #[inline]
    fn mul_add(self, a: f32, b: f32) -> f32 {
        self + a * b
    }

    #[inline]
    fn add(self, other: f32) -> f32 {
        self + other
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn to_i32(self) -> i32 {
        self as i32
    }
}

impl Accum for i32 {
    #[inline]
    fn mul_add(self, a: i32, b: i32) -> i32 {
        self.wrapping_add(a.wrapping_mul(b))
    }

    #[inline]
    fn add(self, other: i32) -> i32 {
        self.wrapping_add(other)
    }

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn to_i32(self) -> i32 {
        self
    }
}

/// A GEMM operand type (`A` or `B`).
pub trait Element: bytemuck::Pod + Default + Debug + Send + Sync + 'static {
    /// Short name used in implementation names and logs.
    const NAME: &'static str;
    type Acc: Accum;

    fn widen(self) -> Self::Acc;

    /// Converts a padding value (a zero point or `0.0`).
    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    const NAME: &'static str = "fp32";
    type Acc = f32;

    #[inline]
    fn widen(self) -> f32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    const NAME: &'static str = "fp16";
    type Acc = f32;

    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }

    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl Element for bf16 {
    const NAME: &'static str = "bf16";
    type Acc = f32;

    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }

    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
}

impl Element for u8 {
    const NAME: &'static str = "u8";
    type Acc = i32;

    #[inline]
    fn widen(self) -> i32 {
        self as i32
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl Element for i8 {
    const NAME: &'static str = "s8";
    type Acc = i32;

    #[inline]
    fn widen(self) -> i32 {
        self as i32
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(-128.0, 127.0) as i8
    }
}

/// A GEMM result type written from an accumulator.
pub trait OutputElement: bytemuck::Pod + Default + Debug + Send + Sync + 'static {
    const NAME: &'static str;

    /// Value as `f32`, used to read a float bias.
    fn to_f32(self) -> f32;
    /// Value as `i32`, used to read an integer bias.
    fn to_i32(self) -> i32;
    fn from_f32(v: f32) -> Self;
    /// Wrapping conversion from a raw accumulator.
    fn from_i32(v: i32) -> Self;
}

impl OutputElement for f32 {
    const NAME: &'static str = "fp32";

    fn to_f32(self) -> f32 {
        self
    }

    fn to_i32(self) -> i32 {
        self as i32
    }

    fn from_f32(v: f32) -> Self {
        v
    }

    fn from_i32(v: i32) -> Self {
        v as f32
    }
}

impl OutputElement for f16 {
    const NAME: &'static str = "fp16";

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn to_i32(self) -> i32 {
        f16::to_f32(self) as i32
    }

    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    fn from_i32(v: i32) -> Self {
        f16::from_f32(v as f32)
    }
}

impl OutputElement for i32 {
    const NAME: &'static str = "s32";

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn to_i32(self) -> i32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v as i32
    }

    fn from_i32(v: i32) -> Self {
        v
    }
}

impl OutputElement for u32 {
    const NAME: &'static str = "u32";

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn to_i32(self) -> i32 {
        self as i32
    }

    fn from_f32(v: f32) -> Self {
        v as u32
    }

    fn from_i32(v: i32) -> Self {
        v as u32
    }
}

impl OutputElement for u8 {
    const NAME: &'static str = "u8";

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn to_i32(self) -> i32 {
        self as i32
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }

    fn from_i32(v: i32) -> Self {
        v.clamp(0, 255) as u8
    }
}

impl OutputElement for i8 {
    const NAME: &'static str = "s8";

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn to_i32(self) -> i32 {
        self as i32
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(-128.0, 127.0) as i8
    }

    fn from_i32(v: i32) -> Self {
        v.clamp(-128, 127) as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_accumulation_wraps() {
        let acc = i32::MAX.mul_add(1, 1);
        assert_eq!(acc, i32::MIN);
        assert_eq!(200u8.widen().mul_add(3, 4), 212);
    }

    #[test]
    fn test_half_widen() {
        assert_eq!(f16::from_f32(1.5).widen(), 1.5);
        assert_eq!(bf16::from_f32(-2.0).widen(), -2.0);
    }

    #[test]
    fn test_saturating_outputs() {
        assert_eq!(<u8 as OutputElement>::from_i32(300), 255);
        assert_eq!(<i8 as OutputElement>::from_i32(-300), -128);
        assert_eq!(<i8 as Element>::from_f32(-3.6), -4);
    }
}
