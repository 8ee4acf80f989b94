// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element access shared by the portable micro-kernels.

use half::{bf16, f16};
use tensor_core::{Tensor, UniformQuantizationInfo};

/// Element types the portable micro-kernels compute on through `f32`.
pub(crate) trait Scalar: bytemuck::Pod + Send + Sync + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Scalar for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Scalar for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl Scalar for bf16 {
    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
}

/// Quantized storage types: `u8` for QASYMM8, `i8` for QASYMM8_SIGNED,
/// `i16` for QSYMM16.
pub(crate) trait Quantized: bytemuck::Pod + Send + Sync + 'static {
    const MIN: i32;
    const MAX: i32;
    fn to_i32(self) -> i32;
    fn from_i32_saturating(v: i32) -> Self;

    #[inline]
    fn dequantize(self, q: UniformQuantizationInfo) -> f32 {
        (self.to_i32() - q.offset) as f32 * q.scale
    }

    #[inline]
    fn quantize(v: f32, q: UniformQuantizationInfo) -> Self {
        let scaled = (v / q.scale).round() as i32;
        Self::from_i32_saturating(scaled.saturating_add(q.offset))
    }
}

macro_rules! impl_quantized {
    ($t:ty) => {
        impl Quantized for $t {
            const MIN: i32 = <$t>::MIN as i32;
            const MAX: i32 = <$t>::MAX as i32;
            #[inline]
            fn to_i32(self) -> i32 {
                self as i32
            }
            #[inline]
            fn from_i32_saturating(v: i32) -> Self {
                v.clamp(<Self as Quantized>::MIN, <Self as Quantized>::MAX) as $t
            }
        }
    };
}

impl_quantized!(u8);
impl_quantized!(i8);
impl_quantized!(i16);

/// Reads the element at `coords`.
///
/// # Safety
/// `coords` must lie inside `t`'s shape and `T` must match its element size.
#[inline]
pub(crate) unsafe fn read<T: bytemuck::Pod>(t: &Tensor, coords: &[usize]) -> T {
    t.ptr_to_element(coords).cast::<T>().read_unaligned()
}

/// Writes the element at `coords`.
///
/// # Safety
/// As [`read`]; no other thread may access the element concurrently.
#[inline]
pub(crate) unsafe fn write<T: bytemuck::Pod>(t: &Tensor, coords: &[usize], v: T) {
    t.ptr_to_element(coords).cast::<T>().write_unaligned(v);
}

/// Reads element `i` of a dense tensor.
///
/// # Safety
/// `i` must be below the element count of `t`.
#[inline]
pub(crate) unsafe fn read_linear<T: bytemuck::Pod>(t: &Tensor, i: usize) -> T {
    t.buffer().cast::<T>().add(i).read_unaligned()
}

/// Writes element `i` of a dense tensor.
///
/// # Safety
/// As [`read_linear`]; no other thread may access the element concurrently.
#[inline]
pub(crate) unsafe fn write_linear<T: bytemuck::Pod>(t: &Tensor, i: usize, v: T) {
    t.buffer().cast::<T>().add(i).write_unaligned(v);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_saturates() {
        let q = UniformQuantizationInfo { scale: 0.5, offset: 10 };
        assert_eq!(<u8 as Quantized>::quantize(1000.0, q), 255);
        assert_eq!(<u8 as Quantized>::quantize(-1000.0, q), 0);
        assert_eq!(<u8 as Quantized>::quantize(1.0, q), 12);
        assert_eq!(12u8.dequantize(q), 1.0);
        assert_eq!(<i8 as Quantized>::quantize(-1000.0, q), -128);
    }

    #[test]
    fn test_half_roundtrip() {
        assert_eq!(<f16 as Scalar>::from_f32(1.5).to_f32(), 1.5);
        assert_eq!(<bf16 as Scalar>::from_f32(2.0).to_f32(), 2.0);
    }
}
