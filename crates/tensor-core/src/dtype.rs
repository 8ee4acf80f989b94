// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element data types understood by the kernels.

use std::fmt;

/// Enumerates the element types a [`crate::Tensor`] can hold.
///
/// Quantized variants share their storage type with a plain integer type
/// (`QAsymm8` is stored as `u8`) but carry scale/offset semantics through
/// [`crate::QuantizationInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    /// Not yet initialised.
    #[default]
    Unknown,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    S8,
    /// Symmetric 8-bit quantized (signed storage, zero offset).
    QSymm8,
    /// Asymmetric 8-bit quantized with unsigned storage.
    QAsymm8,
    /// Asymmetric 8-bit quantized with signed storage.
    QAsymm8Signed,
    /// Symmetric 8-bit quantized with one scale per output channel.
    QSymm8PerChannel,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    S16,
    /// Symmetric 16-bit quantized.
    QSymm16,
    /// Asymmetric 16-bit quantized.
    QAsymm16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    S32,
    /// 16-bit brain floating point.
    BFloat16,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 32-bit IEEE 754 floating point.
    F32,
}

impl DataType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::Unknown => 0,
            DataType::U8
            | DataType::S8
            | DataType::QSymm8
            | DataType::QAsymm8
            | DataType::QAsymm8Signed
            | DataType::QSymm8PerChannel => 1,
            DataType::U16
            | DataType::S16
            | DataType::QSymm16
            | DataType::QAsymm16
            | DataType::BFloat16
            | DataType::F16 => 2,
            DataType::U32 | DataType::S32 | DataType::F32 => 4,
        }
    }

    /// Returns a short label used in kernel names and messages.
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Unknown => "UNKNOWN",
            DataType::U8 => "U8",
            DataType::S8 => "S8",
            DataType::QSymm8 => "QSYMM8",
            DataType::QAsymm8 => "QASYMM8",
            DataType::QAsymm8Signed => "QASYMM8_SIGNED",
            DataType::QSymm8PerChannel => "QSYMM8_PER_CHANNEL",
            DataType::U16 => "U16",
            DataType::S16 => "S16",
            DataType::QSymm16 => "QSYMM16",
            DataType::QAsymm16 => "QASYMM16",
            DataType::U32 => "U32",
            DataType::S32 => "S32",
            DataType::BFloat16 => "BFLOAT16",
            DataType::F16 => "F16",
            DataType::F32 => "F32",
        }
    }

    /// Returns `true` for every quantized type.
    pub fn is_quantized(self) -> bool {
        matches!(
            self,
            DataType::QSymm8
                | DataType::QAsymm8
                | DataType::QAsymm8Signed
                | DataType::QSymm8PerChannel
                | DataType::QSymm16
                | DataType::QAsymm16
        )
    }

    /// Returns `true` for quantized types with a zero-point offset.
    pub fn is_quantized_asymmetric(self) -> bool {
        matches!(
            self,
            DataType::QAsymm8 | DataType::QAsymm8Signed | DataType::QAsymm16
        )
    }

    /// Returns `true` for per-channel quantized types.
    pub fn is_quantized_per_channel(self) -> bool {
        matches!(self, DataType::QSymm8PerChannel)
    }

    /// Returns `true` for floating-point types.
    pub fn is_float(self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::BFloat16)
    }

    /// Returns `true` when the storage type is signed.
    pub fn is_signed(self) -> bool {
        !matches!(
            self,
            DataType::U8 | DataType::QAsymm8 | DataType::U16 | DataType::QAsymm16 | DataType::U32
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
