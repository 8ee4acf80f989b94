// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types shared by kernels and operators.
//!
//! Every `validate()` in the workspace returns a [`Status`]. The error
//! variants carry enough context (operator name, expected vs actual
//! property) to diagnose a rejected configuration without reading source.

use crate::{DataLayout, DataType, TensorShape};

/// Coarse classification of a [`ComputeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorCode {
    /// The configuration is invalid or not supported by any implementation.
    RuntimeError,
    /// The configuration needs a CPU extension the host lacks.
    UnsupportedExtensionUse,
}

/// Errors reported by `validate()` and `configure()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputeError {
    /// Two tensors that must share a data type do not.
    #[error("{op}: mismatching data types, expected {expected} but got {actual}")]
    MismatchingDataTypes {
        op: &'static str,
        expected: DataType,
        actual: DataType,
    },

    /// Two tensors that must share a shape do not.
    #[error("{op}: mismatching shapes, expected {expected} but got {actual}")]
    MismatchingShapes {
        op: &'static str,
        expected: TensorShape,
        actual: TensorShape,
    },

    /// Two tensors that must share quantization parameters do not.
    #[error("{op}: mismatching quantization info: {detail}")]
    MismatchingQuantization { op: &'static str, detail: String },

    /// The data type is not handled by the operation.
    #[error("{op}: unsupported data type {dtype}")]
    UnsupportedDataType { op: &'static str, dtype: DataType },

    /// The data layout is not handled by the operation.
    #[error("{op}: unsupported data layout {layout:?}")]
    UnsupportedLayout { op: &'static str, layout: DataLayout },

    /// No micro-kernel in the selection table matched.
    #[error("{op}: no micro-kernel available for {detail}")]
    NoMicroKernel { op: &'static str, detail: String },

    /// The host CPU lacks an extension required by the configuration.
    #[error("{op}: this CPU architecture does not support {extension}")]
    UnsupportedExtension {
        op: &'static str,
        extension: &'static str,
    },

    /// A scalar argument or tensor relationship is invalid.
    #[error("{op}: {detail}")]
    InvalidArgument { op: &'static str, detail: String },

    /// The combination is valid in principle but not implemented.
    #[error("{op}: not supported: {detail}")]
    Unsupported { op: &'static str, detail: String },

    /// A buffer does not match the size implied by its descriptor.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

impl ComputeError {
    /// Returns the status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ComputeError::UnsupportedExtension { .. } => ErrorCode::UnsupportedExtensionUse,
            _ => ErrorCode::RuntimeError,
        }
    }

    /// Shorthand for [`ComputeError::InvalidArgument`].
    pub fn invalid(op: &'static str, detail: impl Into<String>) -> Self {
        ComputeError::InvalidArgument {
            op,
            detail: detail.into(),
        }
    }

    /// Shorthand for [`ComputeError::Unsupported`].
    pub fn unsupported(op: &'static str, detail: impl Into<String>) -> Self {
        ComputeError::Unsupported {
            op,
            detail: detail.into(),
        }
    }
}

/// Outcome of a validation step.
pub type Status = Result<(), ComputeError>;

/// Returns `Err(InvalidArgument)` when `cond` holds.
///
/// # Examples
/// ```
/// use tensor_core::{return_error_on, Status};
/// fn check(k: usize) -> Status {
///     return_error_on!(k == 0, "Check", "K must be positive");
///     Ok(())
/// }
/// assert!(check(0).is_err());
/// assert!(check(3).is_ok());
/// ```
#[macro_export]
macro_rules! return_error_on {
    ($cond:expr, $op:expr, $($fmt:tt)+) => {
        if $cond {
            return Err($crate::ComputeError::InvalidArgument {
                op: $op,
                detail: format!($($fmt)+),
            });
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_both_types() {
        let e = ComputeError::MismatchingDataTypes {
            op: "CpuGemm",
            expected: DataType::F32,
            actual: DataType::F16,
        };
        let msg = e.to_string();
        assert!(msg.contains("F32"));
        assert!(msg.contains("F16"));
        assert!(msg.contains("CpuGemm"));
    }

    #[test]
    fn test_error_codes() {
        let e = ComputeError::UnsupportedExtension {
            op: "CpuGemm",
            extension: "FP16",
        };
        assert_eq!(e.code(), ErrorCode::UnsupportedExtensionUse);
        assert_eq!(ComputeError::invalid("x", "y").code(), ErrorCode::RuntimeError);
    }
}
