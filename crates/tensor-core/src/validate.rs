// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reusable checks for `validate()` implementations.

use crate::{ComputeError, DataLayout, DataType, Status, TensorInfo};

/// Fails unless `info`'s data type is one of `allowed`.
pub fn data_type_in(op: &'static str, info: &TensorInfo, allowed: &[DataType]) -> Status {
    if allowed.contains(&info.data_type()) {
        Ok(())
    } else {
        Err(ComputeError::UnsupportedDataType {
            op,
            dtype: info.data_type(),
        })
    }
}

/// Fails unless both descriptors share a data type.
pub fn matching_data_types(op: &'static str, expected: &TensorInfo, actual: &TensorInfo) -> Status {
    if expected.data_type() == actual.data_type() {
        Ok(())
    } else {
        Err(ComputeError::MismatchingDataTypes {
            op,
            expected: expected.data_type(),
            actual: actual.data_type(),
        })
    }
}

/// Fails unless both descriptors share a shape.
pub fn matching_shapes(op: &'static str, expected: &TensorInfo, actual: &TensorInfo) -> Status {
    if expected.shape() == actual.shape() {
        Ok(())
    } else {
        Err(ComputeError::MismatchingShapes {
            op,
            expected: *expected.shape(),
            actual: *actual.shape(),
        })
    }
}

/// Fails unless both descriptors share quantization parameters.
pub fn matching_quantization(op: &'static str, expected: &TensorInfo, actual: &TensorInfo) -> Status {
    if expected.quantization_info() == actual.quantization_info() {
        Ok(())
    } else {
        Err(ComputeError::MismatchingQuantization {
            op,
            detail: format!(
                "expected {:?}, got {:?}",
                expected.quantization_info().uniform(),
                actual.quantization_info().uniform()
            ),
        })
    }
}

/// Fails unless the layout is one of `allowed`.
pub fn layout_in(op: &'static str, info: &TensorInfo, allowed: &[DataLayout]) -> Status {
    if allowed.contains(&info.data_layout()) {
        Ok(())
    } else {
        Err(ComputeError::UnsupportedLayout {
            op,
            layout: info.data_layout(),
        })
    }
}

/// Fails for F16 tensors when the CPU has no half-precision arithmetic.
pub fn cpu_f16_supported(op: &'static str, info: &TensorInfo, has_fp16: bool) -> Status {
    if info.data_type() == DataType::F16 && !has_fp16 {
        return Err(ComputeError::UnsupportedExtension {
            op,
            extension: "FP16",
        });
    }
    Ok(())
}

/// Fails for BF16 tensors when the CPU has no BF16 instructions.
pub fn cpu_bf16_supported(op: &'static str, info: &TensorInfo, has_bf16: bool) -> Status {
    if info.data_type() == DataType::BFloat16 && !has_bf16 {
        return Err(ComputeError::UnsupportedExtension {
            op,
            extension: "BF16",
        });
    }
    Ok(())
}

/// Fails when `info` has not been initialised.
pub fn initialised(op: &'static str, info: &TensorInfo) -> Status {
    if info.is_initialised() {
        Ok(())
    } else {
        Err(ComputeError::invalid(op, "tensor info is not initialised"))
    }
}
