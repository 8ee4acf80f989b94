// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core micro-architecture identification from MIDR part numbers.

/// Known core micro-architectures. Used to tune minimum workload sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum CpuModel {
    #[default]
    Generic,
    A53,
    A55,
    A510,
    A72,
    A73,
    A76,
    N1,
    V1,
    X1,
}

impl CpuModel {
    /// Maps an Arm Ltd. MIDR part number (`CPU part` in `/proc/cpuinfo`).
    pub fn from_part(part: u32) -> Self {
        match part {
            0xd03 => CpuModel::A53,
            0xd05 => CpuModel::A55,
            0xd46 => CpuModel::A510,
            0xd08 => CpuModel::A72,
            0xd09 => CpuModel::A73,
            0xd0b => CpuModel::A76,
            0xd0c => CpuModel::N1,
            0xd40 => CpuModel::V1,
            0xd44 => CpuModel::X1,
            _ => CpuModel::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CpuModel::Generic => "GENERIC",
            CpuModel::A53 => "A53",
            CpuModel::A55 => "A55",
            CpuModel::A510 => "A510",
            CpuModel::A72 => "A72",
            CpuModel::A73 => "A73",
            CpuModel::A76 => "A76",
            CpuModel::N1 => "N1",
            CpuModel::V1 => "V1",
            CpuModel::X1 => "X1",
        }
    }
}
