// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Auxiliary-buffer declarations produced by operators at configure time.

use tensor_core::TensorType;

/// How long an auxiliary buffer must stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MemoryLifetime {
    /// Valid for a single `run()`.
    Temporary,
    /// Valid until `prepare()` completes.
    Prepare,
    /// Valid for the lifetime of the operator.
    Persistent,
}

/// One auxiliary buffer an operator needs bound before `run()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Pack slot the buffer must be bound to.
    pub slot: TensorType,
    pub lifetime: MemoryLifetime,
    /// Size in bytes. Zero means the slot is unused for this configuration.
    pub size: usize,
    /// Required alignment of the buffer start, in bytes.
    pub alignment: usize,
}

impl MemoryInfo {
    pub fn new(slot: TensorType, lifetime: MemoryLifetime, size: usize) -> Self {
        Self {
            slot,
            lifetime,
            size,
            alignment: 64,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }
}

/// The complete workspace declaration of an operator.
pub type MemoryRequirements = Vec<MemoryInfo>;

/// Total bytes declared with the given lifetime.
pub fn total_bytes(reqs: &[MemoryInfo], lifetime: MemoryLifetime) -> usize {
    reqs.iter()
        .filter(|r| r.lifetime == lifetime)
        .map(|r| r.size)
        .sum()
}
