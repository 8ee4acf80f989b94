// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for workspace management.

use tensor_core::TensorType;

/// Errors that can occur while binding operator workspaces.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The requested allocation would exceed the workspace budget.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// A budget string could not be parsed.
    #[error("invalid budget string: '{0}', expected a number followed by an optional suffix (K, M, G)")]
    InvalidBudget(String),

    /// The same slot was declared twice in one requirement list.
    #[error("slot {slot:?} is declared more than once")]
    DuplicateSlot { slot: TensorType },

    /// An alignment that is not a power of two.
    #[error("slot {slot:?}: alignment {alignment} is not a power of two")]
    InvalidAlignment { slot: TensorType, alignment: usize },
}
