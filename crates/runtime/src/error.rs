// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the runtime layer.

/// Errors raised while setting up schedulers and configuration.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The worker pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),

    /// A workspace budget or binding failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// An operator rejected its configuration.
    #[error("compute error: {0}")]
    ComputeError(#[from] tensor_core::ComputeError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
