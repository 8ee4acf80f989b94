// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The contract between kernels and the scheduler.

use cpu_info::CpuInfo;
use tensor_core::{TensorPack, Window};

/// Identifies the worker running a sub-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Index of the worker, `0..num_threads`.
    pub thread_id: usize,
    pub num_threads: usize,
}

impl ThreadInfo {
    /// The info of a single-threaded run.
    pub const SINGLE: ThreadInfo = ThreadInfo {
        thread_id: 0,
        num_threads: 1,
    };
}

impl Default for ThreadInfo {
    fn default() -> Self {
        Self::SINGLE
    }
}

/// A configured compute kernel.
///
/// `run_op` is called concurrently from several workers, each with a
/// disjoint sub-window of [`window`](CpuKernel::window). It must only
/// write the part of its output covered by that sub-window.
pub trait CpuKernel: Send + Sync {
    /// Name of the selected micro-kernel (or of the kernel when it has none).
    fn name(&self) -> &str;

    /// The full iteration domain computed at configure time.
    fn window(&self) -> &Window;

    /// Executes the kernel over `window`.
    ///
    /// # Panics
    /// Panics if a tensor the kernel was configured for is missing from
    /// `tensors`.
    fn run_op(&self, tensors: &TensorPack, window: &Window, info: &ThreadInfo);

    /// Minimum number of iterations along the split dimension a worker
    /// should receive.
    fn get_mws(&self, _cpu: &CpuInfo, _threads: usize) -> usize {
        1
    }

    /// Dimension the kernel prefers to be split along.
    fn split_dimension(&self) -> usize {
        Window::DIM_Y
    }

    /// `false` if the kernel must run on a single worker.
    fn is_parallelisable(&self) -> bool {
        true
    }
}
