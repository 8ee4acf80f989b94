// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scheduler that runs everything on the calling thread.

use crate::{CpuKernel, Hints, Scheduler, ThreadInfo, Workload};
use cpu_info::CpuInfo;
use tensor_core::{TensorPack, Window};

/// Runs kernels over their full window and workloads one after another.
#[derive(Debug, Clone)]
pub struct SingleThreadScheduler {
    cpu: CpuInfo,
}

impl SingleThreadScheduler {
    pub fn new() -> Self {
        Self::with_cpu_info(CpuInfo::get().clone())
    }

    pub fn with_cpu_info(cpu: CpuInfo) -> Self {
        Self { cpu }
    }
}

impl Default for SingleThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SingleThreadScheduler {
    fn num_threads(&self) -> usize {
        1
    }

    fn set_num_threads(&self, num_threads: usize) {
        if num_threads > 1 {
            tracing::warn!(num_threads, "single-threaded scheduler ignores thread count");
        }
    }

    fn cpu_info(&self) -> &CpuInfo {
        &self.cpu
    }

    fn run_workloads(&self, workloads: Vec<Workload<'_>>) {
        for w in &workloads {
            w(&ThreadInfo::SINGLE);
        }
    }

    fn schedule_op(&self, kernel: &dyn CpuKernel, _hints: &Hints, window: &Window, tensors: &TensorPack) {
        kernel.run_op(tensors, window, &ThreadInfo::SINGLE);
    }
}
