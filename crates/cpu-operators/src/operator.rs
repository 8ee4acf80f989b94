// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The lifecycle shared by every operator.
//!
//! ```text
//! Op::new()/with_context(ctx)
//!     │  .configure(infos..) -> Status        kernels selected, workspace declared
//!     ▼
//! caller binds op.workspace() into the pack
//!     │
//!     ▼
//! op.run(&pack) ──► prepare(&pack) once ──► scheduler calls, in order
//! ```

use cpu_info::CpuInfo;
use memory_manager::MemoryRequirements;
use runtime::{default_scheduler, CpuKernel, Hints, Scheduler};
use std::sync::Arc;
use tensor_core::{Tensor, TensorPack, TensorType, Window};

/// A configured tensor operation.
///
/// `run` and `prepare` treat a missing or mis-sized pack tensor as a
/// contract violation and panic; everything that can be checked from
/// metadata is rejected earlier by `validate`/`configure`.
pub trait Operator: Send {
    /// Input-independent precomputation. Later calls are no-ops until
    /// something marks the operator unprepared again.
    fn prepare(&mut self, _tensors: &TensorPack) {}

    /// Runs the operation, preparing first if needed.
    fn run(&mut self, tensors: &TensorPack);

    /// Auxiliary buffers to bind before `run`.
    fn workspace(&self) -> MemoryRequirements {
        Vec::new()
    }
}

/// Shared handle to a pack tensor the operator cannot run without.
///
/// # Panics
/// Panics naming `op` and the role when the tensor is missing.
pub(crate) fn required(tensors: &TensorPack, op: &'static str, ty: TensorType) -> Arc<Tensor> {
    match tensors.require(op, ty) {
        Ok(t) => Arc::clone(t),
        Err(e) => panic!("{e}"),
    }
}

/// Scheduler an operator dispatches to.
#[derive(Clone)]
pub struct OperatorContext {
    scheduler: Arc<dyn Scheduler>,
}

impl OperatorContext {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn cpu_info(&self) -> &CpuInfo {
        self.scheduler.cpu_info()
    }

    pub fn num_threads(&self) -> usize {
        self.scheduler.num_threads()
    }

    /// Runs `kernel` over its whole window, split along its preferred dimension.
    pub(crate) fn schedule(&self, kernel: &dyn CpuKernel, tensors: &TensorPack) {
        self.schedule_window(kernel, kernel.split_dimension(), kernel.window(), tensors);
    }

    pub(crate) fn schedule_split(&self, kernel: &dyn CpuKernel, split_dimension: usize, tensors: &TensorPack) {
        self.schedule_window(kernel, split_dimension, kernel.window(), tensors);
    }

    pub(crate) fn schedule_window(
        &self,
        kernel: &dyn CpuKernel,
        split_dimension: usize,
        window: &Window,
        tensors: &TensorPack,
    ) {
        self.scheduler
            .schedule_op(kernel, &Hints::new(split_dimension), window, tensors);
    }

    pub(crate) fn schedule_hints(&self, kernel: &dyn CpuKernel, hints: &Hints, tensors: &TensorPack) {
        self.scheduler.schedule_op(kernel, hints, kernel.window(), tensors);
    }
}

impl Default for OperatorContext {
    /// The process-wide scheduler.
    fn default() -> Self {
        Self::new(default_scheduler())
    }
}

impl std::fmt::Debug for OperatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorContext")
            .field("num_threads", &self.scheduler.num_threads())
            .finish()
    }
}
