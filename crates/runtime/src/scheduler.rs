// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scheduler contract and the window-splitting policy shared by every
//! implementation.
//!
//! A scheduler does two things:
//! - [`Scheduler::schedule_op`]: cut a kernel's window into disjoint
//!   sub-windows and run `run_op` once per sub-window.
//! - [`Scheduler::run_workloads`]: run a list of closures on up to
//!   `num_threads` workers, blocking until all of them return.

use crate::{CpuKernel, ThreadInfo};
use cpu_info::CpuInfo;
use tensor_core::{TensorPack, Window};

/// Split along both X and Y, as a 2-D grid of sub-windows.
pub const SPLIT_DIMENSIONS_ALL: usize = usize::MAX;

/// How sub-windows are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyHint {
    /// One sub-window per thread.
    #[default]
    Static,
    /// More sub-windows than threads; idle workers pick up the next one.
    Dynamic,
}

/// Scheduling hints passed alongside a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hints {
    split_dimension: usize,
    strategy: StrategyHint,
    /// Number of sub-windows for [`StrategyHint::Dynamic`]; `<= 0` means one per thread.
    threshold: i32,
    /// Upper bound on concurrent workers, and so on `ThreadInfo::thread_id`.
    max_threads: usize,
}

impl Hints {
    pub fn new(split_dimension: usize) -> Self {
        Self {
            split_dimension,
            strategy: StrategyHint::Static,
            threshold: 0,
            max_threads: usize::MAX,
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyHint, threshold: i32) -> Self {
        self.strategy = strategy;
        self.threshold = threshold;
        self
    }

    /// Caps the number of sub-windows at `max_threads`, so every
    /// `thread_id` the kernel sees is below it whatever the pool size.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn split_dimension(&self) -> usize {
        self.split_dimension
    }

    pub fn strategy(&self) -> StrategyHint {
        self.strategy
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }
}

/// A unit of work for [`Scheduler::run_workloads`].
///
/// Workloads are shared between workers and each one is invoked exactly once.
pub type Workload<'a> = Box<dyn Fn(&ThreadInfo) + Send + Sync + 'a>;

/// A thread pool that runs kernels and workloads.
pub trait Scheduler: Send + Sync {
    /// Number of workers used by [`run_workloads`](Scheduler::run_workloads).
    fn num_threads(&self) -> usize;

    /// Resizes the worker pool (`0` means one per online core).
    fn set_num_threads(&self, num_threads: usize);

    fn cpu_info(&self) -> &CpuInfo;

    /// Runs every workload and returns once all have finished.
    fn run_workloads(&self, workloads: Vec<Workload<'_>>);

    /// [`run_workloads`](Scheduler::run_workloads) with a tag for tracing.
    fn run_tagged_workloads(&self, workloads: Vec<Workload<'_>>, tag: &str) {
        tracing::trace!(tag, count = workloads.len(), "running workloads");
        self.run_workloads(workloads);
    }

    /// Splits `window` according to `hints` and runs `kernel.run_op` on every part.
    fn schedule_op(&self, kernel: &dyn CpuKernel, hints: &Hints, window: &Window, tensors: &TensorPack) {
        schedule_common(self, kernel, hints, window, tensors);
    }

    /// Runs `kernel` over its own window with no tensors.
    fn schedule(&self, kernel: &dyn CpuKernel, hints: &Hints) {
        self.schedule_op(kernel, hints, kernel.window(), &TensorPack::new());
    }
}

/// The splitting policy behind [`Scheduler::schedule_op`].
///
/// - `SPLIT_DIMENSIONS_ALL`: the (x, y) plane is cut into a grid with a
///   thread ratio close to the ratio of the two extents.
/// - otherwise: `min(iterations, num_threads, max_threads)` threads; a kernel that is not
///   parallelisable, or a single thread, runs the whole window inline.
///   Static uses one window per thread, dynamic uses
///   `min(iterations, threshold)` windows. The count is then lowered until
///   each window holds at least `get_mws` iterations.
pub fn schedule_common<S: Scheduler + ?Sized>(
    sched: &S,
    kernel: &dyn CpuKernel,
    hints: &Hints,
    window: &Window,
    tensors: &TensorPack,
) {
    if hints.split_dimension() == SPLIT_DIMENSIONS_ALL {
        let m = window.num_iterations(Window::DIM_X);
        let n = window.num_iterations(Window::DIM_Y);
        if m == 0 || n == 0 {
            return;
        }
        let (m_threads, n_threads) = split_2d(sched.num_threads().min(hints.max_threads()), m, n);
        let mut workloads: Vec<Workload<'_>> = Vec::with_capacity(m_threads * n_threads);
        for ni in 0..n_threads {
            for mi in 0..m_threads {
                workloads.push(Box::new(move |info: &ThreadInfo| {
                    let win = window
                        .split_window(Window::DIM_X, mi, m_threads)
                        .split_window(Window::DIM_Y, ni, n_threads);
                    kernel.run_op(tensors, &win, info);
                }));
            }
        }
        sched.run_tagged_workloads(workloads, kernel.name());
        return;
    }

    let split = hints.split_dimension();
    let num_iterations = window.num_iterations(split);
    if num_iterations == 0 {
        return;
    }
    let num_threads = num_iterations.min(sched.num_threads()).min(hints.max_threads());
    if !kernel.is_parallelisable() || num_threads <= 1 {
        kernel.run_op(tensors, window, &ThreadInfo::SINGLE);
        return;
    }

    let num_windows = match hints.strategy() {
        StrategyHint::Static => num_threads,
        StrategyHint::Dynamic => {
            let threshold = if hints.threshold() <= 0 {
                num_threads
            } else {
                hints.threshold() as usize
            };
            num_iterations.min(threshold)
        }
    };
    let num_windows = num_windows.min(hints.max_threads());
    let num_windows = adjust_num_of_windows(window, split, num_windows, kernel, sched.cpu_info());
    tracing::trace!(kernel = kernel.name(), split, num_windows, "scheduling kernel");

    let workloads: Vec<Workload<'_>> = (0..num_windows)
        .map(|t| {
            Box::new(move |info: &ThreadInfo| {
                let win = window.split_window(split, t, num_windows);
                kernel.run_op(tensors, &win, info);
            }) as Workload<'_>
        })
        .collect();
    sched.run_tagged_workloads(workloads, kernel.name());
}

/// Largest `t <= init` such that every one of `t` windows gets at least
/// `mws` iterations along `split`.
pub fn adjust_num_of_windows(
    window: &Window,
    split: usize,
    init: usize,
    kernel: &dyn CpuKernel,
    cpu: &CpuInfo,
) -> usize {
    let iterations = window.num_iterations(split);
    if iterations < init {
        let recommended = (Window::DIM_Y..=Window::DIM_W).fold(Window::DIM_X, |best, d| {
            if window.num_iterations(best) < window.num_iterations(d) {
                d
            } else {
                best
            }
        });
        tracing::debug!(
            kernel = kernel.name(),
            split,
            recommended,
            "split dimension is too narrow for the thread count"
        );
    }
    for t in (1..=init).rev() {
        let mws = kernel.get_mws(cpu, t).max(1);
        if iterations / mws >= t {
            if t != init {
                tracing::debug!(kernel = kernel.name(), from = init, to = t, "reduced window count to honour the minimum workload size");
            }
            return t;
        }
    }
    1
}

/// Splits `max_threads` into an `(m_threads, n_threads)` grid whose ratio
/// follows `m / n`. The product equals `max_threads` when a factor close to
/// the ideal ratio exists.
pub fn split_2d(max_threads: usize, m: usize, n: usize) -> (usize, usize) {
    let max_threads = max_threads.max(1);
    let ratio = m as f64 / n.max(1) as f64;
    let adjusted = (max_threads as f64 * ratio).sqrt().round() as usize;

    for i in 0..adjusted {
        let down = adjusted - i;
        if max_threads % down == 0 {
            return (down, max_threads / down);
        }
        let up = adjusted + i;
        if max_threads % up == 0 {
            return (up, max_threads / up);
        }
    }

    if m > n {
        (m.min(max_threads), 1)
    } else {
        (1, n.min(max_threads))
    }
}
