// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The execution contract between kernels and the thread pool.
//!
//! - [`CpuKernel`]: what a configured kernel exposes to a scheduler: its
//!   window, `run_op` over a sub-window, a minimum workload size and a
//!   preferred split dimension.
//! - [`Scheduler`]: splits a window into disjoint sub-windows
//!   ([`schedule_common`]) and runs them, or runs a list of closures.
//! - [`CpuScheduler`] / [`SingleThreadScheduler`]: the two implementations.
//! - [`RuntimeConfig`]: thread count, scheduler choice and workspace budget
//!   from TOML.
//!
//! # Execution Model
//! ```text
//! Operator::run(pack)
//!     │
//!     ▼
//! Scheduler::schedule_op(kernel, hints, window, pack)
//!     │   split_window(dim, t, num_windows)   t = 0..num_windows
//!     ▼
//! worker t ──► kernel.run_op(pack, sub_window, ThreadInfo { thread_id, .. })
//! ```
//! Every call blocks until all workers are done; there is no async layer.

mod config;
mod cpu_scheduler;
mod error;
mod kernel;
mod scheduler;
mod single_thread;

pub use config::RuntimeConfig;
pub use cpu_scheduler::{default_scheduler, CpuScheduler};
pub use error::RuntimeError;
pub use kernel::{CpuKernel, ThreadInfo};
pub use scheduler::{
    adjust_num_of_windows, schedule_common, split_2d, Hints, Scheduler, StrategyHint, Workload,
    SPLIT_DIMENSIONS_ALL,
};
pub use single_thread::SingleThreadScheduler;
