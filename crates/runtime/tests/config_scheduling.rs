// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: a TOML file drives scheduler construction, and the
//! scheduler it yields runs kernels and workloads to completion.

use runtime::{CpuKernel, Hints, RuntimeConfig, RuntimeError, ThreadInfo, Workload};
use std::sync::atomic::{AtomicUsize, Ordering};
use tensor_core::{Dimension, TensorPack, Window};

// ── Helpers ────────────────────────────────────────────────────

/// Counts the rows it is asked to produce.
struct RowCounter {
    window: Window,
    rows: AtomicUsize,
}

impl RowCounter {
    fn new(rows: usize) -> Self {
        Self {
            window: Window::new()
                .with(Window::DIM_X, Dimension::new(0, 8, 8))
                .with(Window::DIM_Y, Dimension::new(0, rows, 1)),
            rows: AtomicUsize::new(0),
        }
    }
}

impl CpuKernel for RowCounter {
    fn name(&self) -> &str {
        "row-counter"
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn run_op(&self, _tensors: &TensorPack, window: &Window, _info: &ThreadInfo) {
        let y = window.y();
        self.rows.fetch_add(y.end() - y.start(), Ordering::Relaxed);
    }
}

fn write_config(name: &str, body: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("compute-rt-{}-{name}.toml", std::process::id()));
    std::fs::write(&path, body).unwrap();
    path
}

// ── Tests ──────────────────────────────────────────────────────

#[test]
fn config_file_builds_a_working_pool() {
    let path = write_config(
        "pool",
        r#"
num_threads = 3
scheduler = "cpp"
workspace_budget = "64M"
"#,
    );
    let config = RuntimeConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.resolve_threads(), 3);
    assert_eq!(config.parse_budget().unwrap().as_mb(), 64);
    let scheduler = config.build_scheduler().unwrap();
    assert_eq!(scheduler.num_threads(), 3);

    let kernel = RowCounter::new(37);
    scheduler.schedule_op(&kernel, &Hints::new(Window::DIM_Y), kernel.window(), &TensorPack::new());
    assert_eq!(kernel.rows.load(Ordering::Relaxed), 37);

    let ran = AtomicUsize::new(0);
    let workloads: Vec<Workload<'_>> = (0..10)
        .map(|_| {
            Box::new(|_: &ThreadInfo| {
                ran.fetch_add(1, Ordering::Relaxed);
            }) as Workload<'_>
        })
        .collect();
    scheduler.run_workloads(workloads);
    assert_eq!(ran.load(Ordering::Relaxed), 10);
}

#[test]
fn single_thread_config_runs_inline() {
    let config = RuntimeConfig::from_toml("scheduler = \"single-thread\"").unwrap();
    let scheduler = config.build_scheduler().unwrap();
    assert_eq!(scheduler.num_threads(), 1);

    let kernel = RowCounter::new(5);
    scheduler.schedule_op(&kernel, &Hints::new(Window::DIM_Y), kernel.window(), &TensorPack::new());
    assert_eq!(kernel.rows.load(Ordering::Relaxed), 5);
}

#[test]
fn bad_config_is_reported() {
    let unknown = RuntimeConfig::from_toml("scheduler = \"openmp\"").unwrap();
    assert!(matches!(unknown.build_scheduler(), Err(RuntimeError::ConfigError(_))));

    let missing = RuntimeConfig::from_file(std::path::Path::new("/nonexistent/compute-rt.toml"));
    assert!(matches!(missing, Err(RuntimeError::ConfigError(_))));

    assert!(RuntimeConfig::from_toml("num_threads = \"many\"").is_err());
}
