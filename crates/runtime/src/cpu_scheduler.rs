// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Multi-threaded scheduler backed by a named rayon pool.

use crate::{RuntimeError, Scheduler, SingleThreadScheduler, ThreadInfo, Workload};
use cpu_info::CpuInfo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

static DEFAULT_SCHEDULER: OnceLock<Arc<dyn Scheduler>> = OnceLock::new();

/// Returns the process-wide scheduler: one worker per online core.
///
/// Falls back to a [`SingleThreadScheduler`] if the pool cannot be built.
pub fn default_scheduler() -> Arc<dyn Scheduler> {
    let sched = DEFAULT_SCHEDULER.get_or_init(|| {
        let cpu = CpuInfo::get();
        match CpuScheduler::with_cpu_info(cpu.num_cpus(), cpu.clone()) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to single-threaded scheduling");
                Arc::new(SingleThreadScheduler::with_cpu_info(cpu.clone()))
            }
        }
    });
    Arc::clone(sched)
}

/// Runs workloads on a fixed set of worker threads.
///
/// Workers pull workloads from a shared counter, so a list longer than the
/// pool is fed to whichever worker becomes idle first. Each worker reports
/// its own index as `thread_id`, which kernels use to pick per-thread
/// scratch memory.
pub struct CpuScheduler {
    pool: RwLock<Arc<rayon::ThreadPool>>,
    cpu: CpuInfo,
}

impl CpuScheduler {
    /// Creates a scheduler with `num_threads` workers (`0` = online cores).
    pub fn new(num_threads: usize) -> Result<Self, RuntimeError> {
        Self::with_cpu_info(num_threads, CpuInfo::get().clone())
    }

    /// Creates a scheduler reporting `cpu` to the kernels it runs.
    pub fn with_cpu_info(num_threads: usize, cpu: CpuInfo) -> Result<Self, RuntimeError> {
        let threads = resolve(num_threads, &cpu);
        let pool = build_pool(threads)?;
        tracing::info!(threads, "created compute thread pool");
        Ok(Self {
            pool: RwLock::new(Arc::new(pool)),
            cpu,
        })
    }

    fn pool(&self) -> Arc<rayon::ThreadPool> {
        let guard = self.pool.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

impl Scheduler for CpuScheduler {
    fn num_threads(&self) -> usize {
        self.pool().current_num_threads()
    }

    fn set_num_threads(&self, num_threads: usize) {
        let threads = resolve(num_threads, &self.cpu);
        if threads == self.num_threads() {
            return;
        }
        match build_pool(threads) {
            Ok(pool) => {
                let mut guard = self.pool.write().unwrap_or_else(|e| e.into_inner());
                *guard = Arc::new(pool);
                tracing::info!(threads, "resized compute thread pool");
            }
            Err(e) => tracing::warn!(error = %e, threads, "keeping the current thread pool"),
        }
    }

    fn cpu_info(&self) -> &CpuInfo {
        &self.cpu
    }

    fn run_workloads(&self, workloads: Vec<Workload<'_>>) {
        if workloads.is_empty() {
            return;
        }
        let pool = self.pool();
        let num_threads = workloads.len().min(pool.current_num_threads()).max(1);
        if num_threads == 1 {
            for w in &workloads {
                w(&ThreadInfo::SINGLE);
            }
            return;
        }

        let next = AtomicUsize::new(0);
        let workloads = &workloads;
        let next = &next;
        pool.scope(|s| {
            for thread_id in 0..num_threads {
                s.spawn(move |_| {
                    let info = ThreadInfo {
                        thread_id,
                        num_threads,
                    };
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        match workloads.get(i) {
                            Some(w) => w(&info),
                            None => break,
                        }
                    }
                });
            }
        });
    }
}

impl std::fmt::Debug for CpuScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuScheduler")
            .field("num_threads", &self.num_threads())
            .field("cpu", &self.cpu.model())
            .finish()
    }
}

fn resolve(num_threads: usize, cpu: &CpuInfo) -> usize {
    if num_threads == 0 {
        cpu.num_cpus().max(1)
    } else {
        num_threads
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool, RuntimeError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("compute-worker-{i}"))
        .build()
        .map_err(|e| RuntimeError::ThreadPool(e.to_string()))
}
