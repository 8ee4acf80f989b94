// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budget-enforced arena that binds operator workspaces into tensor packs.
//!
//! The [`WorkspaceArena`] is the memory manager operators talk to only
//! through their [`MemoryRequirements`]. For each declared slot it:
//!
//! 1. Enforces a hard ceiling on live bytes: a bind that would exceed the
//!    budget fails with `Err(OutOfMemory)` and binds nothing.
//! 2. Serves `Temporary` and `Prepare` buffers from a free list binned by
//!    size class, so repeated runs do not hit the allocator.
//! 3. Keeps `Persistent` buffers per slot across binds, so data written in
//!    `prepare()` is still there for every later `run()`.
//!
//! # Size Classes
//! Transient buffers are rounded up to the next power of two (minimum 4 KB)
//! and reused for any request of the same class.

use crate::{
    ArenaStats, MemoryBudget, MemoryError, MemoryInfo, MemoryLifetime, WorkspaceGuard,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tensor_core::{DataType, Tensor, TensorInfo, TensorPack, TensorShape, TensorType};

/// Minimum size class: 4 KB. Anything smaller is rounded up.
const MIN_SIZE_CLASS: usize = 4096;

/// Arena state shared with outstanding [`WorkspaceGuard`]s.
pub(crate) struct ArenaInner {
    budget: MemoryBudget,
    /// Live bytes: transient buffers held by guards plus cached persistent buffers.
    live_bytes: AtomicUsize,
    /// Released transient buffers: size class → buffers.
    free_buffers: Mutex<HashMap<usize, Vec<Tensor>>>,
    persistent: Mutex<HashMap<TensorType, Tensor>>,
    stats: Mutex<ArenaStats>,
}

impl ArenaInner {
    /// Called by the guard for every transient buffer it gives back.
    pub(crate) fn return_buffer(&self, tensor: Arc<Tensor>, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::Release);
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_release();
        }
        // Still bound somewhere: let it die with its last handle.
        let Ok(tensor) = Arc::try_unwrap(tensor) else {
            return;
        };
        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(bytes).or_default().push(tensor);
        }
    }

    fn take_free(&self, class: usize, alignment: usize) -> Option<Tensor> {
        let mut free = self.free_buffers.lock().ok()?;
        let bin = free.get_mut(&class)?;
        let pos = bin
            .iter()
            .position(|t| t.buffer() as usize % alignment == 0)?;
        Some(bin.swap_remove(pos))
    }
}

/// External tagged arena for operator auxiliary tensors.
///
/// One arena is meant to serve one operator instance: persistent buffers
/// are cached by slot id, and two operators sharing an arena would share
/// their persistent slots.
///
/// # Example
/// ```
/// use memory_manager::{MemoryBudget, MemoryInfo, MemoryLifetime, WorkspaceArena};
/// use tensor_core::{offset_int_vec, TensorPack};
///
/// let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
/// let reqs = vec![MemoryInfo::new(offset_int_vec(0), MemoryLifetime::Temporary, 1000)];
///
/// let mut pack = TensorPack::new();
/// let guard = arena.bind(&reqs, &mut pack).unwrap();
/// assert!(pack.get_tensor(offset_int_vec(0)).is_some());
/// assert_eq!(arena.live_bytes(), 4096);
///
/// drop(pack);
/// drop(guard);
/// assert_eq!(arena.live_bytes(), 0);
/// ```
pub struct WorkspaceArena {
    inner: Arc<ArenaInner>,
}

impl WorkspaceArena {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                budget,
                live_bytes: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                persistent: Mutex::new(HashMap::new()),
                stats: Mutex::new(ArenaStats::default()),
            }),
        }
    }

    /// Allocates every non-empty requirement and binds it into `pack`.
    ///
    /// Requirements of size zero are skipped. Persistent slots reuse the
    /// buffer from a previous bind when it is still large enough. The
    /// returned guard releases the transient buffers when dropped.
    pub fn bind(
        &self,
        reqs: &[MemoryInfo],
        pack: &mut TensorPack,
    ) -> Result<WorkspaceGuard, MemoryError> {
        check_requirements(reqs)?;

        let mut persistent = self
            .inner
            .persistent
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        // Budget check for everything that needs fresh accounting.
        let mut needed = 0usize;
        for r in reqs.iter().filter(|r| r.size > 0) {
            match r.lifetime {
                MemoryLifetime::Persistent => {
                    if !reusable(persistent.get(&r.slot), r) {
                        needed += size_class_for(r.size);
                    }
                }
                _ => needed += size_class_for(r.size),
            }
        }
        let current = self.live_bytes();
        let budget = self.inner.budget.as_bytes();
        if !self.inner.budget.admits(current.saturating_add(needed)) {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_oom();
            }
            return Err(MemoryError::OutOfMemory {
                requested_bytes: needed,
                available_bytes: budget.saturating_sub(current),
                budget_bytes: budget,
            });
        }

        let mut stats = self.inner.stats.lock().unwrap_or_else(|e| e.into_inner());
        let mut transient = Vec::new();
        for r in reqs.iter().filter(|r| r.size > 0) {
            let info = raw_info(r.size);
            match r.lifetime {
                MemoryLifetime::Persistent => {
                    if reusable(persistent.get(&r.slot), r) {
                        stats.record_persistent_reuse();
                    } else {
                        let class = size_class_for(r.size);
                        if let Some(old) = persistent.remove(&r.slot) {
                            self.inner
                                .live_bytes
                                .fetch_sub(old.capacity(), Ordering::Release);
                        }
                        let t = Tensor::with_capacity(info.clone(), class, r.alignment);
                        self.inner.live_bytes.fetch_add(class, Ordering::Release);
                        stats.record_cache_miss(class);
                        persistent.insert(r.slot, t);
                    }
                    if let Some(t) = persistent.get(&r.slot) {
                        let view = t.reinterpret(info).unwrap_or_else(|_| t.clone());
                        pack.add_tensor(r.slot, Arc::new(view));
                    }
                }
                MemoryLifetime::Temporary | MemoryLifetime::Prepare => {
                    let class = size_class_for(r.size);
                    let reused = self
                        .inner
                        .take_free(class, r.alignment)
                        .and_then(|t| t.reinterpret(info.clone()).ok());
                    let tensor = match reused {
                        Some(t) => {
                            t.fill(0u8);
                            stats.record_cache_hit(class);
                            t
                        }
                        None => {
                            stats.record_cache_miss(class);
                            Tensor::with_capacity(info, class, r.alignment)
                        }
                    };
                    self.inner.live_bytes.fetch_add(class, Ordering::Release);
                    let tensor = Arc::new(tensor);
                    pack.add_tensor(r.slot, Arc::clone(&tensor));
                    transient.push((r.slot, r.lifetime, tensor, class));
                }
            }
        }
        stats.record_bind();
        stats.update_peak(self.live_bytes());
        drop(stats);
        drop(persistent);

        tracing::debug!(
            slots = reqs.iter().filter(|r| r.size > 0).count(),
            live_bytes = self.live_bytes(),
            "bound workspace"
        );
        Ok(WorkspaceGuard::new(transient, Arc::clone(&self.inner)))
    }

    /// Live bytes: transient buffers held by guards plus cached persistent buffers.
    pub fn live_bytes(&self) -> usize {
        self.inner.live_bytes.load(Ordering::Acquire)
    }

    /// Bytes remaining before hitting the budget.
    pub fn available_bytes(&self) -> usize {
        self.inner.budget.as_bytes().saturating_sub(self.live_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Bytes held by cached persistent slots.
    pub fn persistent_bytes(&self) -> usize {
        self.inner
            .persistent
            .lock()
            .map(|p| p.values().map(Tensor::capacity).sum())
            .unwrap_or(0)
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> ArenaStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drops every cached free buffer.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            free.clear();
        }
    }

    /// Drops every persistent buffer. The owning operator must be prepared again.
    pub fn clear_persistent(&self) {
        if let Ok(mut p) = self.inner.persistent.lock() {
            let bytes: usize = p.values().map(Tensor::capacity).sum();
            p.clear();
            self.inner.live_bytes.fetch_sub(bytes, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for WorkspaceArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceArena")
            .field("budget", &self.inner.budget)
            .field("live_bytes", &self.live_bytes())
            .field("persistent_bytes", &self.persistent_bytes())
            .finish()
    }
}

fn check_requirements(reqs: &[MemoryInfo]) -> Result<(), MemoryError> {
    let mut seen = HashSet::new();
    for r in reqs {
        if !seen.insert(r.slot) {
            return Err(MemoryError::DuplicateSlot { slot: r.slot });
        }
        if !r.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment {
                slot: r.slot,
                alignment: r.alignment,
            });
        }
    }
    Ok(())
}

fn reusable(cached: Option<&Tensor>, r: &MemoryInfo) -> bool {
    cached.is_some_and(|t| t.capacity() >= r.size && t.buffer() as usize % r.alignment == 0)
}

/// A raw byte tensor of `size` bytes.
fn raw_info(size: usize) -> TensorInfo {
    TensorInfo::new(TensorShape::new(&[size]), DataType::U8)
}

/// Smallest power of 2 that is ≥ `size` and ≥ `MIN_SIZE_CLASS`.
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::offset_int_vec;

    fn req(n: u32, lifetime: MemoryLifetime, size: usize) -> MemoryInfo {
        MemoryInfo::new(offset_int_vec(n), lifetime, size)
    }

    #[test]
    fn test_zero_sized_slots_are_skipped() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let mut pack = TensorPack::new();
        let _g = arena
            .bind(&[req(0, MemoryLifetime::Temporary, 0)], &mut pack)
            .unwrap();
        assert!(pack.is_empty());
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_alignment_respected() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let mut pack = TensorPack::new();
        let r = req(0, MemoryLifetime::Temporary, 100).with_alignment(4096);
        let _g = arena.bind(&[r], &mut pack).unwrap();
        let t = pack.get_tensor(offset_int_vec(0)).unwrap();
        assert_eq!(t.buffer() as usize % 4096, 0);
        assert_eq!(t.info().total_size(), 100);
    }

    #[test]
    fn test_oom_binds_nothing() {
        let arena = WorkspaceArena::new(MemoryBudget::from_bytes(8192));
        let mut pack = TensorPack::new();
        let reqs = [
            req(0, MemoryLifetime::Temporary, 4096),
            req(1, MemoryLifetime::Temporary, 4097),
        ];
        let err = arena.bind(&reqs, &mut pack).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { requested_bytes: 12288, .. }));
        assert!(pack.is_empty());
        assert_eq!(arena.stats().oom_count, 1);
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let reqs = [
            req(3, MemoryLifetime::Temporary, 10),
            req(3, MemoryLifetime::Persistent, 10),
        ];
        let err = arena.bind(&reqs, &mut TensorPack::new()).unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateSlot { .. }));
    }

    #[test]
    fn test_free_list_reuse_after_pack_dropped() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let reqs = [req(0, MemoryLifetime::Temporary, 5000)];
        {
            let mut pack = TensorPack::new();
            let g = arena.bind(&reqs, &mut pack).unwrap();
            pack.get_tensor(offset_int_vec(0)).unwrap().fill(0xAAu8);
            drop(pack);
            drop(g);
        }
        let mut pack = TensorPack::new();
        let _g = arena.bind(&reqs, &mut pack).unwrap();
        let stats = arena.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        // Reused buffers come back zeroed.
        let t = pack.get_tensor(offset_int_vec(0)).unwrap();
        assert!(t.to_vec::<u8>().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_persistent_survives_guard() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let reqs = [
            req(0, MemoryLifetime::Temporary, 64),
            req(1, MemoryLifetime::Persistent, 64),
        ];
        let mut pack = TensorPack::new();
        let g = arena.bind(&reqs, &mut pack).unwrap();
        pack.get_tensor(offset_int_vec(1)).unwrap().fill(7u8);
        drop(pack);
        drop(g);
        assert_eq!(arena.live_bytes(), MIN_SIZE_CLASS);
        assert_eq!(arena.persistent_bytes(), MIN_SIZE_CLASS);

        let mut pack = TensorPack::new();
        let _g = arena.bind(&reqs, &mut pack).unwrap();
        let t = pack.get_tensor(offset_int_vec(1)).unwrap();
        assert_eq!(t.to_vec::<u8>(), vec![7u8; 64]);
        assert_eq!(arena.stats().persistent_reuses, 1);
    }

    #[test]
    fn test_persistent_grows() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let mut pack = TensorPack::new();
        arena
            .bind(&[req(1, MemoryLifetime::Persistent, 100)], &mut pack)
            .unwrap();
        arena
            .bind(&[req(1, MemoryLifetime::Persistent, 10_000)], &mut pack)
            .unwrap();
        assert_eq!(arena.persistent_bytes(), 16384);
        assert_eq!(arena.live_bytes(), 16384);
        arena.clear_persistent();
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_size_class() {
        assert_eq!(size_class_for(1), MIN_SIZE_CLASS);
        assert_eq!(size_class_for(4096), 4096);
        assert_eq!(size_class_for(5000), 8192);
    }

    #[test]
    fn test_debug_format() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(64));
        let debug = format!("{arena:?}");
        assert!(debug.contains("WorkspaceArena"));
        assert!(debug.contains("budget"));
    }
}
