// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Workspace statistics for profiling and budget tuning.

/// Cumulative statistics about a [`WorkspaceArena`](crate::WorkspaceArena).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ArenaStats {
    /// Number of successful `bind` calls.
    pub binds: u64,
    /// Transient buffers served from the free list.
    pub cache_hits: u64,
    /// Transient buffers that required fresh memory.
    pub cache_misses: u64,
    /// Persistent slots served from the per-slot cache.
    pub persistent_reuses: u64,
    /// Number of `bind` calls rejected by the budget.
    pub oom_count: u64,
    /// Peak live workspace bytes.
    pub peak_bytes: usize,
    /// Total bytes ever handed out (including reused buffers).
    pub cumulative_bytes: u64,
    /// Number of transient buffers released.
    pub releases: u64,
}

impl ArenaStats {
    /// Fraction of transient buffers served from the free list, in `[0.0, 1.0]`.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    pub(crate) fn record_cache_hit(&mut self, size: usize) {
        self.cache_hits += 1;
        self.cumulative_bytes += size as u64;
    }

    pub(crate) fn record_cache_miss(&mut self, size: usize) {
        self.cache_misses += 1;
        self.cumulative_bytes += size as u64;
    }

    pub(crate) fn record_persistent_reuse(&mut self) {
        self.persistent_reuses += 1;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    pub(crate) fn record_bind(&mut self) {
        self.binds += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    /// Updates the high-water mark if needed.
    pub(crate) fn update_peak(&mut self, current_bytes: usize) {
        if current_bytes > self.peak_bytes {
            self.peak_bytes = current_bytes;
        }
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_kb = self.peak_bytes as f64 / 1024.0;
        format!(
            "Binds: {} ({} hits, {} misses, {:.0}% hit rate, {} persistent reuses), \
             {} OOMs, peak {:.1} KB, {} releases",
            self.binds,
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_ratio() * 100.0,
            self.persistent_reuses,
            self.oom_count,
            peak_kb,
            self.releases,
        )
    }
}
