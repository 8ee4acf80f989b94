// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII guard that releases transient workspace buffers on drop.

use crate::arena::ArenaInner;
use crate::MemoryLifetime;
use std::sync::Arc;
use tensor_core::{Tensor, TensorPack, TensorType};

struct BoundBuffer {
    slot: TensorType,
    lifetime: MemoryLifetime,
    tensor: Arc<Tensor>,
    /// Accounted bytes (the size class).
    bytes: usize,
}

/// Holds the `Temporary` and `Prepare` buffers of one
/// [`WorkspaceArena::bind`](crate::WorkspaceArena::bind) call.
///
/// Dropping the guard gives every buffer back to the arena. Buffers whose
/// pack has already been dropped go to the free list; buffers still bound
/// somewhere are freed when their last handle goes away.
///
/// # Example
/// ```ignore
/// let guard = arena.bind(&op.workspace(), &mut pack)?;
/// op.run(&pack)?;
/// drop(pack);
/// drop(guard);               // temporaries returned to the arena
/// ```
pub struct WorkspaceGuard {
    buffers: Vec<BoundBuffer>,
    arena: Arc<ArenaInner>,
}

impl WorkspaceGuard {
    pub(crate) fn new(
        buffers: Vec<(TensorType, MemoryLifetime, Arc<Tensor>, usize)>,
        arena: Arc<ArenaInner>,
    ) -> Self {
        let buffers = buffers
            .into_iter()
            .map(|(slot, lifetime, tensor, bytes)| BoundBuffer {
                slot,
                lifetime,
                tensor,
                bytes,
            })
            .collect();
        Self { buffers, arena }
    }

    /// Unbinds and releases the `Prepare` buffers once `prepare()` is done.
    pub fn release_prepare(&mut self, pack: &mut TensorPack) {
        let (prepare, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffers)
            .into_iter()
            .partition(|b| b.lifetime == MemoryLifetime::Prepare);
        self.buffers = keep;
        for b in prepare {
            pack.remove(b.slot);
            self.arena.return_buffer(b.tensor, b.bytes);
        }
    }

    /// Bytes held by this guard.
    pub fn held_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.bytes).sum()
    }

    /// Slots held by this guard.
    pub fn slots(&self) -> impl Iterator<Item = TensorType> + '_ {
        self.buffers.iter().map(|b| b.slot)
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        for b in self.buffers.drain(..) {
            self.arena.return_buffer(b.tensor, b.bytes);
        }
    }
}

impl std::fmt::Debug for WorkspaceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceGuard")
            .field("slots", &self.slots().collect::<Vec<_>>())
            .field("held_bytes", &self.held_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{MemoryBudget, MemoryInfo, MemoryLifetime, WorkspaceArena};
    use tensor_core::{offset_int_vec, TensorPack};

    #[test]
    fn test_release_prepare() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let reqs = [
            MemoryInfo::new(offset_int_vec(0), MemoryLifetime::Prepare, 100),
            MemoryInfo::new(offset_int_vec(1), MemoryLifetime::Temporary, 100),
        ];
        let mut pack = TensorPack::new();
        let mut guard = arena.bind(&reqs, &mut pack).unwrap();
        assert_eq!(guard.held_bytes(), 8192);

        guard.release_prepare(&mut pack);
        assert!(!pack.contains(offset_int_vec(0)));
        assert!(pack.contains(offset_int_vec(1)));
        assert_eq!(guard.held_bytes(), 4096);
        assert_eq!(arena.live_bytes(), 4096);

        drop(guard);
        assert_eq!(arena.live_bytes(), 0);
        assert_eq!(arena.stats().releases, 2);
    }

    #[test]
    fn test_debug_lists_slots() {
        let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
        let reqs = [MemoryInfo::new(offset_int_vec(4), MemoryLifetime::Temporary, 1)];
        let guard = arena.bind(&reqs, &mut TensorPack::new()).unwrap();
        assert!(format!("{guard:?}").contains("Int(4)"));
    }
}
