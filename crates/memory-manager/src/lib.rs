// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! The tagged workspace allocator that sits outside the operators. An
//! operator only *declares* what it needs ([`MemoryRequirements`]); the
//! caller asks a [`WorkspaceArena`] to allocate and bind those slots into
//! the [`TensorPack`](tensor_core::TensorPack) before `run()`.
//!
//! # Key Components
//!
//! - [`MemoryInfo`] / [`MemoryLifetime`]: one declared slot with its size,
//!   alignment and lifetime (`Temporary`, `Prepare`, `Persistent`).
//! - [`MemoryBudget`]: a hard ceiling with human-readable parsing
//!   (`"512M"`, `"1G"`, etc.).
//! - [`WorkspaceArena`]: enforces the budget, reuses transient buffers
//!   through a free list and caches persistent slots across binds.
//! - [`WorkspaceGuard`]: RAII release of the transient buffers of a bind.
//! - [`AuxTensorHandler`] / [`PersistentSlots`]: the operator side: typed
//!   views of bound slots, with a fallback allocation when nothing is bound.
//! - [`ArenaStats`]: cumulative metrics (peak usage, hit ratio, OOMs).
//!
//! # Ownership Model
//!
//! ```text
//! WorkspaceArena::bind(reqs, &mut pack)
//!       │
//!       ├──► pack[Int(n)] = Arc<Tensor>   (every non-empty slot)
//!       ▼
//!   WorkspaceGuard  ◄─── holds the Temporary/Prepare buffers
//!       │
//!       │  drop()
//!       ▼
//!   ArenaInner::return_buffer()  ──► free list
//! ```
//!
//! # Example
//! ```
//! use memory_manager::{MemoryBudget, MemoryInfo, MemoryLifetime, WorkspaceArena};
//! use tensor_core::{offset_int_vec, TensorPack};
//!
//! let arena = WorkspaceArena::new(MemoryBudget::from_mb(64));
//! let reqs = vec![
//!     MemoryInfo::new(offset_int_vec(0), MemoryLifetime::Temporary, 1 << 20),
//!     MemoryInfo::new(offset_int_vec(1), MemoryLifetime::Persistent, 4096).with_alignment(128),
//! ];
//!
//! let mut pack = TensorPack::new();
//! let guard = arena.bind(&reqs, &mut pack).unwrap();
//! assert_eq!(arena.live_bytes(), (1 << 20) + 4096);
//!
//! drop(pack);
//! drop(guard);
//! // The persistent slot stays cached for the next bind.
//! assert_eq!(arena.live_bytes(), 4096);
//! ```

mod arena;
mod aux;
mod budget;
mod error;
mod guard;
mod requirements;
mod stats;

pub use arena::WorkspaceArena;
pub use aux::{AuxTensorHandler, PersistentSlots};
pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::WorkspaceGuard;
pub use requirements::{total_bytes, MemoryInfo, MemoryLifetime, MemoryRequirements};
pub use stats::ArenaStats;
