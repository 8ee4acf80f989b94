// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Workspace lifecycle across repeated prepare/run cycles.

use memory_manager::{
    AuxTensorHandler, MemoryBudget, MemoryInfo, MemoryLifetime, WorkspaceArena,
};
use tensor_core::{offset_int_vec, DataType, TensorInfo, TensorPack, TensorShape};

fn requirements() -> Vec<MemoryInfo> {
    vec![
        MemoryInfo::new(offset_int_vec(0), MemoryLifetime::Temporary, 6000).with_alignment(4096),
        MemoryInfo::new(offset_int_vec(1), MemoryLifetime::Prepare, 256),
        MemoryInfo::new(offset_int_vec(2), MemoryLifetime::Persistent, 400).with_alignment(128),
        MemoryInfo::new(offset_int_vec(3), MemoryLifetime::Temporary, 0),
    ]
}

#[test]
fn repeated_runs_reach_steady_state() {
    let arena = WorkspaceArena::new(MemoryBudget::from_mb(1));
    let reqs = requirements();
    let weights = TensorInfo::new(TensorShape::new(&[100]), DataType::F32);

    for run in 0..5 {
        let mut pack = TensorPack::new();
        let mut guard = arena.bind(&reqs, &mut pack).unwrap();
        assert!(!pack.contains(offset_int_vec(3)));

        let persistent = AuxTensorHandler::new(offset_int_vec(2), &weights, &pack, false);
        assert!(!persistent.is_owned());
        if run == 0 {
            persistent.get().fill(1.5f32);
        } else {
            assert!(persistent.get().to_vec::<f32>().iter().all(|&v| v == 1.5));
        }

        guard.release_prepare(&mut pack);
        assert!(!pack.contains(offset_int_vec(1)));
        drop(persistent);
        drop(pack);
        drop(guard);
    }

    let stats = arena.stats();
    assert_eq!(stats.binds, 5);
    assert_eq!(stats.persistent_reuses, 4);
    // Two transient slots: missed on the first run, reused after.
    assert_eq!(stats.cache_misses, 3);
    assert_eq!(stats.cache_hits, 8);
    assert_eq!(arena.live_bytes(), arena.persistent_bytes());
}

#[test]
fn budget_counts_persistent_slots() {
    let arena = WorkspaceArena::new(MemoryBudget::from_bytes(4096 * 3));
    let reqs = requirements();
    let mut pack = TensorPack::new();
    // 8192 (temporary) + 4096 (prepare) + 4096 (persistent) > 12288
    assert!(arena.bind(&reqs, &mut pack).is_err());
    assert_eq!(arena.live_bytes(), 0);
}
