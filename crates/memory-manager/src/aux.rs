// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Typed access to the auxiliary slots an operator declared.

use std::collections::HashMap;
use std::sync::Arc;
use tensor_core::{Tensor, TensorInfo, TensorPack, TensorType};

/// A typed view of an auxiliary pack slot.
///
/// When the slot holds a buffer of at least `info.total_size()` bytes the
/// handler reinterprets it with `info`. Otherwise it allocates its own
/// tensor, which lives as long as the handler. With `bypass_alloc` set
/// nothing is allocated for a missing slot; the stage that would read it
/// is not going to run.
pub struct AuxTensorHandler {
    tensor: Option<Tensor>,
    owned: bool,
}

impl AuxTensorHandler {
    pub fn new(slot: TensorType, info: &TensorInfo, pack: &TensorPack, bypass_alloc: bool) -> Self {
        let needed = info.total_size();
        if let Some(bound) = pack.get_const_tensor(slot) {
            if bound.capacity() >= needed {
                if let Ok(view) = bound.reinterpret(info.clone()) {
                    return Self {
                        tensor: Some(view),
                        owned: false,
                    };
                }
            }
            tracing::debug!(
                ?slot,
                bound = bound.capacity(),
                needed,
                "auxiliary slot too small, allocating"
            );
        }
        if bypass_alloc {
            return Self {
                tensor: None,
                owned: false,
            };
        }
        Self {
            tensor: Some(Tensor::new(info.clone())),
            owned: true,
        }
    }

    /// The tensor behind this handler.
    ///
    /// # Panics
    /// Panics if the handler was created with `bypass_alloc` for a missing slot.
    pub fn get(&self) -> &Tensor {
        match &self.tensor {
            Some(t) => t,
            None => panic!("auxiliary tensor was bypassed and has no memory"),
        }
    }

    /// A shareable handle for building sub-packs.
    pub fn to_arc(&self) -> Arc<Tensor> {
        Arc::new(self.get().clone())
    }

    /// `true` if the handler allocated its own memory.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_allocated(&self) -> bool {
        self.tensor.is_some()
    }
}

/// Operator-owned backing for persistent slots.
///
/// Persistent data (a pretransposed weight matrix, a permuted filter) must
/// survive between `prepare()` and every later `run()`. Callers normally
/// bind those slots through a [`WorkspaceArena`](crate::WorkspaceArena);
/// when they don't, the operator keeps the buffer here instead.
#[derive(Debug, Default)]
pub struct PersistentSlots {
    owned: HashMap<TensorType, Tensor>,
}

impl PersistentSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a tensor for `slot` described by `info`.
    ///
    /// Prefers the caller's binding when it is large enough and aligned;
    /// otherwise returns (and keeps) an operator-owned buffer.
    pub fn resolve(
        &mut self,
        slot: TensorType,
        info: &TensorInfo,
        alignment: usize,
        pack: &TensorPack,
    ) -> Tensor {
        let needed = info.total_size();
        if let Some(bound) = pack.get_const_tensor(slot) {
            if bound.capacity() >= needed && bound.buffer() as usize % alignment.max(1) == 0 {
                if let Ok(view) = bound.reinterpret(info.clone()) {
                    return view;
                }
            }
        }
        if let Some(owned) = self.owned.get(&slot) {
            if owned.capacity() >= needed {
                if let Ok(view) = owned.reinterpret(info.clone()) {
                    return view;
                }
            }
        }
        tracing::warn!(?slot, bytes = needed, "persistent slot not bound, operator keeps its own buffer");
        let t = Tensor::with_alignment(info.clone(), alignment);
        self.owned.insert(slot, t.clone());
        t
    }

    /// Bytes held by operator-owned buffers.
    pub fn owned_bytes(&self) -> usize {
        self.owned.values().map(Tensor::capacity).sum()
    }

    pub fn clear(&mut self) {
        self.owned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{offset_int_vec, DataType, TensorShape};

    fn f32_info(n: usize) -> TensorInfo {
        TensorInfo::new(TensorShape::new(&[n]), DataType::F32)
    }

    fn raw(bytes: usize) -> Arc<Tensor> {
        Arc::new(Tensor::new(TensorInfo::new(TensorShape::new(&[bytes]), DataType::U8)))
    }

    #[test]
    fn test_handler_views_bound_slot() {
        let slot = offset_int_vec(0);
        let backing = raw(64);
        let pack = TensorPack::new().with(slot, Arc::clone(&backing));
        let h = AuxTensorHandler::new(slot, &f32_info(16), &pack, false);
        assert!(!h.is_owned());
        assert!(h.get().shares_buffer_with(&backing));
        assert_eq!(h.get().info().data_type(), DataType::F32);
    }

    #[test]
    fn test_handler_allocates_when_too_small() {
        let slot = offset_int_vec(0);
        let pack = TensorPack::new().with(slot, raw(8));
        let h = AuxTensorHandler::new(slot, &f32_info(16), &pack, false);
        assert!(h.is_owned());
        assert_eq!(h.get().info().total_size(), 64);
    }

    #[test]
    fn test_handler_bypass() {
        let h = AuxTensorHandler::new(offset_int_vec(5), &f32_info(4), &TensorPack::new(), true);
        assert!(!h.is_allocated());
    }

    #[test]
    fn test_persistent_slots_keep_owned_buffer() {
        let mut slots = PersistentSlots::new();
        let slot = offset_int_vec(2);
        let a = slots.resolve(slot, &f32_info(4), 128, &TensorPack::new());
        a.copy_from_slice(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = slots.resolve(slot, &f32_info(4), 128, &TensorPack::new());
        assert!(a.shares_buffer_with(&b));
        assert_eq!(b.to_vec::<f32>(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(slots.owned_bytes(), 16);
    }

    #[test]
    fn test_persistent_slots_prefer_binding() {
        let mut slots = PersistentSlots::new();
        let slot = offset_int_vec(2);
        let backing = raw(16);
        let pack = TensorPack::new().with(slot, Arc::clone(&backing));
        let t = slots.resolve(slot, &f32_info(4), 1, &pack);
        assert!(t.shares_buffer_with(&backing));
        assert_eq!(slots.owned_bytes(), 0);
    }
}
