// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-invocation binding of semantic tensor roles to live tensors.

use crate::{ComputeError, Tensor};
use std::collections::HashMap;
use std::sync::Arc;

/// Semantic role of a tensor in a [`TensorPack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorType {
    Src0,
    Src1,
    Src2,
    Src3,
    Dst0,
    Dst1,
    /// Auxiliary slot `n`, declared through an operator's workspace.
    Int(u32),
}

impl TensorType {
    /// Alias of [`TensorType::Src0`].
    pub const SRC: TensorType = TensorType::Src0;
    /// Alias of [`TensorType::Dst0`].
    pub const DST: TensorType = TensorType::Dst0;
}

/// Auxiliary slot id for index `n` of an operator's internal tensor list.
pub fn offset_int_vec(n: u32) -> TensorType {
    TensorType::Int(n)
}

#[derive(Clone)]
struct PackEntry {
    tensor: Arc<Tensor>,
    read_only: bool,
}

/// Mapping from roles to tensors for one `run()` call.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use tensor_core::{DataType, Tensor, TensorInfo, TensorPack, TensorShape, TensorType};
/// let t = Arc::new(Tensor::new(TensorInfo::new(TensorShape::new(&[2]), DataType::F32)));
/// let pack = TensorPack::new()
///     .with_const(TensorType::SRC, Arc::clone(&t))
///     .with(TensorType::DST, t);
/// assert!(pack.get_const_tensor(TensorType::SRC).is_some());
/// assert!(pack.get_tensor(TensorType::SRC).is_none());
/// ```
#[derive(Clone, Default)]
pub struct TensorPack {
    entries: HashMap<TensorType, PackEntry>,
}

impl TensorPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a writable tensor.
    pub fn add_tensor(&mut self, ty: TensorType, tensor: Arc<Tensor>) {
        self.entries.insert(
            ty,
            PackEntry {
                tensor,
                read_only: false,
            },
        );
    }

    /// Binds a read-only tensor.
    pub fn add_const_tensor(&mut self, ty: TensorType, tensor: Arc<Tensor>) {
        self.entries.insert(
            ty,
            PackEntry {
                tensor,
                read_only: true,
            },
        );
    }

    pub fn with(mut self, ty: TensorType, tensor: Arc<Tensor>) -> Self {
        self.add_tensor(ty, tensor);
        self
    }

    pub fn with_const(mut self, ty: TensorType, tensor: Arc<Tensor>) -> Self {
        self.add_const_tensor(ty, tensor);
        self
    }

    /// Returns a writable tensor (read-only bindings are not returned).
    pub fn get_tensor(&self, ty: TensorType) -> Option<&Arc<Tensor>> {
        self.entries
            .get(&ty)
            .filter(|e| !e.read_only)
            .map(|e| &e.tensor)
    }

    /// Returns any tensor bound to `ty`.
    pub fn get_const_tensor(&self, ty: TensorType) -> Option<&Arc<Tensor>> {
        self.entries.get(&ty).map(|e| &e.tensor)
    }

    pub fn remove(&mut self, ty: TensorType) -> Option<Arc<Tensor>> {
        self.entries.remove(&ty).map(|e| e.tensor)
    }

    pub fn contains(&self, ty: TensorType) -> bool {
        self.entries.contains_key(&ty)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Like [`get_const_tensor`](Self::get_const_tensor) but reports a missing role.
    pub fn require(&self, op: &'static str, ty: TensorType) -> Result<&Arc<Tensor>, ComputeError> {
        self.get_const_tensor(ty)
            .ok_or_else(|| ComputeError::invalid(op, format!("tensor {ty:?} is not bound")))
    }

    /// Returns the tensor bound to `ty`.
    ///
    /// # Panics
    /// Panics if nothing is bound. Kernels use this in `run_op`, where a
    /// missing tensor is a violation of the operator's contract.
    pub fn tensor(&self, ty: TensorType) -> &Tensor {
        match self.entries.get(&ty) {
            Some(e) => &e.tensor,
            None => panic!("tensor pack has no tensor bound to {ty:?}"),
        }
    }
}

impl std::fmt::Debug for TensorPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort();
        f.debug_struct("TensorPack").field("roles", &keys).finish()
    }
}
