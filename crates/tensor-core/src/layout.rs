// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Data layout tags and named-dimension lookup.

/// Memory ordering of a 4-D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum DataLayout {
    /// Layout is irrelevant or not set.
    Unknown,
    /// Channel-first: shape `[W, H, C, N]`.
    #[default]
    Nchw,
    /// Channel-last: shape `[C, W, H, N]`.
    Nhwc,
}

/// Named axis of an activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayoutDimension {
    Channel,
    Width,
    Height,
    Batches,
}

impl DataLayout {
    /// Returns the shape index of `dim` in this layout.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DataLayout, DataLayoutDimension};
    /// assert_eq!(DataLayout::Nhwc.index_of(DataLayoutDimension::Channel), 0);
    /// assert_eq!(DataLayout::Nchw.index_of(DataLayoutDimension::Channel), 2);
    /// ```
    pub fn index_of(self, dim: DataLayoutDimension) -> usize {
        match (self, dim) {
            (DataLayout::Nhwc, DataLayoutDimension::Channel) => 0,
            (DataLayout::Nhwc, DataLayoutDimension::Width) => 1,
            (DataLayout::Nhwc, DataLayoutDimension::Height) => 2,
            (_, DataLayoutDimension::Width) => 0,
            (_, DataLayoutDimension::Height) => 1,
            (_, DataLayoutDimension::Channel) => 2,
            (_, DataLayoutDimension::Batches) => 3,
        }
    }
}
