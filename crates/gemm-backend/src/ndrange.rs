// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! N-dimensional work ranges exchanged between a GEMM handle and its caller.
//!
//! A handle reports its work as an [`NdRange`]. The caller turns it into a
//! window, splits the window across threads and hands each piece back to
//! [`execute`](crate::GemmCommon::execute) as an [`NdCoord`].

/// Maximum number of dimensions of a work range.
pub const ND_MAX_DIMS: usize = 6;

/// `ceil(a / b)`.
pub fn iceildiv(a: usize, b: usize) -> usize {
    a.div_ceil(b.max(1))
}

/// Rounds `a` up to a multiple of `b`.
pub fn roundup(a: usize, b: usize) -> usize {
    iceildiv(a, b) * b.max(1)
}

/// Extents of the work space of a GEMM handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    sizes: [usize; ND_MAX_DIMS],
}

impl NdRange {
    /// # Panics
    /// Panics on more than [`ND_MAX_DIMS`] extents.
    pub fn new(sizes: &[usize]) -> Self {
        assert!(sizes.len() <= ND_MAX_DIMS, "at most {ND_MAX_DIMS} work dimensions");
        let mut s = [1usize; ND_MAX_DIMS];
        s[..sizes.len()].copy_from_slice(sizes);
        Self { sizes: s }
    }

    pub fn get_size(&self, dim: usize) -> usize {
        self.sizes[dim]
    }

    pub fn total_size(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Coordinates of the `linear`-th work item, dimension 0 fastest.
    pub fn position(&self, linear: usize) -> [usize; ND_MAX_DIMS] {
        let mut pos = [0usize; ND_MAX_DIMS];
        let mut rem = linear;
        for (p, &s) in pos.iter_mut().zip(&self.sizes) {
            let s = s.max(1);
            *p = rem % s;
            rem /= s;
        }
        pos
    }

    /// Iterates the work items `[start, end)` of the flattened range.
    pub fn iter_range(&self, start: usize, end: usize) -> impl Iterator<Item = [usize; ND_MAX_DIMS]> + '_ {
        (start..end.min(self.total_size())).map(move |i| self.position(i))
    }
}

/// A sub-range of an [`NdRange`]: start position and extent per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NdCoord {
    position: [usize; ND_MAX_DIMS],
    size: [usize; ND_MAX_DIMS],
}

impl NdCoord {
    /// Builds a coordinate from `(start, len)` pairs.
    pub fn new(dims: &[(usize, usize)]) -> Self {
        assert!(dims.len() <= ND_MAX_DIMS, "at most {ND_MAX_DIMS} work dimensions");
        let mut c = Self {
            position: [0; ND_MAX_DIMS],
            size: [1; ND_MAX_DIMS],
        };
        for (i, &(start, len)) in dims.iter().enumerate() {
            c.position[i] = start;
            c.size[i] = len;
        }
        c
    }

    /// The coordinate covering the whole of `range`.
    pub fn covering(range: &NdRange) -> Self {
        Self {
            position: [0; ND_MAX_DIMS],
            size: range.sizes,
        }
    }

    pub fn get_position(&self, dim: usize) -> usize {
        self.position[dim]
    }

    pub fn get_size(&self, dim: usize) -> usize {
        self.size[dim]
    }

    pub fn get_position_end(&self, dim: usize) -> usize {
        self.position[dim] + self.size[dim]
    }
}
