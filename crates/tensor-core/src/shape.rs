// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and dimension utilities.
//!
//! Shapes use innermost-first ordering: dimension 0 is the fastest-moving
//! axis in memory (the row length of a matrix), dimension 1 is the number
//! of rows, and so on. A GEMM operand `A` of `M` rows and `K` columns is
//! therefore written `[K, M]`.

use std::fmt;
use std::ops::Index;

/// Maximum number of dimensions a shape can describe.
pub const MAX_DIMS: usize = 6;

/// Describes the extent of each axis of a tensor.
///
/// Unset axes have extent 1. [`num_dimensions`](TensorShape::num_dimensions)
/// ignores trailing axes of extent 1, so `[4, 5, 1, 1]` is two-dimensional.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TensorShape {
    dims: [usize; MAX_DIMS],
    num_dims: usize,
}

impl TensorShape {
    /// Creates a shape from the given extents (innermost first).
    ///
    /// # Examples
    /// ```
    /// use tensor_core::TensorShape;
    /// let s = TensorShape::new(&[3, 4]);
    /// assert_eq!(s.num_dimensions(), 2);
    /// assert_eq!(s.total_size(), 12);
    /// assert_eq!(s.x(), 3);
    /// assert_eq!(s.y(), 4);
    /// ```
    ///
    /// # Panics
    /// Panics if more than [`MAX_DIMS`] extents are given.
    pub fn new(dims: &[usize]) -> Self {
        assert!(dims.len() <= MAX_DIMS, "at most {MAX_DIMS} dimensions are supported");
        let mut shape = Self::empty();
        for (i, &d) in dims.iter().enumerate() {
            shape.set(i, d);
        }
        shape
    }

    /// Creates an uninitialised shape with zero dimensions.
    pub fn empty() -> Self {
        Self {
            dims: [1; MAX_DIMS],
            num_dims: 0,
        }
    }

    /// Sets the extent of `dim`, growing the dimension count if needed.
    pub fn set(&mut self, dim: usize, value: usize) -> &mut Self {
        assert!(dim < MAX_DIMS, "dimension {dim} out of range");
        self.dims[dim] = value;
        self.num_dims = self.num_dims.max(dim + 1);
        self.trim();
        self
    }

    /// Builder form of [`set`](TensorShape::set).
    pub fn with(mut self, dim: usize, value: usize) -> Self {
        self.set(dim, value);
        self
    }

    fn trim(&mut self) {
        while self.num_dims > 1 && self.dims[self.num_dims - 1] == 1 {
            self.num_dims -= 1;
        }
    }

    /// Returns the number of significant dimensions.
    pub fn num_dimensions(&self) -> usize {
        self.num_dims
    }

    /// Returns `true` if no extent was ever set.
    pub fn is_empty(&self) -> bool {
        self.num_dims == 0
    }

    /// Extent of dimension 0.
    pub fn x(&self) -> usize {
        self.dims[0]
    }

    /// Extent of dimension 1.
    pub fn y(&self) -> usize {
        self.dims[1]
    }

    /// Extent of dimension 2.
    pub fn z(&self) -> usize {
        self.dims[2]
    }

    /// Returns all extents, including unset ones.
    pub fn dims(&self) -> &[usize; MAX_DIMS] {
        &self.dims
    }

    /// Returns the total number of elements (0 for an empty shape).
    pub fn total_size(&self) -> usize {
        if self.num_dims == 0 {
            return 0;
        }
        self.dims.iter().product()
    }

    /// Product of the extents of dimensions `[dim, MAX_DIMS)`.
    pub fn total_size_upper(&self, dim: usize) -> usize {
        self.dims[dim.min(MAX_DIMS)..].iter().product()
    }

    /// Product of the extents of dimensions `[0, dim)`.
    pub fn total_size_lower(&self, dim: usize) -> usize {
        self.dims[..dim.min(MAX_DIMS)].iter().product()
    }

    /// Removes `dim`, shifting the outer dimensions down by one.
    pub fn remove_dimension(&mut self, dim: usize) -> &mut Self {
        assert!(dim < MAX_DIMS, "dimension {dim} out of range");
        for i in dim..MAX_DIMS - 1 {
            self.dims[i] = self.dims[i + 1];
        }
        self.dims[MAX_DIMS - 1] = 1;
        self.num_dims = self.num_dims.saturating_sub(1).max(1);
        self.trim();
        self
    }

    /// Collapses dimensions `[start, start + n)` into one.
    pub fn collapse(&mut self, n: usize, start: usize) -> &mut Self {
        if n < 2 {
            return self;
        }
        let end = (start + n).min(MAX_DIMS);
        let product: usize = self.dims[start..end].iter().product();
        self.dims[start] = product;
        for _ in start + 1..end {
            self.remove_dimension(start + 1);
        }
        self.trim();
        self
    }

    /// Returns the shape with `dim` and every higher dimension collapsed.
    pub fn collapsed_from(&self, start: usize) -> TensorShape {
        let mut s = *self;
        s.collapse(MAX_DIMS - start, start);
        s
    }

    /// Reorders dimensions so that output dimension `i` takes input dimension `perm[i]`.
    pub fn permuted(&self, perm: &crate::PermutationVector) -> TensorShape {
        let mut out = TensorShape::empty();
        let n = perm.num_dimensions().max(self.num_dims);
        for i in 0..n {
            out.set(i, self.dims[perm.get(i)]);
        }
        out
    }

    /// Computes the broadcast shape of `shapes`.
    ///
    /// Returns an empty shape if any pair of extents differs and neither is 1.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::TensorShape;
    /// let a = TensorShape::new(&[5, 4]);
    /// let b = TensorShape::new(&[5]);
    /// assert_eq!(TensorShape::broadcast_shape(&[a, b]), a);
    /// ```
    pub fn broadcast_shape(shapes: &[TensorShape]) -> TensorShape {
        let mut out = TensorShape::empty();
        for d in 0..MAX_DIMS {
            let mut extent = 1usize;
            for s in shapes {
                let e = s.dims[d];
                if e == extent || e == 1 {
                    continue;
                }
                if extent == 1 {
                    extent = e;
                } else {
                    return TensorShape::empty();
                }
            }
            out.dims[d] = extent;
        }
        out.num_dims = shapes.iter().map(|s| s.num_dims).max().unwrap_or(0);
        out.trim();
        out
    }
}

impl Default for TensorShape {
    fn default() -> Self {
        Self::empty()
    }
}

impl Index<usize> for TensorShape {
    type Output = usize;

    fn index(&self, dim: usize) -> &usize {
        &self.dims[dim]
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..self.num_dims {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.dims[i])?;
        }
        write!(f, "]")
    }
}

impl fmt::Debug for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TensorShape{self}")
    }
}

/// Convenience: `TensorShape::from([3, 4])`.
impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(&dims)
    }
}
