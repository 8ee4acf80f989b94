// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Iteration domains of kernels and their partitioning across threads.
//!
//! A [`Window`] holds one `(start, end, step)` triple per dimension. Kernels
//! compute their full window at configure time; the scheduler cuts it into
//! disjoint sub-windows with [`Window::split_window`] and hands one to each
//! worker.

use crate::{TensorInfo, TensorShape, MAX_DIMS};

/// Coordinates into a window or tensor, innermost first.
pub type Coordinates = [usize; MAX_DIMS];

/// One axis of a [`Window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    start: usize,
    end: usize,
    step: usize,
}

impl Dimension {
    /// # Panics
    /// Panics if `step` is zero.
    pub fn new(start: usize, end: usize, step: usize) -> Self {
        assert!(step > 0, "window step must be positive");
        Self { start, end, step }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Number of steps needed to cover `[start, end)`; a partial last step counts.
    pub fn num_iterations(&self) -> usize {
        if self.end <= self.start {
            0
        } else {
            (self.end - self.start).div_ceil(self.step)
        }
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Self::new(0, 1, 1)
    }
}

/// Per-dimension step sizes used when computing a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steps([usize; MAX_DIMS]);

impl Steps {
    pub fn new(steps: &[usize]) -> Self {
        let mut s = [1usize; MAX_DIMS];
        s[..steps.len()].copy_from_slice(steps);
        Self(s)
    }
}

impl Default for Steps {
    fn default() -> Self {
        Self([1; MAX_DIMS])
    }
}

/// An N-dimensional iteration domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    dims: [Dimension; MAX_DIMS],
}

impl Window {
    pub const DIM_X: usize = 0;
    pub const DIM_Y: usize = 1;
    pub const DIM_Z: usize = 2;
    pub const DIM_W: usize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, dim: usize, d: Dimension) {
        self.dims[dim] = d;
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, dim: usize, d: Dimension) -> Self {
        self.dims[dim] = d;
        self
    }

    pub fn get(&self, dim: usize) -> Dimension {
        self.dims[dim]
    }

    pub fn x(&self) -> Dimension {
        self.dims[Self::DIM_X]
    }

    pub fn y(&self) -> Dimension {
        self.dims[Self::DIM_Y]
    }

    pub fn z(&self) -> Dimension {
        self.dims[Self::DIM_Z]
    }

    pub fn num_iterations(&self, dim: usize) -> usize {
        self.dims[dim].num_iterations()
    }

    /// Product of the iteration counts of every dimension.
    pub fn num_iterations_total(&self) -> usize {
        self.dims.iter().map(Dimension::num_iterations).product()
    }

    /// Extent `end - start` of each dimension.
    pub fn shape(&self) -> TensorShape {
        let mut s = TensorShape::empty();
        for (i, d) in self.dims.iter().enumerate() {
            s.set(i, d.end.saturating_sub(d.start));
        }
        s
    }

    /// Returns sub-window `id` of `total` along `dim`.
    ///
    /// The first `n % total` sub-windows receive one extra iteration, so the
    /// sub-windows for `id in 0..total` tile the window exactly.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Dimension, Window};
    /// let w = Window::new().with(Window::DIM_Y, Dimension::new(0, 10, 1));
    /// let parts: Vec<_> = (0..3).map(|i| w.split_window(Window::DIM_Y, i, 3).y()).collect();
    /// assert_eq!(parts[0], Dimension::new(0, 4, 1));
    /// assert_eq!(parts[1], Dimension::new(4, 7, 1));
    /// assert_eq!(parts[2], Dimension::new(7, 10, 1));
    /// ```
    pub fn split_window(&self, dim: usize, id: usize, total: usize) -> Window {
        assert!(total > 0 && id < total, "invalid split {id} of {total}");
        let d = self.dims[dim];
        let num_it = d.num_iterations();
        let rem = num_it % total;
        let mut work = num_it / total;
        let mut it_start = work * id;
        if id < rem {
            work += 1;
            it_start += id;
        } else {
            it_start += rem;
        }
        let start = d.start + it_start * d.step;
        let end = d.end.min(start + work * d.step);
        let mut out = *self;
        out.dims[dim] = Dimension::new(start, end.max(start), d.step);
        out
    }

    /// Calls `f` with the coordinates of every iteration, dimension 0 fastest.
    pub fn for_each(&self, mut f: impl FnMut(&Coordinates)) {
        if self.dims.iter().any(|d| d.num_iterations() == 0) {
            return;
        }
        let mut id: Coordinates = [0; MAX_DIMS];
        for (c, d) in id.iter_mut().zip(&self.dims) {
            *c = d.start;
        }
        loop {
            f(&id);
            let mut dim = 0;
            loop {
                id[dim] += self.dims[dim].step;
                if id[dim] < self.dims[dim].end {
                    break;
                }
                id[dim] = self.dims[dim].start;
                dim += 1;
                if dim == MAX_DIMS {
                    return;
                }
            }
        }
    }
}

/// Window covering `shape` with the given steps.
pub fn calculate_max_window(shape: &TensorShape, steps: Steps) -> Window {
    let mut win = Window::new();
    for d in 0..MAX_DIMS {
        win.set(d, Dimension::new(0, shape[d], steps.0[d]));
    }
    win
}

/// Collapses a dense tensor into a 1-D window over all of its elements.
///
/// Returns the window and the dimension it should be split along.
pub fn calculate_squashed_or_max_window(src: &TensorInfo) -> (Window, usize) {
    let total = src.shape().total_size();
    let win = Window::new().with(Window::DIM_X, Dimension::new(0, total, 1));
    (win, Window::DIM_X)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_num_iterations_partial_step() {
        assert_eq!(Dimension::new(0, 10, 4).num_iterations(), 3);
        assert_eq!(Dimension::new(5, 5, 1).num_iterations(), 0);
    }

    #[test]
    fn test_max_window() {
        let w = calculate_max_window(&TensorShape::new(&[5, 4]), Steps::new(&[4]));
        assert_eq!(w.x(), Dimension::new(0, 5, 4));
        assert_eq!(w.num_iterations(0), 2);
        assert_eq!(w.num_iterations(1), 4);
        assert_eq!(w.num_iterations(2), 1);
    }

    #[test]
    fn test_for_each_visits_all() {
        let w = Window::new()
            .with(0, Dimension::new(0, 3, 1))
            .with(1, Dimension::new(1, 5, 2));
        let mut seen = Vec::new();
        w.for_each(|c| seen.push((c[0], c[1])));
        assert_eq!(seen, vec![(0, 1), (1, 1), (2, 1), (0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_split_more_parts_than_iterations() {
        let w = Window::new().with(0, Dimension::new(0, 2, 1));
        assert_eq!(w.split_window(0, 2, 4).num_iterations(0), 0);
        assert_eq!(w.split_window(0, 1, 4).x(), Dimension::new(1, 2, 1));
    }

    #[test]
    fn test_squashed_window() {
        let info = TensorInfo::new(TensorShape::new(&[3, 4, 5]), crate::DataType::F32);
        let (w, split) = calculate_squashed_or_max_window(&info);
        assert_eq!(split, Window::DIM_X);
        assert_eq!(w.num_iterations_total(), 60);
    }

    proptest! {
        #[test]
        fn prop_split_tiles_exactly(
            start in 0usize..8,
            len in 0usize..200,
            step in 1usize..5,
            total in 1usize..17,
        ) {
            let w = Window::new().with(0, Dimension::new(start, start + len, step));
            let mut covered = Vec::new();
            let mut prev_end = start;
            for id in 0..total {
                let part = w.split_window(0, id, total).x();
                if part.num_iterations() > 0 {
                    prop_assert_eq!(part.start(), prev_end.max(start));
                    prev_end = part.end();
                }
                let mut c = part.start();
                while c < part.end() {
                    covered.push(c);
                    c += step;
                }
            }
            let expected: Vec<usize> = (start..start + len).step_by(step).collect();
            prop_assert_eq!(covered, expected);
        }
    }
}
