// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand packing.
//!
//! Pretransposed `B` is a sequence of column panels of `out_width`
//! columns. Each panel holds every reduction row in row-major order:
//! section by section, each section padded to a multiple of `k_unroll`
//! rows. Padding rows and columns are zero. When the output stage needs
//! column corrections, `N * nmulti` `i32` values precede the panels.

use crate::element::{Accum, Element};
use crate::ndrange::{iceildiv, roundup};
use crate::output_stage::OutputStage;

/// Geometry of a pretransposed `B` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedBLayout {
    pub n: usize,
    pub k: usize,
    pub ksections: usize,
    pub nmulti: usize,
    pub out_width: usize,
    pub k_unroll: usize,
    /// Whether column corrections precede the panels.
    pub col_sums: bool,
}

impl PackedBLayout {
    pub fn k_padded(&self) -> usize {
        roundup(self.k, self.k_unroll)
    }

    /// Packed reduction length across every section.
    pub fn k_total(&self) -> usize {
        self.ksections * self.k_padded()
    }

    pub fn n_blocks(&self) -> usize {
        iceildiv(self.n, self.out_width)
    }

    pub fn n_padded(&self) -> usize {
        roundup(self.n, self.out_width)
    }

    /// One piece per multi and column panel.
    pub fn window_size(&self) -> usize {
        self.nmulti * self.n_blocks()
    }

    pub fn col_sum_bytes(&self) -> usize {
        if self.col_sums {
            self.n * self.nmulti * std::mem::size_of::<i32>()
        } else {
            0
        }
    }

    pub fn size_bytes<Tw>(&self) -> usize {
        self.col_sum_bytes() + self.n_padded() * self.k_total() * self.nmulti * std::mem::size_of::<Tw>()
    }

    pub fn panel_offset(&self, multi: usize, block: usize) -> usize {
        multi * self.n_padded() * self.k_total() + block * self.out_width * self.k_total()
    }

    /// Element offset of `(section, k, n)` of `multi`.
    #[inline]
    pub fn index(&self, multi: usize, section: usize, k: usize, n: usize) -> usize {
        self.panel_offset(multi, n / self.out_width)
            + (section * self.k_padded() + k) * self.out_width
            + n % self.out_width
    }
}

/// Raw `B` as handed in by the caller: `K * ksections` rows of `N` columns
/// (or the transpose of that when `transposed`).
#[derive(Debug, Clone, Copy)]
pub struct RawB<Tw> {
    pub ptr: *const Tw,
    pub ldb: usize,
    pub multi_stride: usize,
    pub transposed: bool,
}

impl<Tw: Copy> RawB<Tw> {
    /// # Safety
    /// `(row, col)` of `multi` must lie inside the caller's allocation.
    #[inline]
    pub unsafe fn get(&self, multi: usize, row: usize, col: usize) -> Tw {
        let base = self.ptr.add(multi * self.multi_stride);
        if self.transposed {
            *base.add(col * self.ldb + row)
        } else {
            *base.add(row * self.ldb + col)
        }
    }
}

/// Packs column panels `[start, end)` of the window into `dst`.
///
/// # Safety
/// `dst` must point at the panel area of a buffer sized by `layout`, and
/// `b` must cover `layout.k * layout.ksections` by `layout.n` elements per multi.
pub unsafe fn pack_b_panels<Tw: Element>(layout: &PackedBLayout, dst: *mut Tw, b: &RawB<Tw>, start: usize, end: usize) {
    let n_blocks = layout.n_blocks();
    let ow = layout.out_width;
    let kp = layout.k_padded();
    for piece in start..end.min(layout.window_size()) {
        let multi = piece / n_blocks;
        let block = piece % n_blocks;
        let panel = dst.add(layout.panel_offset(multi, block));
        let col0 = block * ow;
        let cols = (layout.n - col0).min(ow);
        for section in 0..layout.ksections {
            for k in 0..kp {
                let out_row = panel.add((section * kp + k) * ow);
                for j in 0..ow {
                    let v = if k < layout.k && j < cols {
                        b.get(multi, section * layout.k + k, col0 + j)
                    } else {
                        Tw::default()
                    };
                    *out_row.add(j) = v;
                }
            }
        }
    }
}

/// Writes the column corrections of `B` into `dst` (`N * nmulti` values).
///
/// # Safety
/// `dst` must hold `layout.n * layout.nmulti` `i32`s; `b` as for [`pack_b_panels`].
pub unsafe fn compute_col_bias<Tw: Element, S: OutputStage>(
    layout: &PackedBLayout,
    dst: *mut i32,
    b: &RawB<Tw>,
    os: &S,
) {
    let depth = layout.k * layout.ksections;
    for multi in 0..layout.nmulti {
        for col in 0..layout.n {
            let mut sum = 0i32;
            for row in 0..depth {
                sum = sum.wrapping_add(b.get(multi, row, col).widen().to_i32());
            }
            *dst.add(multi * layout.n + col) = os.column_bias(sum, depth, multi, col);
        }
    }
}

/// Interleaves `rows` rows of `A` into an `out_height`-row panel.
///
/// The panel is column-major: element `(r, k)` lands at `k * out_height + r`.
/// Rows past `rows` and columns past `k` are zero.
///
/// # Safety
/// `a` must cover `rows` rows of stride `lda` holding `k` elements each;
/// `dst` must hold `out_height * k_padded` elements.
pub unsafe fn pack_a_panel<Ti: Element>(
    dst: *mut Ti,
    a: *const Ti,
    lda: usize,
    rows: usize,
    k: usize,
    k_padded: usize,
    out_height: usize,
) {
    for kk in 0..k_padded {
        let col = dst.add(kk * out_height);
        for r in 0..out_height {
            *col.add(r) = if r < rows && kk < k {
                *a.add(r * lda + kk)
            } else {
                Ti::default()
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_stage::Requantize32;

    fn layout(n: usize, k: usize, ksections: usize) -> PackedBLayout {
        PackedBLayout {
            n,
            k,
            ksections,
            nmulti: 1,
            out_width: 4,
            k_unroll: 2,
            col_sums: false,
        }
    }

    #[test]
    fn test_layout_sizes() {
        let l = layout(6, 3, 2);
        assert_eq!(l.k_padded(), 4);
        assert_eq!(l.k_total(), 8);
        assert_eq!(l.n_padded(), 8);
        assert_eq!(l.window_size(), 2);
        assert_eq!(l.size_bytes::<f32>(), 8 * 8 * 4);
    }

    #[test]
    fn test_pack_b_pads_and_places() {
        let l = layout(6, 3, 1);
        let b: Vec<f32> = (0..18).map(|v| v as f32).collect();
        let raw = RawB {
            ptr: b.as_ptr(),
            ldb: 6,
            multi_stride: 0,
            transposed: false,
        };
        let mut dst = vec![-1.0f32; l.n_padded() * l.k_total()];
        unsafe { pack_b_panels(&l, dst.as_mut_ptr(), &raw, 0, l.window_size()) };
        for k in 0..3 {
            for n in 0..6 {
                assert_eq!(dst[l.index(0, 0, k, n)], b[k * 6 + n]);
            }
        }
        // padded row and columns
        assert_eq!(dst[l.index(0, 0, 3, 0)], 0.0);
        assert_eq!(dst[l.index(0, 0, 0, 7)], 0.0);
    }

    #[test]
    fn test_pack_b_transposed_matches() {
        let l = layout(3, 2, 1);
        let b = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let bt = [1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0]; // 3x2
        let mut p = vec![0.0f32; l.n_padded() * l.k_total()];
        let mut pt = p.clone();
        unsafe {
            let raw = RawB { ptr: b.as_ptr(), ldb: 3, multi_stride: 0, transposed: false };
            pack_b_panels(&l, p.as_mut_ptr(), &raw, 0, 1);
            let raw = RawB { ptr: bt.as_ptr(), ldb: 2, multi_stride: 0, transposed: true };
            pack_b_panels(&l, pt.as_mut_ptr(), &raw, 0, 1);
        }
        assert_eq!(p, pt);
    }

    #[test]
    fn test_col_bias() {
        let l = PackedBLayout {
            col_sums: true,
            ..layout(2, 2, 1)
        };
        let b = [1u8, 2, 3, 4];
        let raw = RawB { ptr: b.as_ptr(), ldb: 2, multi_stride: 0, transposed: false };
        let rq = Requantize32::per_layer(-1, 0, 0, 0, 1 << 30, 0, 255);
        let mut out = [0i32; 2];
        unsafe { compute_col_bias(&l, out.as_mut_ptr(), &raw, &rq) };
        assert_eq!(out, [-4, -6]);
    }

    #[test]
    fn test_pack_a_panel() {
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let mut dst = vec![9.0f32; 4 * 4];
        unsafe { pack_a_panel(dst.as_mut_ptr(), a.as_ptr(), 3, 2, 3, 4, 4) };
        assert_eq!(&dst[0..4], &[1.0, 4.0, 0.0, 0.0]);
        assert_eq!(&dst[8..12], &[3.0, 6.0, 0.0, 0.0]);
        assert_eq!(&dst[12..16], &[0.0; 4]);
    }
}
