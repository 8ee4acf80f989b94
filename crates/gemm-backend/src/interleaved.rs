// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Interleaved GEMM: blocks of `A` are packed into per-thread working
//! space, then multiplied with pretransposed column panels of `B`.
//!
//! The 1-D form splits work over row blocks only. The 2-D form also splits
//! over column panels and is scheduled over both dimensions.

use crate::args::{GemmArgs, GemmConfig, GemmMethod, WeightFormat};
use crate::common::{GemmArrays, GemmCommon, Strategy};
use crate::element::{Accum, Element, OutputElement};
use crate::ndrange::{iceildiv, roundup, NdCoord, NdRange};
use crate::output_stage::{Correction, Epilogue, OutputStage, OutputStageKind, Requantize32};
use crate::transform::{compute_col_bias, pack_a_panel, pack_b_panels, PackedBLayout, RawB};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

const WORKSPACE_ALIGN: usize = 64;

pub struct GemmInterleaved<Ti, Tw, To, S> {
    args: GemmArgs,
    os: S,
    strategy: Strategy,
    two_d: bool,
    /// (row blocks, batches, multis)
    rows: NdRange,
    layout: PackedBLayout,
    arrays: GemmArrays<Ti, Tw, To>,
    working_space: *mut u8,
    b_transposed: AtomicPtr<Tw>,
    col_bias: AtomicPtr<i32>,
}

// SAFETY: see GemmHybrid. Each thread writes only its own slice of the
// working space, selected by thread id.
unsafe impl<Ti, Tw, To, S: Send> Send for GemmInterleaved<Ti, Tw, To, S> {}
unsafe impl<Ti, Tw, To, S: Sync> Sync for GemmInterleaved<Ti, Tw, To, S> {}

impl<Ti, Tw, To, S> GemmInterleaved<Ti, Tw, To, S>
where
    Ti: Element,
    Tw: Element<Acc = Ti::Acc>,
    To: OutputElement,
    S: Epilogue<Ti::Acc, To>,
{
    pub fn new(args: &GemmArgs, os: S, strategy: Strategy) -> Self {
        Self::build(args, os, strategy, false)
    }

    pub fn new_2d(args: &GemmArgs, os: S, strategy: Strategy) -> Self {
        Self::build(args, os, strategy, true)
    }

    fn build(args: &GemmArgs, os: S, strategy: Strategy, two_d: bool) -> Self {
        let rows = NdRange::new(&[iceildiv(args.m, strategy.out_height), args.nbatches, args.nmulti]);
        let layout = PackedBLayout {
            n: args.n,
            k: args.k,
            ksections: 1,
            nmulti: args.nmulti,
            out_width: strategy.out_width,
            k_unroll: strategy.k_unroll,
            col_sums: S::KIND != OutputStageKind::Nothing,
        };
        let mut args = args.clone();
        args.cfg = None;
        Self {
            args,
            os,
            strategy,
            two_d,
            rows,
            layout,
            arrays: GemmArrays::default(),
            working_space: ptr::null_mut(),
            b_transposed: AtomicPtr::new(ptr::null_mut()),
            col_bias: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn per_thread_bytes(&self) -> usize {
        roundup(
            self.strategy.out_height * self.layout.k_total() * std::mem::size_of::<Ti>(),
            WORKSPACE_ALIGN,
        )
    }

    /// Computes one row block against column panels `[p0, p1)`.
    ///
    /// # Safety
    /// Arrays, working space and the pretransposed `B` must be set.
    unsafe fn run_block(&self, row_item: usize, p0: usize, p1: usize, panel_a: *mut Ti, packed_b: *const Tw) {
        let pos = self.rows.position(row_item);
        let (m_block, batch, multi) = (pos[0], pos[1], pos[2]);
        let oh = self.strategy.out_height;
        let ow = self.strategy.out_width;
        let k = self.args.k;
        let kt = self.layout.k_total();
        let arr = &self.arrays;
        let m0 = m_block * oh;
        let rows = (self.args.m - m0).min(oh);
        let a = arr.a.add(multi * arr.a_multi_stride + batch * arr.a_batch_stride + m0 * arr.lda);

        pack_a_panel(panel_a, a, arr.lda, rows, k, kt, oh);

        let mut row_sums = vec![0i32; oh];
        if self.os.needs_row_sums() {
            for (r, sum) in row_sums.iter_mut().enumerate().take(rows) {
                for kk in 0..k {
                    *sum = sum.wrapping_add((*a.add(r * arr.lda + kk)).widen().to_i32());
                }
            }
        }
        let col_bias = self.col_bias.load(Ordering::Acquire).cast_const();
        let b_offset = self.os.b_offset();
        let mut tile = vec![<Ti::Acc as Default>::default(); oh * ow];

        for panel in p0..p1 {
            tile.fill(Default::default());
            let b_panel = packed_b.add(self.layout.panel_offset(multi, panel));
            for kk in 0..kt {
                let a_col = panel_a.add(kk * oh);
                let b_row = b_panel.add(kk * ow);
                for r in 0..rows {
                    let av = (*a_col.add(r)).widen();
                    let out = &mut tile[r * ow..(r + 1) * ow];
                    for (j, slot) in out.iter_mut().enumerate() {
                        *slot = slot.mul_add(av, (*b_row.add(j)).widen());
                    }
                }
            }

            let n0 = panel * ow;
            let cols = (self.args.n - n0).min(ow);
            for r in 0..rows {
                let out_row = arr
                    .c
                    .add(multi * arr.c_multi_stride + batch * arr.c_batch_stride + (m0 + r) * arr.ldc);
                for j in 0..cols {
                    let n = n0 + j;
                    let corr = Correction {
                        row_term: b_offset.wrapping_mul(row_sums[r]),
                        col_term: if col_bias.is_null() {
                            0
                        } else {
                            *col_bias.add(multi * self.args.n + n)
                        },
                        channel: n,
                    };
                    let bias = (!arr.bias.is_null()).then(|| *arr.bias.add(multi * arr.bias_multi_stride + n));
                    *out_row.add(n) = self.os.apply(tile[r * ow + j], corr, bias, &self.args.act);
                }
            }
        }
    }
}

impl<Ti, Tw, To, S> GemmCommon<Ti, Tw, To> for GemmInterleaved<Ti, Tw, To, S>
where
    Ti: Element,
    Tw: Element<Acc = Ti::Acc>,
    To: OutputElement,
    S: Epilogue<Ti::Acc, To>,
{
    fn set_arrays(&mut self, arrays: GemmArrays<Ti, Tw, To>) {
        self.arrays = arrays;
    }

    fn arrays(&self) -> GemmArrays<Ti, Tw, To> {
        self.arrays
    }

    fn get_window_size(&self) -> NdRange {
        if self.two_d {
            NdRange::new(&[self.rows.total_size(), self.layout.n_blocks()])
        } else {
            NdRange::new(&[self.rows.total_size()])
        }
    }

    fn get_working_size(&self) -> usize {
        self.per_thread_bytes() * self.args.maxthreads
    }

    fn set_working_space(&mut self, ws: *mut u8) {
        self.working_space = ws;
    }

    fn b_is_pretransposed(&self) -> bool {
        true
    }

    fn b_pretranspose_required(&self) -> bool {
        self.b_transposed.load(Ordering::Acquire).is_null()
    }

    fn get_b_pretransposed_array_size(&self) -> usize {
        self.layout.size_bytes::<Tw>()
    }

    fn get_b_pretranspose_window_size(&self) -> usize {
        self.layout.window_size()
    }

    fn requantize_bias(&self, buf: *mut u8, b: *const Tw, ldb: usize, multi_stride: usize, transposed: bool) {
        if !self.layout.col_sums {
            return;
        }
        let raw = RawB {
            ptr: b,
            ldb,
            multi_stride,
            transposed,
        };
        let dst = buf.cast::<i32>();
        // SAFETY: `buf` is sized by get_b_pretransposed_array_size and `b` covers B.
        unsafe { compute_col_bias(&self.layout, dst, &raw, &self.os) };
        self.col_bias.store(dst, Ordering::Release);
    }

    fn pretranspose_b_array_part(
        &self,
        buf: *mut u8,
        b: *const Tw,
        ldb: usize,
        multi_stride: usize,
        transposed: bool,
        start: usize,
        end: usize,
    ) {
        debug_assert!(!transposed, "interleaved kernels do not fuse the transpose of B");
        if end >= self.layout.window_size() {
            self.requantize_bias(buf, b, ldb, multi_stride, transposed);
        }
        let raw = RawB {
            ptr: b,
            ldb,
            multi_stride,
            transposed,
        };
        // SAFETY: the panel area follows the column sums inside `buf`.
        unsafe {
            let panels = buf.add(self.layout.col_sum_bytes()).cast::<Tw>();
            pack_b_panels(&self.layout, panels, &raw, start, end);
            self.b_transposed.store(panels, Ordering::Release);
        }
    }

    fn set_pretransposed_b_data(&mut self, buf: *mut u8) {
        if self.layout.col_sums {
            self.col_bias.store(buf.cast::<i32>(), Ordering::Release);
        }
        // SAFETY: same layout as pretranspose_b_array_part.
        let panels = unsafe { buf.add(self.layout.col_sum_bytes()) }.cast::<Tw>();
        self.b_transposed.store(panels, Ordering::Release);
    }

    fn set_quantized_bias(&mut self, bias: &[i32], bias_multi_stride: usize) {
        self.os.set_bias(bias, bias_multi_stride);
    }

    fn update_quantization_parameters(&mut self, requant: &Requantize32) {
        self.os.update(requant);
    }

    fn set_dequantize_scale(&mut self, scale: f32) {
        self.os.set_scale(scale);
    }

    fn get_config(&self) -> GemmConfig {
        GemmConfig {
            method: if self.two_d {
                GemmMethod::GemmInterleaved2d
            } else {
                GemmMethod::GemmInterleaved
            },
            filter: self.strategy.name.to_string(),
            inner_block_size: self.layout.k_total(),
            outer_block_size: self.strategy.out_width,
            weight_format: WeightFormat::Unspecified,
        }
    }

    fn execute(&self, work: &NdCoord, _thread_locator: &NdCoord, thread_id: usize) {
        let packed = self.b_transposed.load(Ordering::Acquire).cast_const();
        assert!(
            !packed.is_null(),
            "{}: B has not been pretransposed; call pretranspose_b_array or set_pretransposed_b_data before execute",
            self.strategy.name
        );
        assert!(
            !self.working_space.is_null(),
            "{}: working space has not been set; call set_working_space before execute",
            self.strategy.name
        );
        assert!(
            thread_id < self.args.maxthreads,
            "thread {thread_id} exceeds the {} threads the working space was sized for",
            self.args.maxthreads
        );
        // SAFETY: one working-space slice per thread id.
        let panel_a = unsafe { self.working_space.add(thread_id * self.per_thread_bytes()) }.cast::<Ti>();

        let (p0, p1) = if self.two_d {
            (work.get_position(1), work.get_position_end(1).min(self.layout.n_blocks()))
        } else {
            (0, self.layout.n_blocks())
        };
        let row_end = work.get_position_end(0).min(self.rows.total_size());
        for row_item in work.get_position(0)..row_end {
            // SAFETY: arrays, working space and B were checked above.
            unsafe { self.run_block(row_item, p0, p1, panel_a, packed) };
        }
    }
}
