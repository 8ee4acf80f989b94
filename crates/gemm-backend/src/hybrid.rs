// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hybrid GEMM: `A` is read in place, `B` from column panels.
//!
//! Supports direct, indirect and convolution input for `A`, and either a
//! pretransposed `B` or a fixed-format (`OhwioN`) `B` read as is.

use crate::args::{ConvolutionParameters, GemmArgs, GemmConfig, GemmMethod, WeightFormat};
use crate::common::{GemmArrays, GemmCommon, IndirectTable, Strategy};
use crate::convolver::Convolver;
use crate::element::{Accum, Element, OutputElement};
use crate::ndrange::{iceildiv, roundup, NdCoord, NdRange};
use crate::output_stage::{Correction, Epilogue, OutputStage, OutputStageKind, Requantize32};
use crate::transform::{compute_col_bias, pack_b_panels, PackedBLayout, RawB};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

pub struct GemmHybrid<Ti, Tw, To, S> {
    args: GemmArgs,
    os: S,
    strategy: Strategy,
    /// Set for fixed-format implementations.
    weight_format: WeightFormat,
    n_block: usize,
    /// (row blocks, batches, column blocks, multis)
    window: NdRange,
    layout: PackedBLayout,
    arrays: GemmArrays<Ti, Tw, To>,
    b_transposed: AtomicPtr<Tw>,
    col_bias: AtomicPtr<i32>,
    indirect: IndirectTable<Ti>,
    convolver: Option<Convolver<Ti>>,
}

// SAFETY: the raw pointers are caller-owned buffers the handle only reads,
// except `C` and the pretranspose buffer, which are written in disjoint
// pieces per work item.
unsafe impl<Ti, Tw, To, S: Send> Send for GemmHybrid<Ti, Tw, To, S> {}
unsafe impl<Ti, Tw, To, S: Sync> Sync for GemmHybrid<Ti, Tw, To, S> {}

impl<Ti, Tw, To, S> GemmHybrid<Ti, Tw, To, S>
where
    Ti: Element,
    Tw: Element<Acc = Ti::Acc>,
    To: OutputElement,
    S: Epilogue<Ti::Acc, To>,
{
    pub fn new(args: &GemmArgs, os: S, strategy: Strategy) -> Self {
        Self::build(args, os, strategy, WeightFormat::Unspecified)
    }

    /// A variant reading `B` in `weight_format` directly.
    pub fn fixed_format(args: &GemmArgs, os: S, strategy: Strategy, weight_format: WeightFormat) -> Self {
        Self::build(args, os, strategy, weight_format)
    }

    fn build(args: &GemmArgs, os: S, strategy: Strategy, weight_format: WeightFormat) -> Self {
        let n_block = Self::compute_n_block(args, &os, &strategy);
        let window = NdRange::new(&[
            iceildiv(args.m, strategy.out_height),
            args.nbatches,
            iceildiv(args.n, n_block),
            args.nmulti,
        ]);
        let layout = PackedBLayout {
            n: args.n,
            k: args.k,
            ksections: args.ksections,
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
            weight_format,
            n_block,
            window,
            layout,
            arrays: GemmArrays::default(),
            b_transposed: AtomicPtr::new(ptr::null_mut()),
            col_bias: AtomicPtr::new(ptr::null_mut()),
            indirect: ptr::null(),
            convolver: None,
        }
    }

    /// Columns of `C` covered by one work item.
    pub fn compute_n_block(args: &GemmArgs, os: &S, strategy: &Strategy) -> usize {
        if let Some(cfg) = &args.cfg {
            if cfg.outer_block_size > 0 {
                return cfg.outer_block_size;
            }
        }
        if args.n <= 64 {
            return args.n;
        }
        if args.m / args.n > 155 {
            return args.n;
        }
        // Row sums are recomputed per column block, so only split the
        // columns as far as needed to occupy every thread.
        if S::KIND == OutputStageKind::Requantize32 && os.b_offset() != 0 {
            let row_parallelism = args.nmulti * args.nbatches * iceildiv(args.m, strategy.out_height);
            if row_parallelism < args.maxthreads {
                let columns = iceildiv(args.maxthreads, row_parallelism);
                return roundup(iceildiv(args.n, columns), strategy.out_width);
            }
            return args.n;
        }
        if args.k <= 128 && args.maxthreads <= 16 {
            return strategy.out_width * 3;
        }
        strategy.out_width
    }

    fn is_fixed_format(&self) -> bool {
        self.weight_format.is_fixed_format()
    }

    /// Start of `k` elements of `A` for row `m`, section `section`.
    unsafe fn a_row(&self, multi: usize, batch: usize, m: usize, section: usize) -> *const Ti {
        let ks = self.args.ksections;
        if !self.indirect.is_null() {
            let strings = *self.indirect.add(multi * self.args.nbatches * ks + batch * ks + section);
            return *strings.add(m);
        }
        let arr = &self.arrays;
        let base = arr.a.add(multi * arr.a_multi_stride + batch * arr.a_batch_stride);
        match &self.convolver {
            Some(conv) => conv.row(base, arr.lda, m, section),
            None => base.add(m * arr.lda + section * self.args.k),
        }
    }

    /// Element `(section, k, n)` of `B` for `multi`.
    #[inline]
    unsafe fn b_at(&self, packed: *const Tw, multi: usize, section: usize, k: usize, n: usize) -> Tw {
        if self.is_fixed_format() {
            let sw = self.weight_format.interleave_by();
            let kk = section * self.layout.k_padded() + k;
            let arr = &self.arrays;
            *arr.b.add(multi * arr.b_multi_stride + (n / sw) * arr.ldb + kk * sw + n % sw)
        } else {
            *packed.add(self.layout.index(multi, section, k, n))
        }
    }
}

impl<Ti, Tw, To, S> GemmCommon<Ti, Tw, To> for GemmHybrid<Ti, Tw, To, S>
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
        NdRange::new(&[self.window.total_size()])
    }

    fn supports_dynamic_scheduling(&self) -> bool {
        true
    }

    fn b_is_pretransposed(&self) -> bool {
        !self.is_fixed_format()
    }

    fn b_pretranspose_required(&self) -> bool {
        !self.is_fixed_format() && self.b_transposed.load(Ordering::Acquire).is_null()
    }

    fn b_pretranspose_supports_transpose(&self) -> bool {
        !self.is_fixed_format()
    }

    fn get_b_pretransposed_array_size(&self) -> usize {
        if self.is_fixed_format() {
            0
        } else {
            self.layout.size_bytes::<Tw>()
        }
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

    fn set_indirect_parameters(&mut self, string_len: usize, table: IndirectTable<Ti>) {
        debug_assert_eq!(string_len, self.args.k);
        self.indirect = table;
    }

    fn set_convolution_parameters(&mut self, params: ConvolutionParameters) {
        debug_assert_eq!(params.input_channels, self.args.k);
        self.convolver = Some(Convolver::new(params));
    }

    fn update_quantization_parameters(&mut self, requant: &Requantize32) {
        self.os.update(requant);
    }

    fn set_dequantize_scale(&mut self, scale: f32) {
        self.os.set_scale(scale);
    }

    fn get_config(&self) -> GemmConfig {
        GemmConfig {
            method: GemmMethod::GemmHybrid,
            filter: self.strategy.name.to_string(),
            inner_block_size: self.layout.k_total(),
            outer_block_size: self.n_block,
            weight_format: self.weight_format,
        }
    }

    fn execute(&self, work: &NdCoord, _thread_locator: &NdCoord, _thread_id: usize) {
        let packed = self.b_transposed.load(Ordering::Acquire).cast_const();
        assert!(
            self.is_fixed_format() || !packed.is_null(),
            "{}: B has not been pretransposed; call pretranspose_b_array or set_pretransposed_b_data before execute",
            self.strategy.name
        );
        let col_bias = self.col_bias.load(Ordering::Acquire).cast_const();
        let need_row_sums = self.os.needs_row_sums();
        let b_offset = self.os.b_offset();
        let (k, ks) = (self.args.k, self.args.ksections);
        let oh = self.strategy.out_height;
        let arr = &self.arrays;
        let mut acc = vec![<Ti::Acc as Default>::default(); self.n_block];

        for pos in self.window.iter_range(work.get_position(0), work.get_position_end(0)) {
            let (m_block, batch, n_block, multi) = (pos[0], pos[1], pos[2], pos[3]);
            let m0 = m_block * oh;
            let m1 = (m0 + oh).min(self.args.m);
            let n0 = n_block * self.n_block;
            let n1 = (n0 + self.n_block).min(self.args.n);
            let cols = n1 - n0;

            for m in m0..m1 {
                acc[..cols].fill(Default::default());
                let mut row_sum = 0i32;
                // SAFETY: every pointer was sized for this problem by the caller.
                unsafe {
                    for section in 0..ks {
                        let a_row = self.a_row(multi, batch, m, section);
                        for kk in 0..k {
                            let av = (*a_row.add(kk)).widen();
                            if need_row_sums {
                                row_sum = row_sum.wrapping_add(av.to_i32());
                            }
                            for (j, slot) in acc[..cols].iter_mut().enumerate() {
                                *slot = slot.mul_add(av, self.b_at(packed, multi, section, kk, n0 + j).widen());
                            }
                        }
                    }

                    let out_row = arr
                        .c
                        .add(multi * arr.c_multi_stride + batch * arr.c_batch_stride + m * arr.ldc);
                    for (j, &value) in acc[..cols].iter().enumerate() {
                        let n = n0 + j;
                        let corr = Correction {
                            row_term: b_offset.wrapping_mul(row_sum),
                            col_term: if col_bias.is_null() {
                                0
                            } else {
                                *col_bias.add(multi * self.args.n + n)
                            },
                            channel: n,
                        };
                        let bias = (!arr.bias.is_null()).then(|| *arr.bias.add(multi * arr.bias_multi_stride + n));
                        *out_row.add(n) = self.os.apply(value, corr, bias, &self.args.act);
                    }
                }
            }
        }
    }
}
