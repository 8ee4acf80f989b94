// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batched GEMV recast as a single GEMM.
//!
//! A problem with `M == 1` and several batches is the same as one GEMM
//! whose rows are the batches: `A`'s batch stride becomes its row stride
//! and likewise for `C`.

use crate::args::{ConvolutionParameters, GemmArgs, GemmConfig, GemmMethod};
use crate::catalogue::{gemm, HasGemmImplementations};
use crate::common::{GemmArrays, GemmCommon, IndirectTable};
use crate::ndrange::{NdCoord, NdRange};
use crate::output_stage::Requantize32;

pub struct GemvBatched<Ti, Tw, To> {
    inner: Box<dyn GemmCommon<Ti, Tw, To>>,
    arrays: GemmArrays<Ti, Tw, To>,
}

// SAFETY: the inner handle is Send + Sync; the array copy holds only
// caller-owned pointers that are never dereferenced here.
unsafe impl<Ti, Tw, To> Send for GemvBatched<Ti, Tw, To> {}
unsafe impl<Ti, Tw, To> Sync for GemvBatched<Ti, Tw, To> {}

impl<Ti, Tw, To> GemvBatched<Ti, Tw, To>
where
    Ti: 'static,
    Tw: 'static,
    To: 'static,
{
    /// Builds the recast problem; `None` when no implementation accepts it.
    pub fn new<S>(args: &GemmArgs, os: &S) -> Option<Self>
    where
        S: HasGemmImplementations<Ti, Tw, To>,
    {
        let mut recast = args.clone();
        recast.m = args.nbatches;
        recast.nbatches = 1;
        recast.cfg = None;
        let inner = gemm::<Ti, Tw, To, S>(&recast, os)?;
        Some(Self {
            inner,
            arrays: GemmArrays::default(),
        })
    }
}

impl<Ti, Tw, To> GemmCommon<Ti, Tw, To> for GemvBatched<Ti, Tw, To> {
    fn set_arrays(&mut self, arrays: GemmArrays<Ti, Tw, To>) {
        self.arrays = arrays;
        self.inner.set_arrays(GemmArrays {
            lda: arrays.a_batch_stride,
            a_batch_stride: 0,
            ldc: arrays.c_batch_stride,
            c_batch_stride: 0,
            ..arrays
        });
    }

    fn arrays(&self) -> GemmArrays<Ti, Tw, To> {
        self.arrays
    }

    fn get_window_size(&self) -> NdRange {
        self.inner.get_window_size()
    }

    fn supports_dynamic_scheduling(&self) -> bool {
        self.inner.supports_dynamic_scheduling()
    }

    fn set_nthreads(&mut self, nthreads: usize) {
        self.inner.set_nthreads(nthreads);
    }

    fn get_working_size(&self) -> usize {
        self.inner.get_working_size()
    }

    fn set_working_space(&mut self, ws: *mut u8) {
        self.inner.set_working_space(ws);
    }

    fn b_is_pretransposed(&self) -> bool {
        self.inner.b_is_pretransposed()
    }

    fn b_pretranspose_required(&self) -> bool {
        self.inner.b_pretranspose_required()
    }

    fn b_pretranspose_supports_transpose(&self) -> bool {
        self.inner.b_pretranspose_supports_transpose()
    }

    fn get_b_pretransposed_array_size(&self) -> usize {
        self.inner.get_b_pretransposed_array_size()
    }

    fn get_b_pretranspose_window_size(&self) -> usize {
        self.inner.get_b_pretranspose_window_size()
    }

    fn requantize_bias(&self, buf: *mut u8, b: *const Tw, ldb: usize, multi_stride: usize, transposed: bool) {
        self.inner.requantize_bias(buf, b, ldb, multi_stride, transposed);
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
        self.inner
            .pretranspose_b_array_part(buf, b, ldb, multi_stride, transposed, start, end);
    }

    fn set_pretransposed_b_data(&mut self, buf: *mut u8) {
        self.inner.set_pretransposed_b_data(buf);
    }

    fn set_quantized_bias(&mut self, bias: &[i32], bias_multi_stride: usize) {
        self.inner.set_quantized_bias(bias, bias_multi_stride);
    }

    fn set_indirect_parameters(&mut self, string_len: usize, table: IndirectTable<Ti>) {
        self.inner.set_indirect_parameters(string_len, table);
    }

    fn set_convolution_parameters(&mut self, params: ConvolutionParameters) {
        self.inner.set_convolution_parameters(params);
    }

    fn update_quantization_parameters(&mut self, requant: &Requantize32) {
        self.inner.update_quantization_parameters(requant);
    }

    fn set_dequantize_scale(&mut self, scale: f32) {
        self.inner.set_dequantize_scale(scale);
    }

    fn get_config(&self) -> GemmConfig {
        let inner = self.inner.get_config();
        GemmConfig {
            method: GemmMethod::GemvBatched,
            filter: format!("gemv_batched[{}]", inner.filter),
            ..inner
        }
    }

    fn execute(&self, work: &NdCoord, thread_locator: &NdCoord, thread_id: usize) {
        self.inner.execute(work, thread_locator, thread_id);
    }
}
