// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The handle every GEMM implementation exposes to its caller.

use crate::args::{ConvolutionParameters, GemmConfig};
use crate::ndrange::{NdCoord, NdRange};
use crate::output_stage::Requantize32;
use std::ptr;

/// Row-pointer table for indirect input.
///
/// Indexed as `table[multi * nbatches * ksections + batch * ksections + section][m]`;
/// each entry points at `k` contiguous elements.
pub type IndirectTable<Ti> = *const *const *const Ti;

/// Operand and result pointers with their strides, in elements.
///
/// `a` may be null when the handle reads `A` through an indirect table.
/// `b` may be null when `B` was pretransposed. `bias` is optional.
#[derive(Debug)]
pub struct GemmArrays<Ti, Tw, To> {
    pub a: *const Ti,
    pub lda: usize,
    pub a_batch_stride: usize,
    pub a_multi_stride: usize,
    pub b: *const Tw,
    pub ldb: usize,
    pub b_multi_stride: usize,
    pub c: *mut To,
    pub ldc: usize,
    pub c_batch_stride: usize,
    pub c_multi_stride: usize,
    pub bias: *const To,
    pub bias_multi_stride: usize,
}

impl<Ti, Tw, To> Clone for GemmArrays<Ti, Tw, To> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Ti, Tw, To> Copy for GemmArrays<Ti, Tw, To> {}

impl<Ti, Tw, To> Default for GemmArrays<Ti, Tw, To> {
    fn default() -> Self {
        Self {
            a: ptr::null(),
            lda: 0,
            a_batch_stride: 0,
            a_multi_stride: 0,
            b: ptr::null(),
            ldb: 0,
            b_multi_stride: 0,
            c: ptr::null_mut(),
            ldc: 0,
            c_batch_stride: 0,
            c_multi_stride: 0,
            bias: ptr::null(),
            bias_multi_stride: 0,
        }
    }
}

/// A configured GEMM.
///
/// The lifecycle is: [`set_arrays`](Self::set_arrays), optionally a working
/// space and a pretransposed `B`, then [`execute`](Self::execute) once per
/// piece of [`get_window_size`](Self::get_window_size), possibly from
/// several threads at once.
///
/// # Safety contract
/// Pointers handed to a handle must stay valid, and sized for the problem
/// the handle was built for, until the last `execute` returns.
pub trait GemmCommon<Ti, Tw, To>: Send + Sync {
    fn set_arrays(&mut self, arrays: GemmArrays<Ti, Tw, To>);

    fn arrays(&self) -> GemmArrays<Ti, Tw, To>;

    fn get_window_size(&self) -> NdRange;

    /// Whether pieces of the window may be claimed in any order.
    fn supports_dynamic_scheduling(&self) -> bool {
        false
    }

    fn set_nthreads(&mut self, _nthreads: usize) {}

    /// Bytes of scratch memory `execute` needs across all threads.
    fn get_working_size(&self) -> usize {
        0
    }

    fn set_working_space(&mut self, _ws: *mut u8) {}

    /// Whether `execute` reads `B` from a pretransposed buffer.
    fn b_is_pretransposed(&self) -> bool {
        false
    }

    /// Whether that buffer still has to be produced.
    fn b_pretranspose_required(&self) -> bool {
        false
    }

    /// Whether pretransposition can also transpose `B` on the fly.
    fn b_pretranspose_supports_transpose(&self) -> bool {
        false
    }

    fn get_b_pretransposed_array_size(&self) -> usize {
        0
    }

    /// Number of independent pieces pretransposition splits into.
    fn get_b_pretranspose_window_size(&self) -> usize {
        1
    }

    /// Recomputes column corrections of `B` into the head of `buf`.
    fn requantize_bias(&self, _buf: *mut u8, _b: *const Tw, _ldb: usize, _multi_stride: usize, _transposed: bool) {}

    /// Pretransposes the whole of `B` into `buf`.
    fn pretranspose_b_array(&self, buf: *mut u8, b: *const Tw, ldb: usize, multi_stride: usize, transposed: bool) {
        let end = self.get_b_pretranspose_window_size();
        self.pretranspose_b_array_part(buf, b, ldb, multi_stride, transposed, 0, end);
    }

    /// Pretransposes pieces `[start, end)`. Disjoint ranges may run concurrently.
    #[allow(clippy::too_many_arguments)]
    fn pretranspose_b_array_part(
        &self,
        _buf: *mut u8,
        _b: *const Tw,
        _ldb: usize,
        _multi_stride: usize,
        _transposed: bool,
        _start: usize,
        _end: usize,
    ) {
    }

    /// Points the handle at a buffer filled by an earlier pretranspose.
    fn set_pretransposed_b_data(&mut self, _buf: *mut u8) {}

    /// Integer bias folded into the requantization.
    fn set_quantized_bias(&mut self, _bias: &[i32], _bias_multi_stride: usize) {}

    fn set_indirect_parameters(&mut self, _string_len: usize, _table: IndirectTable<Ti>) {}

    fn set_convolution_parameters(&mut self, _params: ConvolutionParameters) {}

    fn update_quantization_parameters(&mut self, _requant: &Requantize32) {}

    fn set_dequantize_scale(&mut self, _scale: f32) {}

    fn get_config(&self) -> GemmConfig;

    /// Runs the piece `work` of the window on thread `thread_id`.
    fn execute(&self, work: &NdCoord, thread_locator: &NdCoord, thread_id: usize);

    /// Runs the whole window on the calling thread.
    fn execute_all(&self) {
        let full = NdCoord::covering(&self.get_window_size());
        self.execute(&full, &NdCoord::default(), 0);
    }
}

/// Block shape of a micro-kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    /// Rows of `C` produced per kernel call.
    pub out_height: usize,
    /// Columns of `C` produced per kernel call (the `B` panel width).
    pub out_width: usize,
    /// Granule the reduction is padded to.
    pub k_unroll: usize,
}

impl Strategy {
    pub const fn new(name: &'static str, out_height: usize, out_width: usize, k_unroll: usize) -> Self {
        Self {
            name,
            out_height,
            out_width,
            k_unroll,
        }
    }
}
