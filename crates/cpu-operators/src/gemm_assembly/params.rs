// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Problem sizes of an assembly GEMM, read from tensor shapes.

use super::{AsmConvMethod, AsmGemmInfo};
use tensor_core::TensorInfo;

/// Sizes handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub batches: usize,
    pub multis: usize,
    pub sections: usize,
    pub indirect: bool,
}

/// Derives `(M, N, K)`, batch and multi counts and kernel sections.
///
/// For plain GEMMs every `B` plane along z is its own multi and the
/// remaining output planes are batches. Convolution methods keep a single
/// multi and take the kernel taps of `B` (dims 2 and 3) as sections.
pub fn extract_parameters(a: &TensorInfo, b: &TensorInfo, d: &TensorInfo, info: &AsmGemmInfo) -> Params {
    let mut p = Params {
        m: d.dimension(1),
        n: d.dimension(0),
        k: a.dimension(0),
        batches: 1,
        multis: 1,
        sections: 1,
        indirect: false,
    };
    match info.method {
        AsmConvMethod::Conv | AsmConvMethod::Indirect => {
            p.indirect = true;
            p.sections = b.dimension(2) * b.dimension(3);
        }
        AsmConvMethod::Im2Col => {
            p.multis = b.dimension(2).max(1);
            p.batches = d.shape().total_size_upper(2) / p.multis;
        }
    }
    if info.depth_output_gemm3d != 0 {
        p.m = d.dimension(1) * d.dimension(2);
        p.batches = d.shape().total_size_upper(3) / p.multis;
    }
    p
}
