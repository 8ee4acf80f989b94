// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # gemm-backend
//!
//! Matrix-multiply implementations behind one type-erased handle,
//! [`GemmCommon`], and the catalogue that picks among them.
//!
//! # Key Components
//! - [`GemmArgs`] describes a problem: sizes, batches, multis, kernel
//!   sections, threads, activation and configuration constraints.
//! - [`gemm`] walks the implementation table of the requested types and
//!   output stage and returns a configured handle.
//! - [`GemmHybrid`] reads `A` in place (plain, indirect or convolution
//!   input). [`GemmInterleaved`] packs `A` into working space.
//!   [`GemvBatched`] recasts batched single-row problems.
//! - Output stages: [`Nothing`] (raw accumulators), [`Requantize32`]
//!   (fixed-point requantization to 8 bits) and [`DequantizeFloat`].
//!
//! # Pretransposed `B`
//! Most implementations read `B` from a packed buffer. The caller sizes it
//! with [`GemmCommon::get_b_pretransposed_array_size`], fills it with
//! [`GemmCommon::pretranspose_b_array`] (or in parallel pieces with
//! `pretranspose_b_array_part`) and can later re-attach it with
//! [`GemmCommon::set_pretransposed_b_data`].
//!
//! # Example
//! ```
//! use cpu_info::{CpuInfo, CpuIsa};
//! use gemm_backend::{gemm, GemmArgs, GemmArrays, GemmCommon, Nothing};
//!
//! let (m, n, k) = (2, 3, 4);
//! let a: Vec<f32> = (0..m * k).map(|v| v as f32).collect();
//! let b = vec![1.0f32; k * n];
//! let mut c = vec![0.0f32; m * n];
//!
//! let args = GemmArgs::new(CpuInfo::with_isa(CpuIsa::default(), 1), m, n, k);
//! let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).unwrap();
//! g.set_arrays(GemmArrays {
//!     a: a.as_ptr(),
//!     lda: k,
//!     b: b.as_ptr(),
//!     ldb: n,
//!     c: c.as_mut_ptr(),
//!     ldc: n,
//!     ..GemmArrays::default()
//! });
//! let mut packed = vec![0f32; g.get_b_pretransposed_array_size().div_ceil(4)];
//! g.pretranspose_b_array(packed.as_mut_ptr().cast(), b.as_ptr(), n, 0, false);
//! g.execute_all();
//! assert_eq!(c, vec![6.0, 6.0, 6.0, 22.0, 22.0, 22.0]);
//! ```

mod args;
mod catalogue;
mod common;
mod convolver;
mod element;
mod gemv_batched;
mod hybrid;
mod interleaved;
mod ndrange;
mod output_stage;
mod transform;

pub use args::{Activation, ConvolutionParameters, GemmArgs, GemmConfig, GemmMethod, KernelDescription, WeightFormat};
pub use catalogue::{
    find_implementation, gemm, get_compatible_kernels, get_gemm_method, has_opt_impl, GemmHandle, GemmImplementation,
    HasGemmImplementations,
};
pub use common::{GemmArrays, GemmCommon, IndirectTable, Strategy};
pub use convolver::Convolver;
pub use element::{Accum, Element, OutputElement};
pub use gemv_batched::GemvBatched;
pub use hybrid::GemmHybrid;
pub use interleaved::GemmInterleaved;
pub use ndrange::{iceildiv, roundup, NdCoord, NdRange, ND_MAX_DIMS};
pub use output_stage::{
    rounding_shift_right, sqrdmulh, Correction, DequantizeFloat, Epilogue, Nothing, OutputStage, OutputStageKind,
    Requantize32,
};
pub use transform::PackedBLayout;
