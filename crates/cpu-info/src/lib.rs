// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # cpu-info
//!
//! Detects the instruction-set extensions and micro-architecture of the
//! host CPU so kernels can pick the right micro-kernel at configure time.
//!
//! # Key Components
//! - [`CpuIsa`]: extension flags (NEON, FP16, dot product, BF16, I8MM,
//!   SVE/SVE2, SME/SME2).
//! - [`CpuModel`]: core identification used for workload-size tuning.
//! - [`CpuInfo`]: the detected capabilities, cached process-wide by
//!   [`CpuInfo::get`].
//!
//! # Graceful Degradation
//! Off Arm, or when `/proc/cpuinfo` is missing, detection reports no
//! extensions rather than failing. Selection tables then use their
//! portable entries.
//!
//! # Example
//! ```
//! use cpu_info::CpuInfo;
//!
//! let cpu = CpuInfo::get();
//! println!("{} cores, ISA: {}", cpu.num_cpus(), cpu.isa());
//! ```

mod cpu;
mod error;
mod isa;
mod model;

pub use cpu::CpuInfo;
pub use error::CpuInfoError;
pub use isa::CpuIsa;
pub use model::CpuModel;
