// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host CPU detection.
//!
//! Reads CPU state from:
//! - `is_aarch64_feature_detected!` on aarch64 hosts.
//! - `/proc/cpuinfo`: `Features` tokens (SVE/SME extras the std macro
//!   does not cover) and the `CPU part` of core 0.
//! - `/sys/devices/system/cpu/online`: online core count.
//! - `/proc/sys/abi/sve_default_vector_length`: SVE vector length.
//!
//! Hosts that are not Arm report no extensions and a generic model; every
//! selection table then falls back to its portable entries.

use crate::{CpuInfoError, CpuIsa, CpuModel};
use std::path::Path;
use std::sync::OnceLock;

/// Base sysfs path for CPU information.
const CPU_BASE: &str = "/sys/devices/system/cpu";
const PROC_CPUINFO: &str = "/proc/cpuinfo";
const SVE_VL_PATH: &str = "/proc/sys/abi/sve_default_vector_length";

static DETECTED: OnceLock<CpuInfo> = OnceLock::new();

/// Capabilities of the host CPU.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CpuInfo {
    isa: CpuIsa,
    model: CpuModel,
    num_cpus: usize,
    /// SVE vector length in bits (0 without SVE).
    sve_vector_length_bits: usize,
}

impl CpuInfo {
    /// Returns the process-wide detected CPU information.
    ///
    /// Detection runs once; later calls return the cached value.
    pub fn get() -> &'static CpuInfo {
        DETECTED.get_or_init(|| {
            let info = CpuInfo::detect();
            tracing::info!(
                isa = %info.isa,
                model = info.model.as_str(),
                cpus = info.num_cpus,
                "detected host CPU"
            );
            info
        })
    }

    /// Runs detection without caching.
    pub fn detect() -> CpuInfo {
        let mut isa = detect_isa();
        let mut model = CpuModel::Generic;
        match read_proc_file(Path::new(PROC_CPUINFO)) {
            Ok(content) => {
                let parsed = parse_cpuinfo(&content);
                if cfg!(any(target_arch = "aarch64", target_arch = "arm")) {
                    merge_isa(&mut isa, &parsed.isa);
                }
                model = parsed.model;
            }
            Err(e) => tracing::debug!(error = %e, "cpuinfo unavailable"),
        }
        let num_cpus = read_online_cores().unwrap_or(1);
        let sve_vector_length_bits = if isa.sve {
            read_proc_file(Path::new(SVE_VL_PATH))
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .map(|bytes| bytes * 8)
                .unwrap_or(128)
        } else {
            0
        };
        CpuInfo {
            isa,
            model,
            num_cpus,
            sve_vector_length_bits,
        }
    }

    /// Builds CPU information with explicit flags (tests, `--isa` overrides).
    pub fn with_isa(isa: CpuIsa, num_cpus: usize) -> CpuInfo {
        CpuInfo {
            isa,
            model: CpuModel::Generic,
            num_cpus: num_cpus.max(1),
            sve_vector_length_bits: if isa.sve { 256 } else { 0 },
        }
    }

    pub fn with_model(mut self, model: CpuModel) -> CpuInfo {
        self.model = model;
        self
    }

    pub fn isa(&self) -> &CpuIsa {
        &self.isa
    }

    pub fn model(&self) -> CpuModel {
        self.model
    }

    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    pub fn sve_vector_length_bits(&self) -> usize {
        self.sve_vector_length_bits
    }

    pub fn has_fp16(&self) -> bool {
        self.isa.fp16
    }

    pub fn has_bf16(&self) -> bool {
        self.isa.bf16
    }

    pub fn has_dotprod(&self) -> bool {
        self.isa.dot
    }

    pub fn has_i8mm(&self) -> bool {
        self.isa.i8mm
    }

    pub fn has_sve(&self) -> bool {
        self.isa.sve
    }

    pub fn has_sve2(&self) -> bool {
        self.isa.sve2
    }

    pub fn has_sme2(&self) -> bool {
        self.isa.sme2
    }
}

/// Fields extracted from `/proc/cpuinfo`.
#[derive(Debug, Default)]
pub(crate) struct ParsedCpuinfo {
    pub isa: CpuIsa,
    pub model: CpuModel,
}

/// Parses the `Features` line and the first `CPU part` line.
pub(crate) fn parse_cpuinfo(content: &str) -> ParsedCpuinfo {
    let mut parsed = ParsedCpuinfo::default();
    let mut saw_part = false;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Features" => {
                for token in value.split_whitespace() {
                    parsed.isa.apply_feature(token);
                }
            }
            "CPU part" if !saw_part => {
                let v = value.trim().trim_start_matches("0x");
                if let Ok(part) = u32::from_str_radix(v, 16) {
                    parsed.model = CpuModel::from_part(part);
                    saw_part = true;
                }
            }
            _ => {}
        }
    }
    parsed
}

fn merge_isa(dst: &mut CpuIsa, src: &CpuIsa) {
    dst.neon |= src.neon;
    dst.fp16 |= src.fp16;
    dst.dot |= src.dot;
    dst.bf16 |= src.bf16;
    dst.i8mm |= src.i8mm;
    dst.sve |= src.sve;
    dst.sve2 |= src.sve2;
    dst.svebf16 |= src.svebf16;
    dst.svei8mm |= src.svei8mm;
    dst.svef32mm |= src.svef32mm;
    dst.sme |= src.sme;
    dst.sme2 |= src.sme2;
}

#[cfg(target_arch = "aarch64")]
fn detect_isa() -> CpuIsa {
    use std::arch::is_aarch64_feature_detected;
    CpuIsa {
        neon: is_aarch64_feature_detected!("neon"),
        fp16: is_aarch64_feature_detected!("fp16"),
        dot: is_aarch64_feature_detected!("dotprod"),
        bf16: is_aarch64_feature_detected!("bf16"),
        i8mm: is_aarch64_feature_detected!("i8mm"),
        sve: is_aarch64_feature_detected!("sve"),
        sve2: is_aarch64_feature_detected!("sve2"),
        ..CpuIsa::default()
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn detect_isa() -> CpuIsa {
    CpuIsa::default()
}

fn read_proc_file(path: &Path) -> Result<String, CpuInfoError> {
    if !path.exists() {
        return Err(CpuInfoError::NotAvailable {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| CpuInfoError::ReadError {
            path: path.display().to_string(),
            source: e,
        })
}

/// Determines the number of online CPU cores.
///
/// Tries `/sys/devices/system/cpu/online` first (e.g., `"0-3"` → 4 cores),
/// then falls back to `std::thread::available_parallelism()`.
fn read_online_cores() -> Result<usize, CpuInfoError> {
    let online_path_str = format!("{CPU_BASE}/online");
    if let Ok(content) = read_proc_file(Path::new(&online_path_str)) {
        if let Some(count) = parse_cpu_range(&content) {
            return Ok(count);
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .map_err(|e| CpuInfoError::ReadError {
            path: CPU_BASE.to_string(),
            source: e,
        })
}

/// Parses a CPU range string like `"0-3"` → 4, `"0"` → 1, `"0,2-3"` → 3.
fn parse_cpu_range(s: &str) -> Option<usize> {
    let mut total = 0usize;
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: usize = start_s.trim().parse().ok()?;
            let end: usize = end_s.trim().parse().ok()?;
            if end < start {
                return None;
            }
            total += end - start + 1;
        } else {
            let _: usize = part.parse().ok()?;
            total += 1;
        }
    }
    (total > 0).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEOVERSE_N1: &str = "\
processor\t: 0
BogoMIPS\t: 50.00
Features\t: fp asimd evtstrm aes pmull sha1 sha2 crc32 atomics fphp asimdhp cpuid asimdrdm lrcpc dcpop asimddp ssbs
CPU implementer\t: 0x41
CPU architecture: 8
CPU variant\t: 0x3
CPU part\t: 0xd0c
CPU revision\t: 1

processor\t: 1
CPU part\t: 0xd05
";

    #[test]
    fn test_parse_cpuinfo() {
        let parsed = parse_cpuinfo(NEOVERSE_N1);
        assert_eq!(parsed.model, CpuModel::N1);
        assert!(parsed.isa.neon);
        assert!(parsed.isa.fp16);
        assert!(parsed.isa.dot);
        assert!(!parsed.isa.sve);
    }

    #[test]
    fn test_parse_cpu_range_simple() {
        assert_eq!(parse_cpu_range("0-3"), Some(4));
        assert_eq!(parse_cpu_range("0-7"), Some(8));
        assert_eq!(parse_cpu_range("0"), Some(1));
    }

    #[test]
    fn test_parse_cpu_range_complex() {
        assert_eq!(parse_cpu_range("0,2-3"), Some(3));
        assert_eq!(parse_cpu_range("0-1,3-5"), Some(5));
    }

    #[test]
    fn test_parse_cpu_range_invalid() {
        assert_eq!(parse_cpu_range(""), None);
        assert_eq!(parse_cpu_range("abc"), None);
        assert_eq!(parse_cpu_range("3-1"), None);
    }

    #[test]
    fn test_detect_is_cached() {
        let a = CpuInfo::get() as *const CpuInfo;
        let b = CpuInfo::get() as *const CpuInfo;
        assert_eq!(a, b);
        assert!(CpuInfo::get().num_cpus() >= 1);
    }

    #[test]
    fn test_with_isa() {
        let info = CpuInfo::with_isa(CpuIsa::armv9(), 0);
        assert_eq!(info.num_cpus(), 1);
        assert!(info.has_sve2());
        assert_eq!(info.sve_vector_length_bits(), 256);
    }

    #[test]
    fn test_json_report() {
        let info = CpuInfo::with_isa(CpuIsa::armv9(), 4);
        let json: serde_json::Value = serde_json::to_value(&info).unwrap();
        assert_eq!(json["num_cpus"], 4);
        assert_eq!(json["sve_vector_length_bits"], 256);
        assert_eq!(json["isa"]["sve2"], true);
    }
}
