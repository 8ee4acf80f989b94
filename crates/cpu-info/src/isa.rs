// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Instruction-set extension flags consulted by micro-kernel selectors.

use std::fmt;

/// Extensions available on the host CPU.
///
/// NEON is the baseline of every table: portable entries do not check
/// `neon`, so a host without any flag still selects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct CpuIsa {
    pub neon: bool,
    /// Half-precision vector arithmetic.
    pub fp16: bool,
    /// 8-bit dot product (`SDOT`/`UDOT`).
    pub dot: bool,
    pub bf16: bool,
    /// 8-bit integer matrix multiply (`SMMLA`).
    pub i8mm: bool,
    pub sve: bool,
    pub sve2: bool,
    pub svebf16: bool,
    pub svei8mm: bool,
    pub svef32mm: bool,
    pub sme: bool,
    pub sme2: bool,
}

impl CpuIsa {
    /// Flags typical of an Armv8.2-A core with dot product (Cortex-A76, Neoverse-N1).
    pub fn armv82_dot() -> Self {
        Self {
            neon: true,
            fp16: true,
            dot: true,
            ..Self::default()
        }
    }

    /// Flags typical of an Armv9-A core with SVE2 (Neoverse-V2).
    pub fn armv9() -> Self {
        Self {
            neon: true,
            fp16: true,
            dot: true,
            bf16: true,
            i8mm: true,
            sve: true,
            sve2: true,
            svebf16: true,
            svei8mm: true,
            ..Self::default()
        }
    }

    /// Applies one `/proc/cpuinfo` feature token.
    pub(crate) fn apply_feature(&mut self, token: &str) {
        match token {
            "asimd" | "neon" => self.neon = true,
            "asimdhp" | "fphp" => self.fp16 = true,
            "asimddp" => self.dot = true,
            "bf16" => self.bf16 = true,
            "i8mm" => self.i8mm = true,
            "sve" => self.sve = true,
            "sve2" => self.sve2 = true,
            "svebf16" => self.svebf16 = true,
            "svei8mm" => self.svei8mm = true,
            "svef32mm" => self.svef32mm = true,
            "sme" => self.sme = true,
            "sme2" => self.sme2 = true,
            _ => {}
        }
    }

    /// Names of the enabled extensions, in a fixed order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        let flags = [
            (self.neon, "neon"),
            (self.fp16, "fp16"),
            (self.dot, "dot"),
            (self.bf16, "bf16"),
            (self.i8mm, "i8mm"),
            (self.sve, "sve"),
            (self.sve2, "sve2"),
            (self.svebf16, "svebf16"),
            (self.svei8mm, "svei8mm"),
            (self.svef32mm, "svef32mm"),
            (self.sme, "sme"),
            (self.sme2, "sme2"),
        ];
        flags.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect()
    }

    /// Builds a flag set from extension names (as printed by [`feature_names`](Self::feature_names)).
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut isa = Self::default();
        for n in names {
            match n.trim().to_ascii_lowercase().as_str() {
                "neon" => isa.neon = true,
                "fp16" => isa.fp16 = true,
                "dot" => isa.dot = true,
                other => isa.apply_feature(other),
            }
        }
        isa
    }
}

impl fmt::Display for CpuIsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.feature_names();
        if names.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", names.join(" "))
        }
    }
}
