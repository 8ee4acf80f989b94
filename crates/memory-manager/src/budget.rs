// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Workspace budget configuration and parsing.
//!
//! A [`MemoryBudget`] caps the bytes a [`WorkspaceArena`](crate::WorkspaceArena)
//! may hold at once: temporaries of the current bind plus every cached
//! persistent slot. Config files and CLI flags give it as a string.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Recognised suffixes, longest first so `"MB"` is not read as `"B"`.
const SUFFIXES: &[(&str, usize)] = &[
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// A hard ceiling on live workspace bytes.
///
/// Accepted strings (case-insensitive, surrounding whitespace ignored):
/// a byte count (`"65536"`), a binary-unit size (`"64K"`, `"512MB"`,
/// `"1G"`), or `"unlimited"`.
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// assert_eq!(MemoryBudget::parse("1G").unwrap().as_mb(), 1024);
/// assert!(MemoryBudget::parse("unlimited").unwrap().is_unlimited());
/// assert!(MemoryBudget::from_mb(1).admits(1 << 20));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self::from_bytes(mb.saturating_mul(MIB))
    }

    /// No effective limit.
    pub fn unlimited() -> Self {
        Self::from_bytes(usize::MAX)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes == usize::MAX
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Whole megabytes, truncated.
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Whether `bytes` live bytes stay within the ceiling.
    pub fn admits(&self, bytes: usize) -> bool {
        bytes <= self.bytes
    }

    /// Parses a budget string. Zero and overflowing sizes are rejected.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let trimmed = s.trim();
        let invalid = || MemoryError::InvalidBudget(s.to_string());
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::unlimited());
        }

        let upper = trimmed.to_ascii_uppercase();
        let (digits, unit) = SUFFIXES
            .iter()
            .find_map(|&(suffix, unit)| upper.strip_suffix(suffix).map(|d| (d, unit)))
            .unwrap_or((upper.as_str(), 1));

        let value: usize = digits.trim().parse().map_err(|_| invalid())?;
        match value.checked_mul(unit) {
            Some(0) | None => Err(invalid()),
            Some(bytes) => Ok(Self { bytes }),
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            return write!(f, "unlimited");
        }
        match [(GIB, "GB"), (MIB, "MB"), (KIB, "KB")]
            .into_iter()
            .find(|&(unit, _)| self.bytes >= unit && self.bytes % unit == 0)
        {
            Some((unit, name)) => write!(f, "{} {name}", self.bytes / unit),
            None => write!(f, "{} B", self.bytes),
        }
    }
}
