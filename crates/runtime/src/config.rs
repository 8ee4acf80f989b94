// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! num_threads = 4
//! scheduler = "cpp"
//! workspace_budget = "256M"
//! fast_math = false
//! ```

use crate::{CpuScheduler, RuntimeError, Scheduler, SingleThreadScheduler};
use cpu_info::CpuInfo;
use memory_manager::MemoryBudget;
use std::path::Path;
use std::sync::Arc;

/// Configuration for running operators.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads (defaults to number of online CPU cores).
    pub num_threads: Option<usize>,
    /// Scheduler name: `"cpp"` or `"single-thread"`.
    #[serde(default = "default_scheduler_name")]
    pub scheduler: String,
    /// Workspace budget (human-readable, e.g., `"512M"`).
    #[serde(default = "default_budget")]
    pub workspace_budget: String,
    /// Allow reduced-precision accumulation where a kernel offers it.
    #[serde(default)]
    pub fast_math: bool,
}

fn default_scheduler_name() -> String {
    "cpp".to_string()
}

fn default_budget() -> String {
    "512M".to_string()
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the workspace budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.workspace_budget)
            .map_err(|e| RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Resolves the number of worker threads.
    pub fn resolve_threads(&self) -> usize {
        match self.num_threads {
            Some(n) if n > 0 => n,
            _ => CpuInfo::get().num_cpus().max(1),
        }
    }

    /// Creates the scheduler specified by this config.
    pub fn build_scheduler(&self) -> Result<Arc<dyn Scheduler>, RuntimeError> {
        match self.scheduler.to_lowercase().as_str() {
            "cpp" | "multi-thread" => {
                let s = CpuScheduler::new(self.resolve_threads())?;
                Ok(Arc::new(s))
            }
            "single-thread" | "st" => Ok(Arc::new(SingleThreadScheduler::new())),
            other => Err(RuntimeError::ConfigError(format!(
                "unknown scheduler '{other}'; expected 'cpp' or 'single-thread'"
            ))),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            scheduler: default_scheduler_name(),
            workspace_budget: default_budget(),
            fast_math: false,
        }
    }
}
