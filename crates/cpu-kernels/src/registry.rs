// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Table-driven micro-kernel selection.
//!
//! Every kernel family declares an ordered, immutable table of
//! [`MicroKernel`] entries. [`select`] walks that table and returns the
//! first entry whose predicate accepts the selector. More specific entries
//! (SVE2, SVE, FP16) therefore come before the portable ones.
//!
//! An entry whose Cargo feature is disabled keeps its predicate but has no
//! function pointer. [`KernelSelectionType::Preferred`] still reports it;
//! [`KernelSelectionType::Supported`] skips it.

use cpu_info::CpuIsa;
use tensor_core::{ArithmeticOperation, DataLayout, DataType, PoolingType, Size2D};

/// How [`select`] treats entries whose micro-kernel was not compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelSelectionType {
    /// First matching entry, compiled in or not.
    #[default]
    Preferred,
    /// First matching entry that can actually run.
    Supported,
}

/// One entry of a kernel family's table.
pub struct MicroKernel<S: 'static, F: 'static> {
    pub name: &'static str,
    pub is_selected: fn(&S) -> bool,
    /// `None` when the entry's Cargo feature is disabled.
    pub ukernel: Option<F>,
}

impl<S, F> std::fmt::Debug for MicroKernel<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroKernel")
            .field("name", &self.name)
            .field("compiled", &self.ukernel.is_some())
            .finish()
    }
}

/// Implemented by every kernel that picks its micro-kernel from a table.
pub trait HasKernelTable {
    type Selector: 'static;
    type Ukernel: Copy + 'static;

    /// The family's table, most specific entries first.
    fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>];
}

/// Returns the first entry of `K`'s table matching `selector` under `mode`.
///
/// Pure: the same selector and mode always yield the same entry.
pub fn select<K: HasKernelTable>(
    selector: &K::Selector,
    mode: KernelSelectionType,
) -> Option<&'static MicroKernel<K::Selector, K::Ukernel>> {
    K::available_kernels().iter().find(|uk| {
        (uk.is_selected)(selector) && (mode == KernelSelectionType::Preferred || uk.ukernel.is_some())
    })
}

/// Function pointer of an entry when `$feature` is enabled, `None` otherwise.
macro_rules! gated {
    ($feature:literal, $f:expr) => {
        if cfg!(feature = $feature) {
            Some($f)
        } else {
            None
        }
    };
}
pub(crate) use gated;

// ── Selector data ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTypeIsaSelectorData {
    pub dt: DataType,
    pub isa: CpuIsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTypeDataLayoutIsaSelectorData {
    pub dt: DataType,
    pub dl: DataLayout,
    pub isa: CpuIsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementwiseSelectorData {
    pub dt: DataType,
    pub op: ArithmeticOperation,
    pub isa: CpuIsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftmaxSelectorData {
    pub dt: DataType,
    pub is_log: bool,
    pub isa: CpuIsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingSelectorData {
    pub dt: DataType,
    pub dl: DataLayout,
    pub pool_stride_x: usize,
    pub pool_size: Size2D,
    pub isa: CpuIsa,
}

/// Selector of the NHWC assembly pooling dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsmPoolingSelectorData {
    pub dt: DataType,
    pub pool_type: PoolingType,
    pub pool_size: Size2D,
    pub stride: (usize, usize),
    pub isa: CpuIsa,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Toy;

    fn first(_: &DataTypeIsaSelectorData) {}
    fn second(_: &DataTypeIsaSelectorData) {}

    static TOY_TABLE: &[MicroKernel<DataTypeIsaSelectorData, fn(&DataTypeIsaSelectorData)>] = &[
        MicroKernel {
            name: "never_built_fp32",
            is_selected: |d| d.dt == DataType::F32 && d.isa.sve,
            ukernel: None,
        },
        MicroKernel {
            name: "generic_fp32",
            is_selected: |d| d.dt == DataType::F32,
            ukernel: Some(first),
        },
        MicroKernel {
            name: "generic_any",
            is_selected: |_| true,
            ukernel: Some(second),
        },
    ];

    impl HasKernelTable for Toy {
        type Selector = DataTypeIsaSelectorData;
        type Ukernel = fn(&DataTypeIsaSelectorData);

        fn available_kernels() -> &'static [MicroKernel<Self::Selector, Self::Ukernel>] {
            TOY_TABLE
        }
    }

    fn sel(dt: DataType, isa: CpuIsa) -> DataTypeIsaSelectorData {
        DataTypeIsaSelectorData { dt, isa }
    }

    #[test]
    fn test_first_match_wins() {
        let uk = select::<Toy>(&sel(DataType::F32, CpuIsa::default()), KernelSelectionType::Supported).unwrap();
        assert_eq!(uk.name, "generic_fp32");
        let uk = select::<Toy>(&sel(DataType::S32, CpuIsa::default()), KernelSelectionType::Supported).unwrap();
        assert_eq!(uk.name, "generic_any");
    }

    #[test]
    fn test_preferred_reports_missing_entries() {
        let isa = CpuIsa::armv9();
        let preferred = select::<Toy>(&sel(DataType::F32, isa), KernelSelectionType::Preferred).unwrap();
        assert_eq!(preferred.name, "never_built_fp32");
        assert!(preferred.ukernel.is_none());
        let supported = select::<Toy>(&sel(DataType::F32, isa), KernelSelectionType::Supported).unwrap();
        assert_eq!(supported.name, "generic_fp32");
    }

    #[test]
    fn test_gated_macro() {
        let on: Option<fn(&DataTypeIsaSelectorData)> = gated!("fp16", first);
        assert_eq!(on.is_some(), cfg!(feature = "fp16"));
    }
}
