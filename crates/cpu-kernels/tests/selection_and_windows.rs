// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Selection is a pure function of the selector, and scheduled execution
//! over any number of workers matches a single-threaded run.

use cpu_info::{CpuInfo, CpuIsa};
use cpu_kernels::{
    select, CpuActivationKernel, CpuArithmeticKernel, CpuPermuteKernel, DataTypeIsaSelectorData,
    HasKernelTable, KernelSelectionType,
};
use proptest::prelude::*;
use runtime::{CpuKernel, CpuScheduler, Hints, Scheduler, SingleThreadScheduler};
use std::collections::HashSet;
use std::sync::Arc;
use tensor_core::{
    ActivationFunction, ActivationLayerInfo, ArithmeticOperation, ConvertPolicy, Coordinates, DataType,
    PermutationVector, Tensor, TensorInfo, TensorPack, TensorShape, TensorType, Window,
};

fn isa_strategy() -> impl Strategy<Value = CpuIsa> {
    prop::collection::vec(any::<bool>(), 6).prop_map(|f| CpuIsa {
        neon: true,
        fp16: f[0],
        dot: f[1],
        bf16: f[2],
        i8mm: f[3],
        sve: f[4],
        sve2: f[4] && f[5],
        ..CpuIsa::default()
    })
}

fn dtype_strategy() -> impl Strategy<Value = DataType> {
    prop::sample::select(vec![
        DataType::F32,
        DataType::F16,
        DataType::QAsymm8,
        DataType::QAsymm8Signed,
        DataType::QSymm16,
        DataType::S32,
    ])
}

fn position<K: HasKernelTable>(name: &str) -> usize {
    K::available_kernels()
        .iter()
        .position(|uk| uk.name == name)
        .unwrap_or(usize::MAX)
}

fn run_with(scheduler: &dyn Scheduler, kernel: &dyn CpuKernel, pack: &TensorPack) {
    scheduler.schedule_op(kernel, &Hints::new(kernel.split_dimension()), kernel.window(), pack);
}

proptest! {
    #[test]
    fn selection_is_deterministic(isa in isa_strategy(), dt in dtype_strategy()) {
        let selector = DataTypeIsaSelectorData { dt, isa };
        for mode in [KernelSelectionType::Preferred, KernelSelectionType::Supported] {
            let first = select::<CpuActivationKernel>(&selector, mode).map(|uk| uk.name);
            let second = select::<CpuActivationKernel>(&selector, mode).map(|uk| uk.name);
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn preferred_never_comes_after_supported(isa in isa_strategy(), dt in dtype_strategy()) {
        let selector = DataTypeIsaSelectorData { dt, isa };
        let preferred = select::<CpuActivationKernel>(&selector, KernelSelectionType::Preferred);
        let supported = select::<CpuActivationKernel>(&selector, KernelSelectionType::Supported);
        if let Some(s) = supported {
            prop_assert!(s.ukernel.is_some());
            let p = preferred.map(|uk| position::<CpuActivationKernel>(uk.name));
            prop_assert!(p.is_some_and(|p| p <= position::<CpuActivationKernel>(s.name)));
        }
        if preferred.is_none() {
            prop_assert!(supported.is_none());
        }
    }

    #[test]
    fn split_windows_partition_the_iteration_space(
        dims in prop::collection::vec(1usize..7, 1..4),
        total in 1usize..9,
        split in 0usize..3,
    ) {
        let shape = TensorShape::new(&dims);
        let window = tensor_core::calculate_max_window(&shape, tensor_core::Steps::default());
        let split = split.min(dims.len() - 1);
        let mut seen: HashSet<Coordinates> = HashSet::new();
        let mut count = 0usize;
        for id in 0..total {
            window.split_window(split, id, total).for_each(|c| {
                count += 1;
                seen.insert(*c);
            });
        }
        prop_assert_eq!(count, shape.total_size());
        prop_assert_eq!(seen.len(), shape.total_size());
    }

    #[test]
    fn threaded_permute_matches_single_thread(
        w in 1usize..9,
        h in 1usize..9,
        c in 1usize..5,
        threads in 1usize..5,
    ) {
        let src_info = TensorInfo::new(TensorShape::new(&[w, h, c]), DataType::F32);
        let values: Vec<f32> = (0..w * h * c).map(|v| v as f32).collect();
        let src = Arc::new(Tensor::from_slice(src_info.clone(), &values).unwrap());
        let mut dst_info = TensorInfo::empty();
        let kernel = CpuPermuteKernel::configure(&src_info, &mut dst_info, PermutationVector::new(&[2, 0, 1])).unwrap();

        let single = Arc::new(Tensor::new(dst_info.clone()));
        let pack = TensorPack::new().with_const(TensorType::SRC, Arc::clone(&src)).with(TensorType::DST, Arc::clone(&single));
        run_with(&SingleThreadScheduler::new(), &kernel, &pack);

        let threaded = Arc::new(Tensor::new(dst_info));
        let pack = TensorPack::new().with_const(TensorType::SRC, src).with(TensorType::DST, Arc::clone(&threaded));
        run_with(&CpuScheduler::new(threads).unwrap(), &kernel, &pack);

        prop_assert_eq!(single.to_vec::<f32>(), threaded.to_vec::<f32>());
    }
}

#[test]
fn threaded_activation_and_arithmetic_cover_every_element() {
    let cpu = CpuInfo::with_isa(CpuIsa::default(), 4);
    let scheduler = CpuScheduler::with_cpu_info(4, cpu.clone()).unwrap();
    let info = TensorInfo::new(TensorShape::new(&[37, 5, 3]), DataType::F32);
    let n = info.shape().total_size();
    let values: Vec<f32> = (0..n).map(|v| v as f32 - 200.0).collect();
    let src = Arc::new(Tensor::from_slice(info.clone(), &values).unwrap());

    let mut act_dst = TensorInfo::empty();
    let relu = ActivationLayerInfo::new(ActivationFunction::Relu, 0.0, 0.0);
    let act = CpuActivationKernel::configure(&info, &mut act_dst, relu, &cpu).unwrap();
    let out = Arc::new(Tensor::new(act_dst));
    let pack = TensorPack::new().with_const(TensorType::SRC, Arc::clone(&src)).with(TensorType::DST, Arc::clone(&out));
    run_with(&scheduler, &act, &pack);
    let expected: Vec<f32> = values.iter().map(|v| v.max(0.0)).collect();
    assert_eq!(out.to_vec::<f32>(), expected);

    let mut add_dst = TensorInfo::empty();
    let add = CpuArithmeticKernel::configure(ArithmeticOperation::Add, ConvertPolicy::Wrap, &info, &info, &mut add_dst, &cpu)
        .unwrap();
    let sum = Arc::new(Tensor::new(add_dst));
    let pack = TensorPack::new()
        .with_const(TensorType::Src0, Arc::clone(&src))
        .with_const(TensorType::Src1, src)
        .with(TensorType::DST, Arc::clone(&sum));
    run_with(&scheduler, &add, &pack);
    let doubled: Vec<f32> = values.iter().map(|v| v * 2.0).collect();
    assert_eq!(sum.to_vec::<f32>(), doubled);
}

#[test]
fn kernel_windows_start_at_origin() {
    let cpu = CpuInfo::with_isa(CpuIsa::default(), 1);
    let info = TensorInfo::new(TensorShape::new(&[8, 4]), DataType::F32);
    let mut dst = TensorInfo::empty();
    let k = CpuActivationKernel::configure(&info, &mut dst, ActivationLayerInfo::disabled(), &cpu).unwrap();
    let w: &Window = k.window();
    assert_eq!(w.x().start(), 0);
    assert!(w.num_iterations_total() > 0);
}
