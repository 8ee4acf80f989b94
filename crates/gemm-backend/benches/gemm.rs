// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the hybrid and interleaved GEMM paths.

use cpu_info::{CpuInfo, CpuIsa};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gemm_backend::{gemm, GemmArgs, GemmArrays, GemmCommon, GemmConfig, GemmMethod, Nothing};
use std::time::Duration;

const SIZES: &[(usize, usize, usize)] = &[(16, 64, 64), (64, 128, 128), (128, 256, 256)];

fn run_fp32(c: &mut Criterion, method: GemmMethod, group_name: &str) {
    let mut group = c.benchmark_group(group_name);
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(300));

    for &(m, n, k) in SIZES {
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 * 0.5).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 5) as f32 * 0.25).collect();
        let mut out = vec![0.0f32; m * n];

        let args = GemmArgs::new(CpuInfo::with_isa(CpuIsa::default(), 1), m, n, k)
            .with_config(GemmConfig::with_method(method));
        let Some(mut g) = gemm::<f32, f32, f32, _>(&args, &Nothing) else {
            continue;
        };
        let mut ws = vec![0u64; g.get_working_size().div_ceil(8)];
        let mut packed = vec![0u64; g.get_b_pretransposed_array_size().div_ceil(8)];
        g.set_working_space(ws.as_mut_ptr().cast());
        g.set_arrays(GemmArrays {
            a: a.as_ptr(),
            lda: k,
            c: out.as_mut_ptr(),
            ldc: n,
            ..GemmArrays::default()
        });
        g.pretranspose_b_array(packed.as_mut_ptr().cast(), b.as_ptr(), n, 0, false);

        group.throughput(Throughput::Elements((2 * m * n * k) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{m}x{n}x{k}")), &(), |bench, _| {
            bench.iter(|| {
                g.execute_all();
                black_box(out.as_ptr());
            })
        });
    }
    group.finish();
}

fn bench_hybrid(c: &mut Criterion) {
    run_fp32(c, GemmMethod::GemmHybrid, "gemm/hybrid_fp32");
}

fn bench_interleaved(c: &mut Criterion) {
    run_fp32(c, GemmMethod::GemmInterleaved, "gemm/interleaved_fp32");
}

criterion_group!(benches, bench_hybrid, bench_interleaved);
criterion_main!(benches);
