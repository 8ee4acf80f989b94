// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `compute-rt gemm` command: configure, bind, prepare and time one GEMM.
//!
//! Float types go through `CpuGemm`; quantized types through `CpuMatMul`
//! with a requantizing output stage.

use cpu_operators::{CpuGemm, CpuMatMul, CpuMatMulSettings, Operator, OperatorContext};
use half::{bf16, f16};
use memory_manager::{MemoryLifetime, WorkspaceArena};
use runtime::RuntimeConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tensor_core::{
    ActivationLayerInfo, DataType, GemmInfo, MatMulInfo, QuantizationInfo, Tensor, TensorInfo, TensorPack,
    TensorShape, TensorType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GemmDataType {
    F32,
    F16,
    Bf16,
    Qasymm8,
    #[value(name = "qasymm8_signed")]
    Qasymm8Signed,
}

impl GemmDataType {
    fn data_type(self) -> DataType {
        match self {
            Self::F32 => DataType::F32,
            Self::F16 => DataType::F16,
            Self::Bf16 => DataType::BFloat16,
            Self::Qasymm8 => DataType::QAsymm8,
            Self::Qasymm8Signed => DataType::QAsymm8Signed,
        }
    }
}

pub struct GemmArgs {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub dtype: GemmDataType,
    pub threads: Option<usize>,
    pub iterations: usize,
}

/// Deterministic operand data for `info`.
fn operand(info: TensorInfo, seed: usize) -> anyhow::Result<Arc<Tensor>> {
    let n = info.shape().total_size();
    let value = |i: usize| ((i * 31 + seed * 17) % 23) as f32 / 23.0 - 0.5;
    let t = match info.data_type() {
        DataType::F32 => Tensor::from_slice(info, &(0..n).map(value).collect::<Vec<f32>>())?,
        DataType::F16 => Tensor::from_slice(info, &(0..n).map(|i| f16::from_f32(value(i))).collect::<Vec<_>>())?,
        DataType::BFloat16 => {
            Tensor::from_slice(info, &(0..n).map(|i| bf16::from_f32(value(i))).collect::<Vec<_>>())?
        }
        DataType::QAsymm8 => Tensor::from_slice(info, &(0..n).map(|i| ((i * 7 + seed) % 256) as u8).collect::<Vec<_>>())?,
        _ => Tensor::from_slice(
            info,
            &(0..n).map(|i| ((i * 7 + seed) % 256) as u8 as i8).collect::<Vec<_>>(),
        )?,
    };
    Ok(Arc::new(t))
}

struct Timings {
    prepare: Duration,
    runs: Vec<Duration>,
}

impl Timings {
    fn mean(&self) -> Duration {
        self.runs.iter().sum::<Duration>() / self.runs.len().max(1) as u32
    }

    fn min(&self) -> Duration {
        self.runs.iter().copied().min().unwrap_or_default()
    }

    fn max(&self) -> Duration {
        self.runs.iter().copied().max().unwrap_or_default()
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

pub fn execute(args: GemmArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if args.threads.is_some() {
        config.num_threads = args.threads;
    }
    anyhow::ensure!(args.m > 0 && args.n > 0 && args.k > 0, "m, n and k must be positive");

    let ctx = OperatorContext::new(config.build_scheduler()?);
    let arena = WorkspaceArena::new(config.parse_budget()?);
    let dt = args.dtype.data_type();

    super::banner("compute-rt · GEMM");
    println!("  Problem:      {} x {} x {} ({dt})", args.m, args.n, args.k);
    println!("  Threads:      {}", ctx.num_threads());
    println!("  Fast math:    {}", config.fast_math);
    println!("  Budget:       {}", config.workspace_budget);
    println!();

    let mut a_info = TensorInfo::new(TensorShape::new(&[args.k, args.m]), dt);
    let mut b_info = TensorInfo::new(TensorShape::new(&[args.n, args.k]), dt);
    let mut d_info = TensorInfo::empty();

    let (mut op, kernel): (Box<dyn Operator>, String) = if dt.is_quantized() {
        a_info = a_info.with_quantization(QuantizationInfo::new(0.02, 3));
        b_info = b_info.with_quantization(QuantizationInfo::new(0.01, 0));
        d_info = TensorInfo::new(TensorShape::new(&[args.n, args.m]), dt)
            .with_quantization(QuantizationInfo::new(0.05, -2));
        let mut mm = CpuMatMul::with_context(ctx.clone());
        mm.configure(
            &a_info,
            &b_info,
            &mut d_info,
            &MatMulInfo::default(),
            CpuMatMulSettings {
                fast_math: config.fast_math,
                fixed_format: false,
            },
            &ActivationLayerInfo::disabled(),
        )?;
        let name = mm.kernel_name().unwrap_or("-").to_string();
        (Box::new(mm), name)
    } else {
        let mut gemm = CpuGemm::with_context(ctx.clone());
        let info = GemmInfo {
            fast_math: config.fast_math,
            ..GemmInfo::default()
        };
        gemm.configure(&a_info, &b_info, None, &mut d_info, 1.0, 0.0, &info)?;
        let name = gemm.kernel_name().unwrap_or("portable (interleave + transpose + multiply)").to_string();
        (Box::new(gemm), name)
    };
    println!("  Kernel:       {kernel}");
    println!("  Output:       {} ({})", d_info.shape(), d_info.data_type());
    println!();

    let workspace = op.workspace();
    println!("  Workspace");
    if workspace.iter().all(|m| m.size == 0) {
        println!("   (none)");
    }
    for req in workspace.iter().filter(|m| m.size > 0) {
        let lifetime = match req.lifetime {
            MemoryLifetime::Temporary => "temporary",
            MemoryLifetime::Prepare => "prepare",
            MemoryLifetime::Persistent => "persistent",
        };
        println!(
            "   {:<10} {:>10} bytes  {lifetime:<10} align {}",
            format!("{:?}", req.slot),
            req.size,
            req.alignment
        );
    }
    println!();

    let d = Arc::new(Tensor::new(d_info));
    let mut pack = TensorPack::new()
        .with_const(TensorType::Src0, operand(a_info, 1)?)
        .with_const(TensorType::Src1, operand(b_info, 2)?)
        .with(TensorType::DST, Arc::clone(&d));
    let _guard = arena.bind(&workspace, &mut pack)?;

    let start = Instant::now();
    op.prepare(&pack);
    op.run(&pack);
    let prepare = start.elapsed();

    let runs = (0..args.iterations)
        .map(|_| {
            let start = Instant::now();
            op.run(&pack);
            start.elapsed()
        })
        .collect::<Vec<_>>();
    let timings = Timings { prepare, runs };
    tracing::info!(iterations = args.iterations, mean_ms = ms(timings.mean()), "gemm benchmark done");

    let flops = 2.0 * (args.m * args.n * args.k) as f64;
    println!("  Timings");
    println!("   First run:    {:>9.3} ms (includes prepare)", ms(timings.prepare));
    if !timings.runs.is_empty() {
        println!("   Mean:         {:>9.3} ms", ms(timings.mean()));
        println!("   Min / max:    {:>9.3} / {:.3} ms", ms(timings.min()), ms(timings.max()));
        println!(
            "   Throughput:   {:>9.2} GFLOP/s",
            flops / timings.mean().as_secs_f64().max(f64::EPSILON) / 1e9
        );
    }
    println!();
    println!("  Arena: {}", arena.stats().summary());
    println!("   live {} bytes, persistent {} bytes", arena.live_bytes(), arena.persistent_bytes());
    Ok(())
}
