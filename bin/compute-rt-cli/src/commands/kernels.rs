// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `compute-rt kernels` command: the selection table as the host (or a
//! given ISA) sees it.

use cpu_info::{CpuInfo, CpuIsa};
use cpu_kernels::{
    select, CpuActivationKernel, CpuArithmeticKernel, CpuGemmMatrixAdditionKernel, CpuGemmMatrixMultiplyKernel,
    CpuPool2dKernel, CpuSoftmaxKernel, DataTypeIsaSelectorData, ElementwiseSelectorData, HasKernelTable,
    KernelSelectionType, PoolingSelectorData, SoftmaxSelectorData,
};
use cpu_operators::{AsmGemmInfo, CpuGemmAssemblyDispatch, OperatorContext};
use runtime::SingleThreadScheduler;
use std::sync::Arc;
use tensor_core::{ArithmeticOperation, DataLayout, DataType, QuantizationInfo, Size2D, TensorInfo, TensorShape};

const FLOAT_TYPES: &[DataType] = &[DataType::F32, DataType::F16];
const ALL_TYPES: &[DataType] = &[DataType::F32, DataType::F16, DataType::QAsymm8, DataType::QAsymm8Signed];

fn print_row<K: HasKernelTable>(family: &str, dt: DataType, selector: &K::Selector) {
    let choice = match select::<K>(selector, KernelSelectionType::Preferred) {
        Some(uk) if uk.ukernel.is_some() => uk.name.to_string(),
        Some(uk) => format!("{} (not compiled in)", uk.name),
        None => "-".to_string(),
    };
    println!("  {family:<18} {:<16} {choice}", dt.to_string());
}

/// Backend kernel for a 64x64x64 problem, `a x b -> d`.
fn asm_gemm_kernel(cpu: &CpuInfo, a: DataType, b: DataType, d: DataType) -> String {
    let ctx = OperatorContext::new(Arc::new(SingleThreadScheduler::with_cpu_info(cpu.clone())));
    let q = QuantizationInfo::new(0.5, 1);
    let info = |dims: &[usize], dt: DataType| TensorInfo::new(TensorShape::new(dims), dt).with_quantization(q.clone());
    let mut asm = CpuGemmAssemblyDispatch::with_context(ctx);
    asm.configure(
        &info(&[64, 64], a),
        &info(&[64, 64], b),
        None,
        &info(&[64, 64], d),
        &AsmGemmInfo::default(),
    );
    asm.kernel_name().unwrap_or("-").to_string()
}

pub fn execute(isa: Option<&str>) -> anyhow::Result<()> {
    let cpu = match isa {
        Some(names) => CpuInfo::with_isa(CpuIsa::from_names(names.split(',')), 1),
        None => CpuInfo::detect(),
    };
    let isa = *cpu.isa();

    super::banner("compute-rt · Kernel Selection");
    println!("  ISA: {isa}");
    println!();
    println!("  {:<18} {:<16} {}", "Family", "Data type", "Micro-kernel");
    println!("  {}", "-".repeat(64));

    for &dt in ALL_TYPES {
        print_row::<CpuActivationKernel>("activation", dt, &DataTypeIsaSelectorData { dt, isa });
    }
    for &dt in ALL_TYPES {
        let sel = ElementwiseSelectorData {
            dt,
            op: ArithmeticOperation::Add,
            isa,
        };
        print_row::<CpuArithmeticKernel>("arithmetic/add", dt, &sel);
    }
    for &dt in ALL_TYPES {
        let sel = SoftmaxSelectorData { dt, is_log: false, isa };
        print_row::<CpuSoftmaxKernel>("softmax", dt, &sel);
    }
    for &dt in ALL_TYPES {
        let sel = PoolingSelectorData {
            dt,
            dl: DataLayout::Nhwc,
            pool_stride_x: 1,
            pool_size: Size2D::new(2, 2),
            isa,
        };
        print_row::<CpuPool2dKernel>("pool2d/nhwc", dt, &sel);
    }
    for &dt in FLOAT_TYPES {
        print_row::<CpuGemmMatrixMultiplyKernel>("gemm/multiply", dt, &DataTypeIsaSelectorData { dt, isa });
    }
    for &dt in FLOAT_TYPES {
        print_row::<CpuGemmMatrixAdditionKernel>("gemm/addition", dt, &DataTypeIsaSelectorData { dt, isa });
    }
    println!();

    println!("  {:<34} {}", "Assembly GEMM (64x64x64)", "Backend kernel");
    println!("  {}", "-".repeat(64));
    let combos = [
        ("f32", DataType::F32, DataType::F32, DataType::F32),
        ("f16", DataType::F16, DataType::F16, DataType::F16),
        ("bf16 -> f32", DataType::BFloat16, DataType::BFloat16, DataType::F32),
        ("qasymm8", DataType::QAsymm8, DataType::QAsymm8, DataType::QAsymm8),
        ("qasymm8_signed", DataType::QAsymm8Signed, DataType::QAsymm8Signed, DataType::QAsymm8Signed),
        ("qasymm8 x qasymm8_signed -> s32", DataType::QAsymm8, DataType::QAsymm8Signed, DataType::S32),
        ("s8 -> s32", DataType::S8, DataType::S8, DataType::S32),
    ];
    for (label, a, b, d) in combos {
        println!("  {label:<34} {}", asm_gemm_kernel(&cpu, a, b, d));
    }
    Ok(())
}
