// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `compute-rt info` command: what the host CPU offers.

use cpu_info::CpuInfo;

pub fn execute(json: bool) -> anyhow::Result<()> {
    let cpu = CpuInfo::detect();
    if json {
        println!("{}", serde_json::to_string_pretty(&cpu)?);
        return Ok(());
    }

    super::banner("compute-rt · Host CPU");

    println!("  Model:        {}", cpu.model().as_str());
    println!("  Cores:        {}", cpu.num_cpus());
    println!("  ISA:          {}", cpu.isa());
    if cpu.has_sve() {
        println!("  SVE length:   {} bits", cpu.sve_vector_length_bits());
    }
    println!();

    println!("  Capabilities");
    let flag = |on: bool| if on { "yes" } else { "no" };
    println!("   FP16 arithmetic:  {}", flag(cpu.has_fp16()));
    println!("   BF16 arithmetic:  {}", flag(cpu.has_bf16()));
    println!("   Dot product:      {}", flag(cpu.has_dotprod()));
    println!("   Int8 matmul:      {}", flag(cpu.has_i8mm()));
    println!("   SVE2:             {}", flag(cpu.has_sve2()));
    println!("   SME2:             {}", flag(cpu.has_sme2()));
    Ok(())
}
