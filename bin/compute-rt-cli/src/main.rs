// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # compute-rt
//!
//! Command-line interface for the CPU compute runtime.
//!
//! ## Usage
//! ```bash
//! # What the host supports
//! compute-rt info
//!
//! # Which micro-kernel each family picks, for the host or a given ISA
//! compute-rt kernels --isa neon,fp16,sve
//!
//! # Configure and time one GEMM
//! compute-rt gemm -m 256 -n 256 -k 256 --dtype f32 --threads 4 --iterations 20
//! ```

mod commands;

use clap::{Parser, Subcommand};
use commands::gemm::GemmDataType;

#[derive(Parser)]
#[command(
    name = "compute-rt",
    about = "CPU operator runtime: kernel selection, assembly GEMM and scheduling",
    version,
    author
)]
struct Cli {
    /// Path to a TOML runtime configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected CPU: model, core count and ISA extensions.
    Info {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the micro-kernel selected per kernel family and data type.
    Kernels {
        /// Comma-separated ISA extensions to select for (e.g., "neon,fp16,sve").
        /// Defaults to the host.
        #[arg(long)]
        isa: Option<String>,
    },

    /// Configure and run one GEMM, printing the backend kernel and timings.
    Gemm {
        /// Rows of the output.
        #[arg(short, long)]
        m: usize,

        /// Columns of the output.
        #[arg(short, long)]
        n: usize,

        /// Reduction depth.
        #[arg(short, long)]
        k: usize,

        /// Element type of the operands.
        #[arg(long, value_enum, default_value_t = GemmDataType::F32)]
        dtype: GemmDataType,

        /// Worker threads (overrides the config file).
        #[arg(short, long)]
        threads: Option<usize>,

        /// Timed runs after the first one.
        #[arg(short, long, default_value_t = 10)]
        iterations: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Info { json } => commands::info::execute(json),
        Commands::Kernels { isa } => commands::kernels::execute(isa.as_deref()),
        Commands::Gemm {
            m,
            n,
            k,
            dtype,
            threads,
            iterations,
        } => commands::gemm::execute(
            commands::gemm::GemmArgs {
                m,
                n,
                k,
                dtype,
                threads,
                iterations,
            },
            cli.config.as_deref(),
        ),
    }
}
