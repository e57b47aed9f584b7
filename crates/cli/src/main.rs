//! A small inspection tool for the lowering process: it reads a JSON
//! description of a portable operator subgraph, lowers it for a target, and
//! prints the resulting accelerator IR. For more detail on the lowering
//! itself, please see the documentation for the [`karst_lowering`] crate.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

mod model;

use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use karst_lowering::{lower_subgraph, registry, Graph, Target};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lowers a portable operator subgraph onto an accelerator target and prints
/// the resulting IR.
#[derive(Debug, Parser)]
#[command(name = "karst", version, about)]
struct Args {
    /// The JSON subgraph description to lower.
    input: PathBuf,

    /// The accelerator target to lower for.
    #[arg(long, value_enum, default_value_t = TargetArg::Npu)]
    target: TargetArg,

    /// Increases log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// The targets selectable on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum TargetArg {
    /// The Karst NPU.
    Npu,

    /// The companion DSP.
    Dsp,
}

impl From<TargetArg> for Target {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Npu => Target::Npu,
            TargetArg::Dsp => Target::Dsp,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with_writer(std::io::stderr)
        .init();

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("could not read {}", args.input.display()))?;
    let subgraph: model::Subgraph =
        serde_json::from_str(&text).context("could not parse the subgraph description")?;

    let scope = subgraph.scope();
    let ops = subgraph.ops()?;
    info!(ops = ops.len(), "Loaded subgraph");

    let mut graph = Graph::new();
    let report = lower_subgraph(&mut graph, &scope, args.target.into(), registry(), &ops)
        .context("lowering failed")?;

    for ty in &report.lowered {
        println!("lowered: {ty}");
    }
    if let Some(skipped) = &report.skipped {
        println!("stopped at: {skipped} (stays on the host)");
    }
    if report.rebuild_on_shape_change {
        println!("note: lowering is shape-specialized; rebuild on shape change");
    }
    print!("{}", graph.builder());
    Ok(())
}
