// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PIFO tree simulator CLI
//!
//! Drives a configured scheduling tree with constant-bit-rate flows over a
//! simulated output link and reports what came out.
//!
//! # Usage
//!
//! ```bash
//! # Write example tree.toml and flows.toml
//! pifo-sim gen-config
//!
//! # Check a tree configuration
//! pifo-sim validate --config tree.toml
//!
//! # Run for 2 seconds of virtual time
//! pifo-sim run --config tree.toml --workload flows.toml --duration-ms 2000
//! ```

mod sim;
mod workload;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pifo_tree::{PipelineRegistry, TreeConfig};
use tracing_subscriber::EnvFilter;

use crate::sim::{SimPacket, SimReport, Simulation};
use crate::workload::Workload;

/// PIFO tree simulator
#[derive(Parser, Debug)]
#[command(name = "pifo-sim")]
#[command(about = "Discrete-event driver for PIFO scheduling trees")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workload through a tree
    Run {
        /// Tree configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Workload file
        #[arg(short, long)]
        workload: PathBuf,

        /// Override the workload duration
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Generate example tree and workload files
    GenConfig {
        /// Tree configuration output path
        #[arg(short, long, default_value = "tree.toml")]
        config: PathBuf,

        /// Workload output path
        #[arg(short, long, default_value = "flows.toml")]
        workload: PathBuf,
    },

    /// Validate a tree configuration by building it
    Validate {
        /// Tree configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::Run {
            config,
            workload,
            duration_ms,
        } => cmd_run(config, workload, duration_ms),
        Commands::GenConfig { config, workload } => cmd_gen_config(config, workload),
        Commands::Validate { config } => cmd_validate(config),
    }
}

fn cmd_run(
    config_path: PathBuf,
    workload_path: PathBuf,
    duration_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = TreeConfig::from_file(&config_path)?;
    let mut workload = Workload::from_file(&workload_path)?;
    if let Some(ms) = duration_ms {
        workload.duration_ms = ms;
        workload.validate()?;
    }

    let tree = config.build::<SimPacket>(&PipelineRegistry::builtin())?;
    let link_rate = workload
        .link
        .rate_bps
        .unwrap_or(config.monitor.link_bandwidth_bps);
    tracing::info!(
        "Simulating {} flows over {} nodes for {} ms at {}",
        workload.flows.len(),
        config.nodes.len(),
        workload.duration_ms,
        format_rate(link_rate as f64)
    );

    let report = Simulation::new(tree, &workload, link_rate).run()?;
    print_report(&report);
    Ok(())
}

fn cmd_gen_config(config: PathBuf, workload: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let tree_toml = TreeConfig::example().to_toml_string()?;
    std::fs::write(
        &config,
        format!(
            r#"# PIFO tree configuration
# Generated by pifo-sim gen-config

{}"#,
            tree_toml
        ),
    )?;
    println!("Generated tree configuration: {}", config.display());

    let flows_toml = Workload::example().to_toml_string()?;
    std::fs::write(
        &workload,
        format!(
            r#"# pifo-sim workload
# Generated by pifo-sim gen-config

{}"#,
            flows_toml
        ),
    )?;
    println!("Generated workload: {}", workload.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let result = TreeConfig::from_file(&config_path)
        .and_then(|config| config.build::<SimPacket>(&PipelineRegistry::builtin()).map(|t| (config, t)));
    match result {
        Ok((config, tree)) => {
            println!("Configuration valid!");
            println!();
            println!("Queue limit: {}", config.queue.max_size);
            println!("Nodes: {}", config.nodes.len());
            for node in tree.nodes() {
                let program = config
                    .nodes
                    .get(node.id() as usize)
                    .and_then(|n| n.enqueue.as_ref())
                    .map_or("fifo", |p| p.program.as_str());
                println!(
                    "  [{}] {} pifos={} parent={} enqueue={}",
                    node.id(),
                    if node.is_leaf() { "leaf" } else { "node" },
                    node.pifo_count(),
                    node.parent().map_or_else(|| "-".to_string(), |p| p.to_string()),
                    program
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_report(report: &SimReport) {
    println!("Simulated {} ms", report.duration_ns / 1_000_000);
    println!("Link rate: {}", format_rate(report.link_rate_bps as f64));
    println!();
    println!(
        "{:>6} {:>8} {:>8} {:>8} {:>10} {:>12} {:>10} {:>10}",
        "flow", "sent", "dropped", "out", "bytes", "throughput", "avg delay", "max delay"
    );
    for (id, flow) in &report.flows {
        println!(
            "{:>6} {:>8} {:>8} {:>8} {:>10} {:>12} {:>10} {:>10}",
            id,
            flow.sent,
            flow.dropped,
            flow.delivered,
            format_bytes(flow.delivered_bytes),
            format_rate(report.throughput_bps(*id)),
            format_delay(flow.mean_delay_ns()),
            format_delay(flow.max_delay_ns as f64)
        );
    }
    println!();
    println!("Tree:");
    println!(
        "  Enqueued: {} ({})",
        report.tree.enqueued_packets,
        format_bytes(report.tree.enqueued_bytes)
    );
    println!(
        "  Dequeued: {} ({})",
        report.tree.dequeued_packets,
        format_bytes(report.tree.dequeued_bytes)
    );
    for (reason, count) in &report.drops {
        println!("  {}: {}", reason, count);
    }
    println!("  Announcements: {}", report.tree.announcements);
    println!("  Retractions: {}", report.tree.retractions);
    println!("  Idle ticks: {}", report.tree.idle_ticks);
    println!("  Left in queue: {}", report.left_in_queue);
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.2} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}

fn format_rate(bps: f64) -> String {
    if bps >= 1e9 {
        format!("{:.2} Gb/s", bps / 1e9)
    } else if bps >= 1e6 {
        format!("{:.2} Mb/s", bps / 1e6)
    } else if bps >= 1e3 {
        format!("{:.2} kb/s", bps / 1e3)
    } else {
        format!("{:.0} b/s", bps)
    }
}

fn format_delay(ns: f64) -> String {
    if ns >= 1e6 {
        format!("{:.2} ms", ns / 1e6)
    } else {
        format!("{:.1} us", ns / 1e3)
    }
}
