// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmcopy CLI
//!
//! Copies a file locally, or between two cooperating processes over a named
//! shared memory channel.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shmcopy_core::{Config, ConfigLoader, CopyResult};

mod commands;

/// shmcopy - Brokerless file copy over POSIX shared memory
#[derive(Parser)]
#[command(name = "shmcopy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Slot capacity in bytes, overriding the configuration file
    #[arg(long, global = true)]
    pub capacity: Option<usize>,

    /// Bound in milliseconds on every wait for the peer
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy a file, optionally through a shared memory channel
    ///
    /// With a channel name, run this twice with the same arguments: the first
    /// process becomes the producer (reads the source), the second the
    /// consumer (writes the destination).
    Copy {
        /// File to read
        source: PathBuf,

        /// File to write
        dest: PathBuf,

        /// Channel shared by the producer and consumer processes
        channel: Option<String>,
    },

    /// Remove shared memory objects left behind by a crashed pair
    Clean {
        /// Channel name to clean up
        channel: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "shmcopy failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CopyResult<()> {
    let config = load_config(&cli)?;

    // Dispatch to command handlers
    match cli.command {
        Commands::Copy {
            source,
            dest,
            channel,
        } => commands::copy::execute(&config, &source, &dest, channel.as_deref()),
        Commands::Clean { channel } => commands::clean::execute(&channel),
    }
}

/// Configuration file (if any) with command-line overrides applied.
fn load_config(cli: &Cli) -> CopyResult<Config> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_file(path)?,
        None => Config::default(),
    };

    if let Some(capacity) = cli.capacity {
        config.set_capacity(capacity)?;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.set_timeout_ms(timeout_ms)?;
    }

    tracing::debug!(
        capacity = %config.channel.capacity,
        wait_timeout_ms = config.channel.wait_timeout.as_millis() as u64,
        "Configuration loaded"
    );
    Ok(config)
}
