//! Walden CLI
//!
//! Command-line tools for Walden log directories.
//!
//! # Commands
//!
//! - `inspect` - Display the descriptor and live files
//! - `verify` - Check every record of the live files
//! - `dump` - Print record headers for debugging
//! - `prune` - Delete files no longer named by the descriptor

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Walden command-line log tools.
#[derive(Parser)]
#[command(name = "walden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the descriptor and live files
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check checksums and record numbering of the live files
    Verify,

    /// Dump record headers for debugging
    Dump {
        /// Dump only this file (defaults to every live file)
        #[arg(long)]
        file: Option<String>,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete snapshot and log files of earlier generations
    Prune {
        /// Dry run - list what would be deleted
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log directory required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log directory required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            file,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Log directory required for dump")?;
            commands::dump::run(&path, file.as_deref(), limit, &format)?;
        }
        Commands::Prune { dry_run } => {
            let path = cli.path.ok_or("Log directory required for prune")?;
            commands::prune::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Walden CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Walden Core v{}", walden_core::VERSION);
        }
    }

    Ok(())
}
