//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tessera CLI - Discover and run adapter plugins
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List the adapter types provided by the binaries in a directory
    Scan {
        /// Adapter directory
        dir: PathBuf,

        /// Adapter binary extension
        #[arg(short, long, default_value = std::env::consts::DLL_EXTENSION)]
        extension: String,
    },

    /// Load adapters and print loader events until interrupted
    Watch {
        /// Loader configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Adapter directory, overriding the configuration
        dir: Option<PathBuf>,

        /// Print the loader status report after initialization
        #[arg(short, long)]
        status: bool,
    },

    /// Print or write the default loader configuration
    Config {
        /// Write to this file (TOML, JSON or YAML) instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
