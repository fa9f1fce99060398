//! Command-line surface.

use std::path::PathBuf;
use std::sync::OnceLock;

use clap::{Parser, Subcommand};

/// Set once at startup so the error path knows how to format output.
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser)]
#[command(
    name = "beamwalk",
    about = "Closed-loop two-mirror beam alignment",
    version
)]
pub struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "beamwalk.toml")]
    pub config: PathBuf,

    /// Log level filter (overridden by RUST_LOG when set)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit stable JSON result lines on stdout (logs go to stderr)
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the alignment loop against the simulated beamline
    Align {
        /// Override [run].max_walks
        #[arg(long)]
        max_walks: Option<usize>,

        /// Override [run].timeout_s
        #[arg(long)]
        timeout_s: Option<f64>,

        /// CSV goal table overriding per-imager goals (imager,goal,tolerance)
        #[arg(long)]
        goal_table: Option<PathBuf>,

        /// Enable threshold recovery scans on filter starvation
        #[arg(long)]
        recover: bool,
    },
    /// Probe the configured devices and report their health
    Check,
}
