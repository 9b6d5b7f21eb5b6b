//! Command-line flags (spec.md §6).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "poold", version, about = "Self-maintaining SOCKS5 reverse-front")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Path to the persisted live-set JSON file.
    #[arg(long = "alive-data-path", alias = "adp", default_value = "aliveDataPath.json")]
    pub alive_data_path: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    pub debug: bool,

    /// Skip the startup update check.
    #[arg(long = "disable-update-check", alias = "duc")]
    pub disable_update_check: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check for a newer release (stubbed: always reports up to date).
    Update,
}
