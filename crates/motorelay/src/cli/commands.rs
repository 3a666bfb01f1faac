//! CLI command definitions.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `relay.bind`)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,
}

/// Track command arguments.
#[derive(Debug, Args)]
pub struct TrackCommand {
    /// Subject (vehicle) identifier
    pub subject: String,

    /// JSON-lines file of samples to replay
    #[arg(long, value_name = "FILE")]
    pub replay: PathBuf,

    /// Milliseconds between replayed samples (overrides `tracker.sample_interval_ms`)
    #[arg(short, long, value_name = "MS")]
    pub interval: Option<u64>,

    /// Relay URL (overrides `client.url`)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Record locally without connecting to the relay
    #[arg(long)]
    pub offline: bool,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Only show messages about this subject
    #[arg(short, long)]
    pub subject: Option<String>,

    /// Relay URL (overrides `client.url`)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Print raw JSON messages
    #[arg(short, long)]
    pub json: bool,
}

/// Route command arguments.
#[derive(Debug, Args)]
pub struct RouteCommand {
    /// Subject (vehicle) identifier
    pub subject: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Include every sample in the output
    #[arg(long)]
    pub samples: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
