//! CLI argument definitions for flowguard-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Flowguard network anomaly detection daemon.
///
/// Streams flows from the cluster observability relay, records derived
/// metrics, runs the detection rule set, and serves the operator API.
#[derive(Parser, Debug)]
#[command(name = "flowguard-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to flowguard.toml configuration file.
    #[arg(short, long, default_value = "configs/flowguard.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}
