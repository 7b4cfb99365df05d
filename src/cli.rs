//! CLI definitions for hostkeeper.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// hostkeeper CLI.
#[derive(Parser)]
#[command(name = "hostkeeper")]
#[command(about = "Run and manage a program as an OS background service")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.hostkeeper/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Service name, overrides the configuration
    #[arg(long, global = true)]
    pub servicename: Option<String>,

    /// Service instance name
    #[arg(long, global = true)]
    pub instance: Option<String>,

    /// Display name used by the service manager
    #[arg(long, global = true)]
    pub displayname: Option<String>,

    /// Heartbeat interval in seconds
    #[arg(long, global = true)]
    pub interval: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Host the service in the foreground (default)
    Run,

    /// Install the service
    Install {
        /// Account the service runs as
        #[arg(long)]
        username: Option<String>,

        /// Service description
        #[arg(long)]
        description: Option<String>,

        /// Init-system facility or service this one depends on (repeatable)
        #[arg(long = "dependency")]
        dependencies: Vec<String>,

        /// automatic, manual, disabled or automatic_delayed
        #[arg(long)]
        start_mode: Option<String>,
    },

    /// Uninstall the service
    Uninstall,

    /// Start the installed service
    Start,

    /// Stop the installed service
    Stop,

    /// Show whether the service is running
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Rewrite single-dash long parameters (`-servicename x`) as double-dash
/// options so launch lines written by the installer parse with clap.
pub(crate) fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .enumerate()
        .map(|(index, arg)| {
            let bytes = arg.as_bytes();
            let single_dash_long = index > 0
                && bytes.len() > 2
                && bytes[0] == b'-'
                && bytes[1] != b'-'
                && bytes[1].is_ascii_alphabetic();
            if single_dash_long {
                format!("-{}", arg.to_ascii_lowercase())
            } else {
                arg
            }
        })
        .collect()
}
