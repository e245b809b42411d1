//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Today's meetings from Microsoft 365, behind a small web server.
#[derive(Debug, Parser)]
#[command(name = "todaymeet", version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short, long, env = "TODAYMEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short = 'v', long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the web server.
    Serve {
        /// Listen address, overriding `[server] bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Inspect the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration with the client secret masked.
    Dump,
    /// Resolve credentials and check every setting.
    Validate,
    /// Print the configuration file path.
    Path,
}
