//! todaymeet entry point.

use std::process::ExitCode;

use clap::Parser;

use todaymeet_core::{TracingConfig, init_tracing};
use todaymeet_server::cli::{Cli, Command, ConfigAction};
use todaymeet_server::config::ServerConfig;
use todaymeet_server::{ServerResult, commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::from_flags(cli.debug, cli.json_logs)) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let path = cli.config.clone().unwrap_or_else(ServerConfig::default_path);
    let mut config = match cli.config {
        Some(ref path) => ServerConfig::load_from(path)?,
        None => ServerConfig::load()?,
    };

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            commands::serve(config).await
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::dump(&config, &path),
            ConfigAction::Validate => commands::validate(&config),
            ConfigAction::Path => commands::path(&path),
        },
    }
}
