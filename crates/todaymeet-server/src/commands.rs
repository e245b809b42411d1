//! Subcommand implementations.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::routes;
use crate::signals::shutdown_signal;
use crate::state::AppState;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the web server until a shutdown signal arrives.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let state = AppState::from_config(&config)?;
    let addr = config.bind_addr()?;

    let registry = state.registry.clone();
    let pruner = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            registry.prune();
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, tenant = %config.provider.tenant, "listening");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    debug!("server stopped");
    Ok(())
}

/// Print the configuration with the client secret masked.
pub fn dump(config: &ServerConfig, path: &Path) -> ServerResult<()> {
    println!("# config.toml ({})", path.display());
    println!("{}", config.to_redacted_toml()?);
    Ok(())
}

/// Validate the configuration, resolving credential references.
pub fn validate(config: &ServerConfig) -> ServerResult<()> {
    config.validate()?;
    println!("Configuration is valid.");
    if config.app_access.is_some() {
        println!("Application calendar access is enabled.");
    }
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ServerResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
