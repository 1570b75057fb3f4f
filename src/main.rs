//! agent-bridge - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the backend execution API.

use agent_bridge::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        working_dir = %config.working_dir.display(),
        wsl = config.wsl.is_some(),
        overrides = ?config.cli_paths.keys().collect::<Vec<_>>(),
        "Loaded configuration"
    );

    api::serve(config).await?;

    Ok(())
}
