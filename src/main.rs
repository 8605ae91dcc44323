//! shhh - HTTP Server Entry Point
//!
//! Starts the HTTP server and the expiry sweeper.

use shhh::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shhh=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: store={:?}, kdf_iterations={}, sweep_interval={}s",
        config.store,
        config.kdf_iterations,
        config.sweep_interval.as_secs()
    );

    api::serve(config).await?;

    Ok(())
}
