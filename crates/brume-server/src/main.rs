//! # brume
//!
//! Sensor-telemetry pub/sub relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! brume
//!
//! # Run with a config file in the search path
//! cp brume.toml /etc/brume/brume.toml && brume
//!
//! # Run with environment variables
//! BRUME_WS_PORT=8889 BRUME_HOST=0.0.0.0 brume
//! ```

use anyhow::Result;
use brume_server::{config::Config, metrics, runtime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brume=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!(
        "Starting brume relay (ws: {}, tcp: {}, http: {})",
        config.listeners.websocket,
        config.listeners.tcp,
        config.http.enabled
    );

    // Initialize metrics
    metrics::init_metrics();

    // Bind listeners and start the relay
    let relay = runtime::spawn(config).await?;

    tokio::signal::ctrl_c().await?;
    relay.shutdown().await;

    Ok(())
}
