//! # Conduit Server
//!
//! Realtime channel server speaking JSON messages over WebSocket and HTTP
//! long polling.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! conduit
//!
//! # Run with a config file in the working directory
//! cp conduit.example.toml conduit.toml && conduit
//!
//! # Run with environment variables
//! CONDUIT_PORT=8080 CONDUIT_HOST=0.0.0.0 conduit
//! ```

mod channels;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Conduit server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
