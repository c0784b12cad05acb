//! # Courier Server
//!
//! Point-to-point message relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with ./courier.toml (also searched: /etc/courier, ~/.config/courier)
//! courier
//!
//! # Run with environment variables
//! COURIER_PORT=8080 COURIER_HOST=0.0.0.0 COURIER_AUTH__SECRET=... courier
//!
//! # Print a token for an identity, signed with the configured secret
//! courier token alice
//! ```

use anyhow::{bail, Result};
use courier_core::Identity;
use courier_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };

    let mut args = std::env::args().skip(1);
    if let Some(command) = args.next() {
        return match (command.as_str(), args.next()) {
            ("token", Some(identity)) => {
                let token = config
                    .auth
                    .validator()
                    .issue(&Identity::from(identity), config.auth.token_ttl())?;
                println!("{}", token);
                Ok(())
            }
            _ => bail!("usage: courier [token <identity>]"),
        };
    }

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
