//! # Parrot Server
//!
//! Anonymous one-to-one chat relay: pairs users of opposite categories and
//! relays their messages over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parrot
//!
//! # Run with custom config
//! parrot --config /path/to/parrot.toml
//!
//! # Run with environment variables
//! PARROT_PORT=8080 PARROT_HOST=0.0.0.0 parrot
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parrot_server=debug,parrot_core=debug,parrot_transport=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = config_path(std::env::args().skip(1))?;
    let config = config::Config::load(config_path.as_deref())?;

    tracing::info!("Starting Parrot server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Extract `--config <path>` or `--config=<path>` from the arguments.
fn config_path(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            match args.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config requires a path"),
            }
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(PathBuf::from(path)));
        }
        bail!("Unknown argument: {}", arg);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_config_path_arguments() {
        assert_eq!(config_path(args(&[])).unwrap(), None);
        assert_eq!(
            config_path(args(&["--config", "/etc/p.toml"])).unwrap(),
            Some(PathBuf::from("/etc/p.toml"))
        );
        assert_eq!(
            config_path(args(&["--config=p.toml"])).unwrap(),
            Some(PathBuf::from("p.toml"))
        );
        assert!(config_path(args(&["--config"])).is_err());
        assert!(config_path(args(&["--verbose"])).is_err());
    }
}
