//! smsgate Daemon - one-time codes and SMS relay to delivery workers
//!
//! # Usage
//!
//! ```bash
//! # Redis on localhost, port 5051
//! smsgated
//!
//! # In-memory store, JSON logs, custom origins
//! smsgated --store memory --json-logs --allowed-origin http://app.example
//!
//! # Settings from a file, overridden by flags and env
//! PORT=8080 smsgated --config /etc/smsgate.toml
//! ```

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use smsgated::config::{Args, Config};
use smsgated::server::{connect_store, Daemon};

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before clap reads the environment.
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();
    let config = Config::load(args).context("Failed to load configuration")?;

    init_logging(config.json_logs)?;

    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => info!("No .env file found, using environment variables"),
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        addr = %config.listen_addr(),
        store = ?config.store,
        "smsgate daemon starting"
    );

    let store = connect_store(&config)
        .await
        .context("Failed to connect to code store")?;
    info!(backend = store.backend(), "Code store ready");

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;

    Daemon::new(&config, store, cancel_token)
        .serve(listener)
        .await;

    info!("smsgate daemon stopped");
    Ok(())
}

/// Directives used when `RUST_LOG` is unset.
const DEFAULT_LOG_DIRECTIVES: &str = "smsgated=info,smsgate_core=info,tower_http=info";

fn init_logging(json: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(rust_log.as_deref())?;

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

/// `RUST_LOG` wins as a whole; the defaults only fill in when it is unset.
fn log_filter(rust_log: Option<&str>) -> Result<EnvFilter> {
    match rust_log.filter(|v| !v.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid {}: {directives}", EnvFilter::DEFAULT_ENV)),
        None => Ok(EnvFilter::new(DEFAULT_LOG_DIRECTIVES)),
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_directive_survives() {
        let filter = log_filter(Some("smsgated=debug,tower_http=debug")).unwrap().to_string();
        assert!(filter.contains("smsgated=debug"));
        assert!(filter.contains("tower_http=debug"));
        assert!(!filter.contains("smsgated=info"));
    }

    #[test]
    fn test_defaults_when_rust_log_unset() {
        for unset in [None, Some(""), Some("  ")] {
            let filter = log_filter(unset).unwrap().to_string();
            assert!(filter.contains("smsgated=info"));
            assert!(filter.contains("smsgate_core=info"));
            assert!(filter.contains("tower_http=info"));
        }
    }

    #[test]
    fn test_dotenv_values_reach_args() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "SMSGATE_ALLOWED_ORIGINS=http://dotenv.example\nSMSGATE_BIND=127.0.0.2\n",
        )
        .unwrap();
        std::env::remove_var("SMSGATE_ALLOWED_ORIGINS");
        std::env::set_var("SMSGATE_BIND", "127.0.0.3");

        dotenvy::from_path(&path).unwrap();
        let args = Args::try_parse_from(["smsgated"]).unwrap();

        assert_eq!(args.allowed_origins, vec!["http://dotenv.example".to_string()]);
        // Variables already set win over the file.
        assert_eq!(args.bind, Some("127.0.0.3".parse().unwrap()));
    }

    #[test]
    fn test_invalid_rust_log_rejected() {
        assert!(log_filter(Some("smsgated=loud")).is_err());
    }
}
