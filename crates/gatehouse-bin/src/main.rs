//! # Gatehouse Server Binary
//!
//! Serves the static host catalog API over an in-memory store.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use gatehouse_api::AppState;
use gatehouse_config::{Config, load_or_default};
use gatehouse_host::{Repository, schema};
use gatehouse_observe::LogFormat;
use gatehouse_store::{MemoryBackend, MemoryKms};

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(about = "Gatehouse static host catalog server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG", default_value = "config.yaml")]
    config: String,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log format: pretty, compact or json (overrides config)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    config
}

fn build_state(config: &Config) -> AppState<MemoryBackend> {
    let repo = Repository::new(schema::memory_backend(), Arc::new(MemoryKms::new()))
        .with_retry_policy(config.store.retry.retry_policy())
        .with_default_limit(config.repository.default_limit);

    let state = AppState::new(repo);
    match config.server.request_timeout() {
        Some(timeout) => state.with_request_timeout(timeout),
        None => state,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = apply_overrides(load_or_default(&args.config), &args);
    gatehouse_observe::init_logging(config.logging.clone())?;

    tracing::info!(config = %args.config, "Starting gatehouse");
    config.validate().context("Configuration validation error")?;

    let state = build_state(&config);
    tracing::info!(
        backend = %config.store.backend,
        max_retries = config.store.retry.max_retries,
        default_limit = config.repository.default_limit,
        "Using in-memory storage backend"
    );

    let address = config.server.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    tracing::info!(address = %address, "API server listening");

    axum::serve(listener, gatehouse_api::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from(["gatehouse", "--port", "9000", "--log-format", "json"]);
        let config = apply_overrides(Config::default(), &args);

        assert_eq!(args.config, "config.yaml");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_args_reject_unknown_log_format() {
        assert!(Args::try_parse_from(["gatehouse", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_build_state_applies_config() {
        let mut config = Config::default();
        config.store.retry.max_retries = 9;
        config.server.request_timeout_ms = 250;

        let state = build_state(&config);

        assert_eq!(state.repo.retry_policy().max_retries, 9);
        assert_eq!(state.request_timeout, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_router_serves_catalogs() {
        let app = gatehouse_api::create_router(build_state(&Config::default()));
        let request = Request::builder()
            .method("GET")
            .uri("/v1/scopes/o_1234567890/host-catalogs")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
