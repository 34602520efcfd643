//! Silo server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use silo_core::config::AppConfig;
use silo_server::bootstrap::ensure_admin_token;
use silo_server::{AppState, PreauthService, create_router};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Silo - an access-controlled node store
#[derive(Parser, Debug)]
#[command(name = "silod")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SILO_CONFIG", default_value = "config/server.toml")]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `SILO_`
/// environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // SILO_CONFIG is just the path, not configuration
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("SILO_") && key != "SILO_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: silod --config /path/to/config.toml\n  \
             2. Environment variables: SILO_SERVER__BIND=0.0.0.0:7445 \
             SILO_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE silod\n\n\
             Set SILO_CONFIG env var to specify a default config file path."
        );
    }

    figment
        .merge(Env::prefixed("SILO_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Periodically delete expired preauth tokens.
fn spawn_preauth_purge(preauth: PreauthService, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match preauth.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Expired preauth tokens purged"),
                Err(e) => tracing::warn!(error = %e, "Preauth purge failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Silo v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    if config.server.links_from_host_header() {
        tracing::warn!(
            "server.api_url is unset: preauth links will use the request Host header, \
             set it to the public URL when clients are untrusted"
        );
    }

    silo_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = silo_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Verify storage connectivity before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let metadata = silo_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    ensure_admin_token(metadata.as_ref(), &config.admin).await?;

    let state = AppState::new(config.clone(), storage, metadata);

    if let Some(interval) = config.preauth.purge_interval() {
        spawn_preauth_purge(state.preauth.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Preauth purge task spawned"
        );
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
