use anyhow::{Context, Result};
use pulsemon_server::app;
use pulsemon_server::config::ServerConfig;
use pulsemon_server::state::AppState;
use pulsemon_storage::backend::Backend;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1);
    let mut config = ServerConfig::resolve(config_path.as_deref(), "config/server.toml")?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;

    tracing::info!(
        address = %config.address,
        store_interval_secs = config.store_interval_secs,
        restore = config.restore,
        signed = config.hash_key.is_some(),
        "pulsemon-server starting"
    );

    let backend = Backend::open(&config.storage_settings())
        .await
        .context("opening storage")?;

    let shutdown = CancellationToken::new();
    let flusher = backend
        .mirror()
        .map(|mirror| tokio::spawn(mirror.run_flusher(shutdown.clone())));

    let address = config.address.clone();
    let state = AppState::new(&backend, config);
    let router = app::build_http_app(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    tracing::info!(addr = %address, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    shutdown.cancel();
    if let Some(flusher) = flusher {
        flusher.await?;
    }

    Ok(())
}
