//! Daemon lifecycle: open store and library, load the key, serve HTTP

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info, warn};

use tmb_core::config::TmbConfig;
use tmb_crypto::{ChunkedCipher, VideoKey};
use tmb_ingest::{VideoIngest, VideoLibrary};
use tmb_store::{EntityStore, JsonStore};

use crate::api::{self, AppState};
use crate::metrics::IngestMetrics;

pub async fn run(config: TmbConfig) -> Result<()> {
    info!("daemon starting");

    let secret = config.videos.secret_key.as_ref().context(
        "no video secret configured: set videos.secret_key or TINYMOTION_VIDEO_SECRET_KEY",
    )?;
    let key = VideoKey::from_base64(secret).context("loading video secret")?;
    let cipher = ChunkedCipher::new(key, config.videos.chunk_size_bytes)?;

    let store: Arc<dyn EntityStore> = Arc::new(
        JsonStore::open(&config.store.db_path)
            .with_context(|| format!("opening store {}", config.store.db_path.display()))?,
    );
    info!(path = %config.store.db_path.display(), "store opened");

    let library = VideoLibrary::open(&config.videos.library_path)
        .await
        .with_context(|| {
            format!(
                "opening video library {}",
                config.videos.library_path.display()
            )
        })?;
    if let Err(e) = library.check_writable().await {
        warn!(path = %library.root().display(), "video library not writable: {e}");
    }
    info!(
        path = %library.root().display(),
        chunk_size = cipher.chunk_size(),
        "video library ready"
    );

    let mut registry = Registry::default();
    let metrics = IngestMetrics::new(&mut registry);

    let state = AppState {
        ingest: Arc::new(VideoIngest::new(store, library, cipher)),
        metrics,
        registry: Arc::new(registry),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;
    info!(addr = %config.daemon.listen, "HTTP: listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server")?;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
