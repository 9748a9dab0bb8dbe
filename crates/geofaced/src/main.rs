use anyhow::{Context, Result};
use geoface_core::gallery::Gallery;
use geoface_core::{ArcFaceSearch, EmbeddingCache, Identifier, SpoofDetector};
use geoface_sync::{HttpFetcher, Synchronizer};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod gallery_sync;
mod http;

use config::Config;
use gallery_sync::GallerySync;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "geofaced starting");

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        gallery = %config.gallery_dir.display(),
        models = %config.model_dir.display(),
        workers = config.workers,
        max_distance = config.max_distance,
        "configuration loaded"
    );

    let gallery = Gallery::open(&config.gallery_dir)
        .with_context(|| format!("opening gallery at {}", config.gallery_dir.display()))?;
    let cache = Arc::new(EmbeddingCache::new());

    // One identifier (and one pair of ONNX sessions) per worker thread
    let spoof = SpoofDetector::default();
    let identifiers = (0..config.workers)
        .map(|_| {
            let search = ArcFaceSearch::load(&config.model_dir, Arc::clone(&cache), config.max_distance);
            Identifier::new(spoof.clone(), search)
        })
        .collect();
    let engine = engine::spawn_engine(identifiers).context("starting engine")?;

    let source = config.record_source().context("configuring record source")?;
    if source.is_none() {
        tracing::warn!("no record source configured; /sync-database is disabled");
    }
    let fetcher = HttpFetcher::new(config.fetch_timeout()).context("building HTTP client")?;
    let sync = Arc::new(GallerySync::new(Synchronizer::new(gallery.clone(), fetcher), source));

    let state = http::AppState {
        engine,
        gallery: Arc::new(RwLock::new(gallery)),
        cache,
        sync,
        identify_timeout: config.identify_timeout(),
    };

    if config.sync_on_startup {
        match state.sync.run(&state.gallery, &state.cache).await {
            Ok(report) => tracing::info!(?report, "startup sync finished"),
            Err(e) => tracing::error!(error = %e, "startup sync failed; serving the existing gallery"),
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "geofaced ready");

    axum::serve(listener, http::router(state, config.max_upload_bytes))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("geofaced shutting down");
    Ok(())
}
