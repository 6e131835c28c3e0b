//! Wires every component together and sequences startup/shutdown.
//!
//! Grounded on the teacher's top-level `server::run`: builds the shared
//! state once, starts every long-running piece concurrently via
//! `future::try_join`, and tears them down in response to a single
//! shutdown signal broadcast through a [`tokio::sync::watch`] channel.

use std::{path::PathBuf, sync::Arc};

use ephyr_log::log;
use futures::future;
use tokio::sync::watch;

use crate::{
    broadcast::BroadcastRegistry,
    cli::{Failure, Opts},
    config::Config,
    http,
    mobile::MobileIngestServer,
    providers::{Named, Numeric, ProviderConfig, ProviderRegistry},
    registry::StreamRegistry,
    storage::{MemoryStore, Store},
    thumbnail::ThumbnailScheduler,
};

/// Builds every `[[providers]]` entry from `cfg` and registers it.
fn build_providers(cfg: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for entry in &cfg.providers {
        let provider_cfg = ProviderConfig {
            identifier: entry.identifier.clone(),
            input_stream_template: entry.input_stream_template.clone(),
            output_stream_template: entry.output_stream_template.clone(),
            input_opts: entry.input_opt.clone(),
            output_opts: entry.output_opt.clone(),
            thumbnail_local: entry.thumbnail_local,
        };
        if entry.stream_names.is_empty() {
            registry.register(Arc::new(Numeric::new(
                provider_cfg,
                (0..entry.stream_count).collect(),
            )));
        } else {
            registry.register(Arc::new(Named::new(
                provider_cfg,
                entry.stream_names.clone(),
            )));
        }
    }
    registry
}

/// Runs the whole server until `stop_rx` fires, then drains every
/// component in turn.
///
/// # Errors
///
/// If the HTTP control surface or the mobile TCP listener fail to bind.
pub async fn run(opts: Opts, stop_rx: watch::Receiver<bool>) -> Result<(), Failure> {
    let cfg = Arc::new(
        Config::from_file(&opts.config_path)
            .map_err(|e| log::error!("Failed to load configuration: {}", e))?,
    );

    let ffmpeg_path = tokio::fs::canonicalize(&cfg.ffmpeg.path)
        .await
        .map_err(|e| log::error!("Failed to resolve FFmpeg binary path: {}", e))?;
    let log_dir = PathBuf::from("/var/log/dss");
    tokio::fs::create_dir_all(&log_dir)
        .await
        .map_err(|e| log::error!("Failed to create log directory: {}", e))?;

    let providers = Arc::new(build_providers(&cfg));
    let registry = Arc::new(StreamRegistry::new(
        Arc::clone(&providers),
        ffmpeg_path.clone(),
        log_dir.clone(),
        cfg.ffmpeg.reload,
        cfg.ffmpeg.timeout,
    ));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let broadcasts = Arc::new(BroadcastRegistry::new());
    broadcasts.register("mobile_location").await;
    let broadcaster = broadcasts
        .select("mobile_location")
        .await
        .expect("just registered");

    if let Err(e) = registry.initialize_from_stats(&cfg).await {
        log::warn!("Could not fetch upstream stats on startup: {}", e);
    }
    registry.auto_start(&cfg).await;

    let thumbnails = Arc::new(ThumbnailScheduler::new(
        Arc::clone(&providers),
        Arc::clone(&registry),
        ffmpeg_path.clone(),
        log_dir.clone(),
        cfg.thumbnail.clone(),
    ));

    let mobile_server = MobileIngestServer::new(
        Arc::clone(&cfg),
        Arc::clone(&store),
        Arc::clone(&broadcaster),
        ffmpeg_path,
        log_dir,
    );

    let app_state = Arc::new(http::AppState {
        cfg: Arc::clone(&cfg),
        providers: Arc::clone(&providers),
        registry: Arc::clone(&registry),
        store: Arc::clone(&store),
        broadcasts: Arc::clone(&broadcasts),
    });

    let thumbnail_stop = stop_rx.clone();
    let mobile_stop = stop_rx.clone();
    let http_stop = stop_rx.clone();

    let result = future::try_join3(
        async move {
            thumbnails.run(thumbnail_stop).await;
            Ok::<(), Failure>(())
        },
        async move {
            mobile_server.run(mobile_stop).await.map_err(|e| {
                log::error!("Mobile ingest server stopped: {}", e);
                Failure
            })
        },
        http::run(app_state, http_stop),
    )
    .await;

    registry.terminate_all().await;

    result.map(|_: ((), (), ())| ())
}
