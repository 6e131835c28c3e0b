//! HTTP/WebSocket control surface: `/control`, `/stats`, `/info`, and the
//! `/mobile/location` WebSocket feed.
//!
//! One process-wide `actix-web` server, grounded on the route semantics of
//! `original_source/dss/web_handlers/*.py` and shaped the way the
//! teacher's `server/srs_callback.rs`/`server/client.rs` each wrap a
//! single-concern `HttpServer::new(...)` module.

pub mod control;
pub mod info;
pub mod stats;
pub mod ws;

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use ephyr_log::log;
use tokio::sync::watch;

use crate::{
    broadcast::BroadcastRegistry, cli::Failure, config::Config,
    providers::ProviderRegistry, registry::StreamRegistry, storage::Store,
};

/// Shared state every HTTP/WebSocket handler is given access to.
pub struct AppState {
    /// Loaded configuration (timeout clamps, bind address, ...).
    pub cfg: Arc<Config>,
    /// Stream providers, for `/info` catalogs and prefix-wide `/stats`.
    pub providers: Arc<ProviderRegistry>,
    /// Live supervisors, for `/control` and per-stream `/stats`.
    pub registry: Arc<StreamRegistry>,
    /// Mobile session records, for the `/mobile/location` snapshot.
    pub store: Arc<dyn Store>,
    /// Named broadcast channels, for `/mobile/location` updates.
    pub broadcasts: Arc<BroadcastRegistry>,
}

/// Runs the control surface until `stop_rx` fires or the bind fails.
///
/// # Errors
///
/// If the [`HttpServer`] cannot bind (port already in use, etc).
pub async fn run(
    state: Arc<AppState>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(), Failure> {
    let bind = (state.cfg.local.addr.clone(), state.cfg.local.port);
    log::info!("HTTP control surface listening at {}:{} (http)", bind.0, bind.1);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&state)))
            .wrap(middleware::Logger::default())
            .service(control::start)
            .service(control::stop)
            .service(control::http_keepalive)
            .service(control::http_keepalive_default)
            .service(control::publish_start)
            .service(control::publish_stop)
            .service(stats::stats)
            .service(stats::stats_fields)
            .service(info::provider_list)
            .service(info::provider_detail)
            .service(info::stream_detail)
            .service(
                web::resource("/mobile/location").route(web::get().to(ws::location)),
            )
    })
    .bind(bind)
    .map_err(|e| log::error!("Failed to bind HTTP control surface: {}", e))?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        let _ = stop_rx.changed().await;
        handle.stop(true).await;
    });

    server
        .await
        .map_err(|e| log::error!("HTTP control surface stopped: {}", e))?;
    Ok(())
}
