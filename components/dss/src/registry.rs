//! Process-wide map of stream id to [`StreamSupervisor`], with bootstrap
//! from the upstream RTMP server's statistics.
//!
//! Grounded on the original `Video` class: a lazily-populated map guarded
//! by a single lock, plus `initialize_from_stats`/`auto_start`.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use ephyr_log::log;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    config::Config,
    error::{StatFetchFailure, UnknownStream},
    providers::ProviderRegistry,
    supervisor::StreamSupervisor,
};

/// Process-wide registry of active [`StreamSupervisor`]s, created lazily
/// on first reference to a given id.
pub struct StreamRegistry {
    providers: Arc<ProviderRegistry>,
    streams: Mutex<HashMap<String, Arc<StreamSupervisor>>>,
    ffmpeg_path: PathBuf,
    log_dir: PathBuf,
    reload_timeout: Duration,
    grace_timeout: Duration,
    /// Whether new streams may still be started; flipped to `false` during
    /// shutdown so no more supervisors spring up after `terminate_all`.
    running: Mutex<bool>,
}

impl StreamRegistry {
    /// Creates an empty registry bound to the given provider set and
    /// process-spawning configuration.
    #[must_use]
    pub fn new(
        providers: Arc<ProviderRegistry>,
        ffmpeg_path: PathBuf,
        log_dir: PathBuf,
        reload_timeout: Duration,
        grace_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            streams: Mutex::new(HashMap::new()),
            ffmpeg_path,
            log_dir,
            reload_timeout,
            grace_timeout,
            running: Mutex::new(true),
        }
    }

    /// Returns the supervisor for `id`, lazily creating it via its
    /// provider's registration.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id`'s prefix has no registered
    /// provider.
    pub async fn get_stream(
        &self,
        id: &str,
    ) -> Result<Arc<StreamSupervisor>, UnknownStream> {
        if let Some(existing) = self.streams.lock().await.get(id) {
            return Ok(Arc::clone(existing));
        }

        let provider = self.providers.select(id)?;
        // Validate the id is actually in range for its provider before
        // creating a supervisor for it.
        provider.get_origin_id(id)?;

        let mut streams = self.streams.lock().await;
        let supervisor = Arc::clone(streams.entry(id.to_string()).or_insert_with(|| {
            StreamSupervisor::new(
                id.to_string(),
                self.ffmpeg_path.clone(),
                self.log_dir.clone(),
                self.reload_timeout,
                self.grace_timeout,
                provider,
            )
        }));
        Ok(supervisor)
    }

    /// Starts (or ref-counts) `id`, optionally as an HTTP pseudo-client
    /// wait of `http_wait` seconds instead of an RTMP viewer increment.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id` is unknown, or does nothing if
    /// the registry has been shut down.
    pub async fn start(
        &self,
        id: &str,
        increment: u32,
        http_wait: Option<u64>,
    ) -> Result<(), UnknownStream> {
        if !*self.running.lock().await {
            return Ok(());
        }
        let supervisor = self.get_stream(id).await?;
        supervisor.inc(increment, http_wait).await;
        Ok(())
    }

    /// Decrements `id`'s viewer count.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id` is unknown.
    pub async fn stop(&self, id: &str) -> Result<(), UnknownStream> {
        let supervisor = self.get_stream(id).await?;
        supervisor.dec(false).await;
        Ok(())
    }

    /// Fetches the upstream RTMP server's statistics and pre-populates
    /// supervisors for streams that already have subscribed viewers.
    ///
    /// Any individual unknown stream name is warned about and skipped so a
    /// stale upstream report doesn't abort the whole bootstrap.
    ///
    /// # Errors
    ///
    /// Returns [`StatFetchFailure`] if the upstream stats endpoint could
    /// not be fetched; the server still starts in that case.
    pub async fn initialize_from_stats(
        &self,
        cfg: &Config,
    ) -> Result<(), StatFetchFailure> {
        let url =
            format!("{}{}", cfg.http_server.addr, cfg.http_server.stat_url);
        let stats = fetch_stats(&url)
            .await
            .map_err(|e| StatFetchFailure(e.to_string()))?;

        let app = &cfg.rtmp_server.app;
        let Some(application) = stats
            .get("server")
            .and_then(|s| s.get("application"))
            .map(as_value_list)
            .and_then(|apps| {
                apps.into_iter().find(|a| {
                    a.get("name").and_then(Value::as_str) == Some(app.as_str())
                })
            })
        else {
            return Ok(());
        };
        let streams = application
            .get("live")
            .and_then(|l| l.get("stream"))
            .map(as_value_list)
            .unwrap_or_default();

        for stream in streams {
            let Some(name) = stream.get("name").and_then(Value::as_str) else {
                continue;
            };
            let nclients = stream
                .get("nclients")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .or_else(|| stream.get("nclients").and_then(Value::as_i64))
                .unwrap_or(0);
            let publishing = stream.get("publishing").is_some();
            let effective = if publishing { nclients - 1 } else { nclients };
            if effective <= 0 {
                continue;
            }
            if let Err(e) = self.start(name, effective as u32, None).await {
                log::warn!("Invalid stream name in upstream stats: {}", e);
            }
        }
        Ok(())
    }

    /// Auto-starts ids and provider-wide stream lists named in
    /// `[general]`.
    pub async fn auto_start(&self, cfg: &Config) {
        for id in &cfg.general.auto_start {
            if let Err(e) = self.start(id, 1, None).await {
                log::warn!("Cannot auto-start {}: {}", id, e);
            }
        }
        for prefix in &cfg.general.auto_start_provider {
            let Some(provider) = self.providers.by_prefix(prefix) else {
                log::warn!("Unknown auto-start provider: {}", prefix);
                continue;
            };
            for id in provider.streams() {
                if let Err(e) = self.start(&id, 1, None).await {
                    log::warn!("Cannot auto-start {}: {}", id, e);
                }
            }
        }
    }

    /// Stops accepting new starts and immediately kills every known
    /// supervisor's process, for orderly shutdown.
    pub async fn terminate_all(&self) {
        *self.running.lock().await = false;
        let streams = self.streams.lock().await;
        for supervisor in streams.values() {
            supervisor.proc_stop(true).await;
        }
    }
}

async fn fetch_stats(url: &str) -> Result<Value, anyhow::Error> {
    let body = reqwest::get(url).await?.text().await?;
    crate::statstree::parse(&body)
}

/// A `noxml`-folded [`Value`] collapses a single child to itself rather
/// than a one-element array; this re-expands whichever shape it took so
/// callers can iterate uniformly.
fn as_value_list(v: &Value) -> Vec<&Value> {
    match v {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
