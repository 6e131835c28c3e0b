//! Bounded-parallel periodic thumbnail sweep.
//!
//! Grounded on the original `Thumbnail` class: one round per `interval`,
//! up to `workers` jobs in flight, each racing its FFmpeg child against a
//! per-job timeout and a global stop signal.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use ephyr_log::log;
use tokio::{sync::Mutex, time};

use crate::{
    config::ThumbnailConfig, ffmpeg_cmd, process, providers::ProviderRegistry,
    registry::StreamRegistry,
};

/// Periodic, bounded-parallel thumbnail sweep across every known stream.
pub struct ThumbnailScheduler {
    providers: Arc<ProviderRegistry>,
    registry: Arc<StreamRegistry>,
    ffmpeg_path: PathBuf,
    log_dir: PathBuf,
    cfg: ThumbnailConfig,
    sizes: Vec<(String, String)>,
    /// First-seen failure time per stream id, cleared on success; used to
    /// decide when a persistently-bad stream's stale thumbnails are
    /// unlinked.
    bad_since: Mutex<HashMap<String, Instant>>,
}

impl ThumbnailScheduler {
    /// Creates a scheduler over every stream known to `providers`.
    #[must_use]
    pub fn new(
        providers: Arc<ProviderRegistry>,
        registry: Arc<StreamRegistry>,
        ffmpeg_path: PathBuf,
        log_dir: PathBuf,
        cfg: ThumbnailConfig,
    ) -> Self {
        let sizes = cfg.sizes.clone();
        Self {
            providers,
            registry,
            ffmpeg_path,
            log_dir,
            cfg,
            sizes,
            bad_since: Mutex::new(HashMap::new()),
        }
    }

    /// Runs rounds forever until `stop_rx` fires, waiting `start_after`
    /// before the first one.
    pub async fn run(self: Arc<Self>, mut stop_rx: tokio::sync::watch::Receiver<bool>) {
        tokio::select! {
            () = time::sleep(Duration::from_secs(self.cfg.start_after)) => {}
            _ = stop_rx.changed() => return,
        }

        loop {
            if *stop_rx.borrow() {
                return;
            }
            let started = Instant::now();
            self.run_round(&mut stop_rx).await;
            let elapsed = started.elapsed();

            if *stop_rx.borrow() {
                return;
            }
            let remaining = self.cfg.interval.saturating_sub(elapsed);
            if remaining.is_zero() {
                log::warn!(
                    "Thumbnail round delayed by {:?}",
                    elapsed.saturating_sub(self.cfg.interval),
                );
                continue;
            }
            tokio::select! {
                () = time::sleep(remaining) => {}
                _ = stop_rx.changed() => return,
            }
        }
    }

    async fn run_round(
        self: &Arc<Self>,
        stop_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) {
        let stream_list: Vec<String> = self
            .providers
            .iter()
            .flat_map(|p| p.streams())
            .collect();
        if stream_list.is_empty() {
            return;
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.cfg.workers.max(1)));
        let mut jobs = Vec::with_capacity(stream_list.len());
        for id in &stream_list {
            let this = Arc::clone(self);
            let id = id.clone();
            let permit = Arc::clone(&semaphore);
            let mut stop_rx = stop_rx.clone();
            jobs.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let ok = this.run_one(&id, &mut stop_rx).await;
                (id, ok)
            }));
        }

        let mut errors = Vec::new();
        for job in jobs {
            if let Ok((id, ok)) = job.await {
                if !ok {
                    errors.push(id);
                }
            }
        }

        log::info!(
            "Finished fetching thumbnails: {}/{}",
            stream_list.len() - errors.len(),
            stream_list.len(),
        );
        if !errors.is_empty() {
            log::warn!("Could not fetch: {}", errors.join(", "));
        }

        if !*stop_rx.borrow() {
            self.delete_old_thumbnails(&errors).await;
        }
    }

    /// Runs one stream's thumbnail job, returning `true` on a clean exit.
    async fn run_one(
        &self,
        id: &str,
        stop_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) -> bool {
        let Ok(provider) = self.providers.select(id) else {
            return false;
        };

        let locally_alive = if provider.thumbnail_local() {
            match self.registry.get_stream(id).await {
                Ok(sup) => sup.alive().await,
                Err(_) => false,
            }
        } else {
            false
        };

        let (source, seek) = if locally_alive {
            (provider.local_uri(id), Some(1))
        } else {
            let Ok(origin_uri) = provider.origin_uri(id) else {
                return false;
            };
            (origin_uri, None)
        };

        let base_path = Path::new(&self.cfg.dir).join(id);
        let argv = ffmpeg_cmd::build_thumbnail_cmd(
            &self.cfg.input_opt,
            &source,
            seek,
            &self.cfg.output_opt,
            &self.cfg.resize_opt,
            &base_path.to_string_lossy(),
            &self.cfg.format,
            &self.sizes,
        );

        let spawned =
            process::run(&self.log_dir, id, "thumb", &self.ffmpeg_path, &argv).await;
        let mut handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                log::warn!("{} - cannot spawn thumbnail job: {}", id, e);
                self.mark_bad(id).await;
                return false;
            }
        };

        let status = tokio::select! {
            status = handle.wait() => status.ok(),
            () = time::sleep(self.cfg.timeout) => {
                handle.kill().await;
                None
            }
            _ = stop_rx.changed() => {
                handle.kill().await;
                None
            }
        };

        let ok = status.map(|s| s.success()).unwrap_or(false);
        if ok {
            self.bad_since.lock().await.remove(id);
        } else {
            self.mark_bad(id).await;
        }
        ok
    }

    async fn mark_bad(&self, id: &str) {
        self.bad_since
            .lock()
            .await
            .entry(id.to_string())
            .or_insert_with(Instant::now);
    }

    /// Unlinks every size variant for ids that have been failing for
    /// longer than `delete_after`.
    async fn delete_old_thumbnails(&self, errors: &[String]) {
        let bad_since = self.bad_since.lock().await;
        for id in errors {
            let Some(since) = bad_since.get(id) else {
                continue;
            };
            if since.elapsed() < self.cfg.delete_after {
                continue;
            }
            let base_path = Path::new(&self.cfg.dir).join(id);
            let mut names = vec![String::new()];
            names.extend(self.sizes.iter().map(|(name, _)| format!("-{name}")));
            for suffix in names {
                let path = format!(
                    "{}{}.{}",
                    base_path.to_string_lossy(),
                    suffix,
                    self.cfg.format,
                );
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("Failed to unlink stale thumbnail {}: {}", path, e);
                    }
                }
            }
        }
    }
}
