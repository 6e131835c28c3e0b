//! Per-stream lifecycle engine: reference-counts viewers, owns the
//! transcoder process's lifetime, and arbitrates grace-period shutdown.
//!
//! Grounded on the spawn/respawn loop shape of the teacher's
//! `ffmpeg::Restreamer` (a `tokio::sync::watch` kill channel driving an
//! abortable loop) and on the viewer/process bookkeeping of the original
//! `Stream`/`StreamHTTPClient` classes.

use std::{path::PathBuf, sync::Arc, time::Duration};

use ephyr_log::log;
use tokio::{
    sync::{watch, Mutex},
    time,
};

use crate::{process, providers::Provider, stats::Stats};

struct HttpPseudoClient {
    reset_tx: watch::Sender<u64>,
    _task: tokio::task::JoinHandle<()>,
}

struct Inner {
    rtmp_viewers: u32,
    proc_run: bool,
    has_process: bool,
    http_pseudo_client: Option<HttpPseudoClient>,
}

/// Per-stream state holder and process owner.
pub struct StreamSupervisor {
    /// This stream's id.
    pub id: String,
    ffmpeg_path: PathBuf,
    log_dir: PathBuf,
    reload_timeout: Duration,
    grace_timeout: Duration,
    provider: Arc<dyn Provider>,
    stats: Arc<Stats>,
    inner: Mutex<Inner>,
    kill_tx: watch::Sender<bool>,
}

impl StreamSupervisor {
    /// Creates a supervisor for `id`, initially with no viewers and no
    /// running process.
    #[must_use]
    pub fn new(
        id: String,
        ffmpeg_path: PathBuf,
        log_dir: PathBuf,
        reload_timeout: Duration,
        grace_timeout: Duration,
        provider: Arc<dyn Provider>,
    ) -> Arc<Self> {
        let (kill_tx, _) = watch::channel(false);
        Arc::new(Self {
            id,
            ffmpeg_path,
            log_dir,
            reload_timeout,
            grace_timeout,
            provider,
            stats: Arc::new(Stats::default()),
            inner: Mutex::new(Inner {
                rtmp_viewers: 0,
                proc_run: false,
                has_process: false,
                http_pseudo_client: None,
            }),
            kill_tx,
        })
    }

    /// This stream's statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Current combined client count: RTMP viewers plus one if the HTTP
    /// pseudo-client is active.
    pub async fn clients(&self) -> u32 {
        let inner = self.inner.lock().await;
        inner.rtmp_viewers + u32::from(inner.http_pseudo_client.is_some())
    }

    /// `true` if a process handle is present or one is intended to be
    /// running.
    pub async fn alive(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.has_process || inner.proc_run
    }

    /// Increments the viewer count by `k`, or (if `http_wait` is given)
    /// arms/refreshes the HTTP pseudo-client for that many seconds.
    /// Ensures a transcoder process is running.
    pub async fn inc(self: &Arc<Self>, k: u32, http_wait: Option<u64>) {
        if let Some(timeout) = http_wait {
            self.arm_http_pseudo_client(timeout).await;
        } else {
            let mut inner = self.inner.lock().await;
            inner.rtmp_viewers += k;
        }
        self.ensure_running().await;
    }

    /// Decrements the viewer count (saturating at zero), unless `http` is
    /// set, in which case it clears the HTTP pseudo-client instead.
    /// Triggers a grace-period stop once `clients() == 0`.
    pub async fn dec(self: &Arc<Self>, http: bool) {
        if http {
            let mut inner = self.inner.lock().await;
            inner.http_pseudo_client = None;
        } else {
            let mut inner = self.inner.lock().await;
            inner.rtmp_viewers = inner.rtmp_viewers.saturating_sub(1);
        }
        if self.clients().await == 0 {
            self.proc_stop(false).await;
        }
    }

    /// Stops the transcoder. If `now`, kills immediately; otherwise
    /// declares the intent to stop and schedules a delayed kill that
    /// re-checks whether new viewers arrived in the meantime.
    pub async fn proc_stop(self: &Arc<Self>, now: bool) {
        if now {
            {
                let mut inner = self.inner.lock().await;
                inner.proc_run = false;
            }
            let _ = self.kill_tx.send(true);
            return;
        }

        {
            let mut inner = self.inner.lock().await;
            if !inner.proc_run {
                return;
            }
            inner.proc_run = false;
        }

        let this = Arc::clone(self);
        let _ = tokio::spawn(async move {
            time::sleep(this.grace_timeout).await;
            if this.clients().await == 0 {
                {
                    let mut inner = this.inner.lock().await;
                    inner.proc_run = false;
                }
                let _ = this.kill_tx.send(true);
            } else {
                let mut inner = this.inner.lock().await;
                inner.proc_run = true;
            }
        });
    }

    async fn ensure_running(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if !inner.proc_run && !inner.has_process {
            inner.proc_run = true;
            drop(inner);
            let this = Arc::clone(self);
            let _ = tokio::spawn(async move { this.run_loop().await });
        }
    }

    async fn arm_http_pseudo_client(self: &Arc<Self>, timeout: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = &inner.http_pseudo_client {
            let _ = client.reset_tx.send(timeout);
            return;
        }
        let (reset_tx, reset_rx) = watch::channel(timeout);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            this.http_pseudo_client_loop(reset_rx).await;
        });
        inner.http_pseudo_client = Some(HttpPseudoClient {
            reset_tx,
            _task: task,
        });
    }

    async fn http_pseudo_client_loop(
        self: Arc<Self>,
        mut reset_rx: watch::Receiver<u64>,
    ) {
        loop {
            let timeout = *reset_rx.borrow();
            tokio::select! {
                () = time::sleep(Duration::from_secs(timeout)) => {
                    self.dec(true).await;
                    return;
                }
                changed = reset_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut restarting = false;
        loop {
            let argv = match self.provider.build_cmd(&self.id) {
                Ok(argv) => argv,
                Err(e) => {
                    log::error!(
                        "{} - cannot build transcoder command: {}",
                        self.id,
                        e,
                    );
                    let mut inner = self.inner.lock().await;
                    inner.proc_run = false;
                    return;
                }
            };

            self.stats.started();
            let spawned = process::run(
                &self.log_dir,
                &self.id,
                "fetch",
                &self.ffmpeg_path,
                &argv,
            )
            .await;

            let mut handle = match spawned {
                Ok(h) => h,
                Err(e) => {
                    log::error!(
                        "{} - failed to spawn transcoder: {}",
                        self.id,
                        e,
                    );
                    let mut inner = self.inner.lock().await;
                    inner.proc_run = false;
                    return;
                }
            };

            log::info!(
                "{} - transcoder {} (pid={:?})",
                self.id,
                if restarting { "restarted" } else { "started" },
                handle.pid(),
            );
            {
                let mut inner = self.inner.lock().await;
                inner.has_process = true;
            }

            let mut kill_rx = self.kill_tx.subscribe();
            if *kill_rx.borrow() {
                let _ = self.kill_tx.send(false);
            }
            let died_naturally = tokio::select! {
                status = handle.wait() => {
                    log::debug!("{} - transcoder exited: {:?}", self.id, status);
                    true
                }
                () = wait_for_kill(&mut kill_rx) => {
                    handle.kill().await;
                    false
                }
            };
            let _ = self.kill_tx.send(false);

            {
                let mut inner = self.inner.lock().await;
                inner.has_process = false;
            }

            if !died_naturally {
                log::info!("{} - transcoder stopped", self.id);
                return;
            }

            let proc_run = self.inner.lock().await.proc_run;
            if !proc_run {
                log::info!("{} - transcoder stopped", self.id);
                return;
            }

            self.stats.died();
            log::warn!(
                "{} - transcoder died, respawning in {:?}",
                self.id,
                self.reload_timeout,
            );
            time::sleep(self.reload_timeout).await;

            if !self.inner.lock().await.proc_run {
                return;
            }
            restarting = true;
        }
    }
}

async fn wait_for_kill(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod supervisor_spec {
    use super::*;
    use crate::providers::{Numeric, ProviderConfig};
    use std::time::Duration as StdDuration;

    fn provider() -> Arc<dyn Provider> {
        Arc::new(Numeric::new(
            ProviderConfig {
                identifier: "C".to_string(),
                input_stream_template: "rtsp://cam/{}".to_string(),
                output_stream_template: "rtmp://origin/live/{}".to_string(),
                input_opts: String::new(),
                output_opts: String::new(),
                thumbnail_local: true,
            },
            vec![1],
        ))
    }

    fn supervisor(dir: &std::path::Path) -> Arc<StreamSupervisor> {
        StreamSupervisor::new(
            "C1".to_string(),
            PathBuf::from("/bin/true"),
            dir.to_path_buf(),
            StdDuration::from_millis(50),
            StdDuration::from_millis(50),
            provider(),
        )
    }

    #[tokio::test]
    async fn clients_counts_viewers_and_http_pseudo_client() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.inc(2, None).await;
        assert_eq!(sup.clients().await, 2);
        sup.dec(false).await;
        assert_eq!(sup.clients().await, 1);
    }

    #[tokio::test]
    async fn dec_below_zero_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.dec(false).await;
        assert_eq!(sup.clients().await, 0);
    }

    #[tokio::test]
    async fn inc_spawns_process_and_alive_becomes_true() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.inc(1, None).await;
        time::sleep(StdDuration::from_millis(20)).await;
        assert!(sup.alive().await);
    }

    #[tokio::test]
    async fn proc_stop_now_kills_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.inc(1, None).await;
        time::sleep(StdDuration::from_millis(20)).await;
        sup.proc_stop(true).await;
        time::sleep(StdDuration::from_millis(100)).await;
        assert!(!sup.alive().await);
    }
}
