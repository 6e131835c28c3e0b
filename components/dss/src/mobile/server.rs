//! Mobile ingest TCP listener.
//!
//! Grounded on the original `mobile/__init__.py`'s `TCPServer`: binds once,
//! accepts connections in a loop, and on shutdown waits for every
//! in-flight session to finish (`MediaHandler.wait_handlers()`) before
//! returning.

use std::{path::PathBuf, sync::Arc};

use ephyr_log::log;
use tokio::{net::TcpListener, sync::watch};

use crate::{broadcast::Broadcaster, config::Config, storage::Store};

/// Accepts mobile ingest connections and spawns one [`super::session::run`]
/// per connection.
pub struct MobileIngestServer {
    cfg: Arc<Config>,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    ffmpeg_path: PathBuf,
    log_dir: PathBuf,
}

impl MobileIngestServer {
    /// Creates a server bound to `cfg.local.addr:cfg.local.tcp_port` once
    /// [`Self::run`] is called.
    #[must_use]
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn Store>,
        broadcaster: Arc<Broadcaster>,
        ffmpeg_path: PathBuf,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            cfg,
            store,
            broadcaster,
            ffmpeg_path,
            log_dir,
        }
    }

    /// Listens and accepts connections until `stop_rx` fires, then waits
    /// for every still-running session to finish before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind itself fails.
    pub async fn run(
        &self,
        mut stop_rx: watch::Receiver<bool>,
    ) -> Result<(), std::io::Error> {
        let addr = format!("{}:{}", self.cfg.local.addr, self.cfg.local.tcp_port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Mobile ingest listening at {} (tcp)", addr);

        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Mobile ingest accept failed: {}", e);
                            continue;
                        }
                    };
                    log::debug!("Mobile ingest connection from {}", peer);

                    let cfg = Arc::clone(&self.cfg);
                    let store = Arc::clone(&self.store);
                    let broadcaster = Arc::clone(&self.broadcaster);
                    let ffmpeg_path = self.ffmpeg_path.clone();
                    let log_dir = self.log_dir.clone();
                    let session_stop_rx = stop_rx.clone();

                    sessions.push(tokio::spawn(super::session::run(
                        socket,
                        cfg,
                        store,
                        broadcaster,
                        ffmpeg_path,
                        log_dir,
                        session_stop_rx,
                    )));
                    sessions.retain(|h: &tokio::task::JoinHandle<()>| !h.is_finished());
                }
            }
        }

        log::info!("Mobile ingest stopping, waiting for {} session(s)", sessions.len());
        for session in sessions {
            let _ = session.await;
        }
        Ok(())
    }
}
