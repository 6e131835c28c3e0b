//! Per-connection mobile session state machine.
//!
//! Grounded on `original_source/dss/mobile/handler.py`'s `MediaHandler`
//! (handshake / setup / spawn / loop / teardown) and its
//! `processing/{media,data}.py` pump and control-frame workers.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::Utc;
use ephyr_log::log;
use interprocess::os::unix::fifo_file::create_fifo;
use nix::fcntl::{fcntl, FcntlArg};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    net::{unix::pipe, TcpStream},
    sync::{mpsc, watch, Notify},
    time,
};

use crate::{
    broadcast::Broadcaster,
    buffer::FramedBuffer,
    config::Config,
    error::ProtocolError,
    ffmpeg_cmd, process,
    storage::{PositionSample, Store},
};

use super::{ContentType, QUEUE_LIMIT, WAIT_TIMEOUT};

/// Maximum value accepted by `F_SETPIPE_SZ` on stock Linux kernels absent
/// a raised `/proc/sys/fs/pipe-max-size`.
const PIPE_MAX_SIZE: i32 = 1_048_576;

/// Runs one mobile session end to end. All failures are logged and
/// absorbed; the caller only learns the connection ended.
pub async fn run(
    socket: TcpStream,
    cfg: Arc<Config>,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    ffmpeg_path: PathBuf,
    log_dir: PathBuf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = tokio::io::split(socket);
    let mut framed = FramedBuffer::new(read_half, 8192);

    let first = match time::timeout(WAIT_TIMEOUT, framed.read_frame()).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => {
            log::warn!("Mobile handshake failed: {}", e);
            return;
        }
        Err(_) => {
            log::warn!("Mobile handshake timed out");
            return;
        }
    };

    if ContentType::from_byte(first.kind) != Some(ContentType::Metadata) {
        log::warn!(
            "Received first data block of type {}. Expected metadata",
            first.kind,
        );
        return;
    }

    let requested_id = decode_json(&first.payload)
        .ok()
        .and_then(|v| v.get("content").and_then(|c| c.get("id")).cloned())
        .and_then(|v| v.as_str().map(str::to_string));

    let record = store.upsert_mobile(requested_id.as_deref()).await;
    let id = record.id.clone();
    let stream_name = super::stream_name(&id);

    if let Err(e) = write_half
        .write_all(&encode_metadata("meta", json!({ "id": id })))
        .await
    {
        log::warn!("{} - failed to send handshake reply: {}", stream_name, e);
        store.deactivate_mobile(&id).await;
        return;
    }

    let mut session = match Session::setup(
        &cfg,
        id.clone(),
        stream_name.clone(),
        ffmpeg_path,
        log_dir,
        Arc::clone(&store),
        Arc::clone(&broadcaster),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            log::warn!("{} - failed to set up session: {}", stream_name, e);
            store.deactivate_mobile(&id).await;
            return;
        }
    };

    log::info!("New mobile stream: {}", session.destination);

    session
        .run_loop(&mut framed, &mut shutdown_rx)
        .await;

    session.teardown(&store, &broadcaster).await;
}

fn decode_json(payload: &[u8]) -> Result<Value, ProtocolError> {
    serde_json::from_slice(payload)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn encode_metadata(kind: &str, content: Value) -> Vec<u8> {
    let body = serde_json::to_vec(&json!({ "type": kind, "content": content }))
        .unwrap_or_default();
    crate::buffer::Frame {
        kind: ContentType::Metadata.as_byte(),
        payload: body,
    }
    .encode()
}

struct Session {
    id: String,
    stream_name: String,
    tmpdir: PathBuf,
    thumbnail_path: PathBuf,
    destination: String,
    audio_tx: mpsc::Sender<Vec<u8>>,
    video_tx: mpsc::Sender<Vec<u8>>,
    data_tx: mpsc::UnboundedSender<Value>,
    muxer: process::ProcessHandle,
    error: Arc<AtomicBool>,
    notify: Arc<Notify>,
    time_limit: Option<tokio::time::Duration>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Session {
    async fn setup(
        cfg: &Config,
        id: String,
        stream_name: String,
        ffmpeg_path: PathBuf,
        log_dir: PathBuf,
        store: Arc<dyn Store>,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<Self, anyhow::Error> {
        let destination = format!(
            "{}/{}/{}",
            cfg.rtmp_server.addr.trim_end_matches('/'),
            cfg.rtmp_server.app,
            stream_name,
        );
        let thumbnail_path = PathBuf::from(&cfg.thumbnail.dir)
            .join(format!("{}.{}", stream_name, cfg.thumbnail.format));

        let tmpdir = PathBuf::from(&cfg.mobile.dir).join(crate::storage::new_object_id());
        tokio::fs::create_dir_all(&tmpdir).await?;

        let audio_path = tmpdir.join("audio.ts");
        let video_path = tmpdir.join("video.ts");
        let audio_sender = open_fifo_sender(&audio_path).await?;
        let video_sender = open_fifo_sender(&video_path).await?;

        let (audio_tx, audio_rx) = mpsc::channel(QUEUE_LIMIT);
        let (video_tx, video_rx) = mpsc::channel(QUEUE_LIMIT);
        let (data_tx, data_rx) = mpsc::unbounded_channel();

        let error = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let thumb_rate = if cfg.thumbnail.mobile_interval == 0 {
            1.0
        } else {
            1.0 / cfg.thumbnail.mobile_interval as f64
        };
        let argv = ffmpeg_cmd::build_cmd_multi(
            "-y -re",
            &[
                audio_path.to_string_lossy().into_owned(),
                video_path.to_string_lossy().into_owned(),
            ],
            "",
            &[
                (
                    "-c:v copy -c:a copy -bsf:a aac_adtstoasc -f flv".to_string(),
                    destination.clone(),
                ),
                (
                    format!("-r {thumb_rate} -update 1 -an"),
                    thumbnail_path.to_string_lossy().into_owned(),
                ),
            ],
        );

        let muxer = process::run(&log_dir, &stream_name, "mobile", &ffmpeg_path, &argv).await?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_pump(
            "audio",
            audio_rx,
            audio_sender,
            Arc::clone(&error),
            Arc::clone(&notify),
        )));
        tasks.push(tokio::spawn(run_pump(
            "video",
            video_rx,
            video_sender,
            Arc::clone(&error),
            Arc::clone(&notify),
        )));

        Ok(Self {
            id: id.clone(),
            stream_name: stream_name.clone(),
            tmpdir,
            thumbnail_path,
            destination,
            audio_tx,
            video_tx,
            data_tx,
            muxer,
            error,
            notify,
            time_limit: (cfg.mobile.time_limit > 0)
                .then(|| tokio::time::Duration::from_secs(cfg.mobile.time_limit)),
            tasks: {
                tasks.push(tokio::spawn(run_data_proc(
                    data_rx, id, stream_name, store, broadcaster,
                )));
                tasks
            },
        })
    }

    async fn run_loop(
        &mut self,
        framed: &mut FramedBuffer<ReadHalf<TcpStream>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let deadline = self
            .time_limit
            .map(|d| tokio::time::Instant::now() + d);

        loop {
            let sleep = async {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    log::info!("{} - server shutdown", self.stream_name);
                    return;
                }
                () = sleep => {
                    log::info!(
                        "{} - stream finished due to time limit",
                        self.stream_name,
                    );
                    return;
                }
                () = self.notify.notified() => {
                    if self.error.load(Ordering::SeqCst) {
                        log::warn!("{} - session aborted on error", self.stream_name);
                        return;
                    }
                }
                status = self.muxer.wait() => {
                    log::info!("{} - muxer exited: {:?}", self.stream_name, status);
                    return;
                }
                frame = framed.read_frame() => {
                    let frame = match frame {
                        Ok(f) => f,
                        Err(e) => {
                            log::debug!("{} - {}", self.stream_name, e);
                            return;
                        }
                    };
                    if !self.route(frame).await {
                        return;
                    }
                }
            }
        }
    }

    async fn route(&self, frame: crate::buffer::Frame) -> bool {
        match ContentType::from_byte(frame.kind) {
            Some(ContentType::Video) => {
                if self.video_tx.try_send(frame.payload).is_err() {
                    log::warn!("{} - backpressure on video queue", self.stream_name);
                    self.error.store(true, Ordering::SeqCst);
                    self.notify.notify_one();
                    return false;
                }
            }
            Some(ContentType::Audio) => {
                if self.audio_tx.try_send(frame.payload).is_err() {
                    log::warn!("{} - backpressure on audio queue", self.stream_name);
                    self.error.store(true, Ordering::SeqCst);
                    self.notify.notify_one();
                    return false;
                }
            }
            Some(ContentType::Metadata) | Some(ContentType::UserData) => {
                match decode_json(&frame.payload) {
                    Ok(v) => {
                        let _ = self.data_tx.send(v);
                    }
                    Err(e) => log::warn!("{} - {}", self.stream_name, e),
                }
            }
            None => {
                log::warn!(
                    "{} - unknown content received (type {})",
                    self.stream_name,
                    frame.kind,
                );
            }
        }
        true
    }

    async fn teardown(mut self, store: &Arc<dyn Store>, broadcaster: &Broadcaster) {
        self.muxer.kill().await;

        drop(self.audio_tx);
        drop(self.video_tx);
        drop(self.data_tx);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        store.deactivate_mobile(&self.id).await;

        let mut errors = Vec::new();
        if let Err(e) = tokio::fs::remove_dir_all(&self.tmpdir).await {
            errors.push(format!("remove tmpdir: {e}"));
        }
        if let Err(e) = tokio::fs::remove_file(&self.thumbnail_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                errors.push(format!("remove thumbnail: {e}"));
            }
        }
        if !errors.is_empty() {
            log::warn!("{} - errors during cleanup: {}", self.stream_name, errors.join(", "));
        }

        broadcaster.broadcast(
            "update",
            json!({ "name": self.stream_name, "info": "finished" }),
        );
        log::info!("Mobile stream \"{}\" has ended", self.id);
    }
}

async fn run_pump(
    name: &'static str,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut sink: pipe::Sender,
    error: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    loop {
        let chunk = match time::timeout(WAIT_TIMEOUT, rx.recv()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(_) => {
                log::warn!("Low bandwidth: {}", name);
                error.store(true, Ordering::SeqCst);
                notify.notify_one();
                break;
            }
        };
        if let Err(e) = sink.write_all(&chunk).await {
            log::debug!("{} pipe write stopped: {}", name, e);
            break;
        }
    }
}

async fn run_data_proc(
    mut rx: mpsc::UnboundedReceiver<Value>,
    id: String,
    stream_name: String,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
) {
    while let Some(v) = rx.recv().await {
        let Some(action) = v.get("type").and_then(Value::as_str) else {
            log::debug!("{} - metadata: {:?}", stream_name, v);
            continue;
        };
        if action != "coord" {
            continue;
        }
        let Some(content) = v.get("content") else { continue };
        let sample = PositionSample {
            time: Utc::now(),
            coord: content.clone(),
        };
        store.push_position(&id, sample.clone()).await;

        broadcaster.broadcast(
            "update",
            json!({
                "name": stream_name,
                "info": { "time": sample.time, "coord": sample.coord },
            }),
        );
        log::debug!("{} - {} | {:?}", stream_name, sample.time, sample.coord);
    }
}

/// Opens a FIFO for writing without blocking, by briefly holding our own
/// reader open first (mirrors the original's `O_RDWR` trick of opening
/// both ends in-process so neither open call blocks on a peer).
async fn open_fifo_sender(path: &std::path::Path) -> Result<pipe::Sender, anyhow::Error> {
    create_fifo(path, 0o660)?;

    let placeholder_reader = pipe::OpenOptions::new().open_receiver(path)?;
    let sender = pipe::OpenOptions::new().open_sender(path)?;
    drop(placeholder_reader);

    set_pipe_max_size(&sender);
    Ok(sender)
}

#[cfg(target_os = "linux")]
fn set_pipe_max_size(sender: &pipe::Sender) {
    use std::os::unix::io::AsRawFd;
    if let Err(e) = fcntl(sender.as_raw_fd(), FcntlArg::F_SETPIPE_SZ(PIPE_MAX_SIZE)) {
        log::debug!("Could not raise pipe size: {}", e);
    }
}

#[cfg(not(target_os = "linux"))]
fn set_pipe_max_size(_sender: &pipe::Sender) {}
