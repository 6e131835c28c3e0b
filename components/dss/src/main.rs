//! Dynamic Stream Server entry point.

mod broadcast;
mod buffer;
mod cli;
mod config;
mod error;
mod ffmpeg_cmd;
mod http;
mod mobile;
mod orchestrator;
mod process;
mod providers;
mod registry;
mod stats;
mod statstree;
mod storage;
mod supervisor;
mod thumbnail;

use cli::{Failure, Opts};
use ephyr_log::log;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Failure> {
    let opts = Opts::from_args();
    ephyr_log::init(opts.verbose);

    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    orchestrator::run(opts, stop_rx).await
}
