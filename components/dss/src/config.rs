//! Typed configuration loaded from a file via the [`config`] crate.
//!
//! Section layout mirrors the original `.conf` file: `[ffmpeg]`,
//! `[thumbnail]`, `[local]`, `[rtmp-server]`, `[http-server]`, `[mobile]`,
//! `[general]`, `[[providers]]`.

use std::time::Duration;

use config::{Config as RawConfig, ConfigError, Environment, FileFormat};
use serde::Deserialize;
use smart_default::SmartDefault;

/// Top-level typed configuration consumed by the whole crate.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Config {
    /// Transcoder grace-period and respawn timing.
    pub ffmpeg: FfmpegConfig,
    /// Thumbnail scheduler tuning.
    pub thumbnail: ThumbnailConfig,
    /// Local server bind addresses and HTTP pseudo-client timeouts.
    pub local: LocalConfig,
    /// Upstream RTMP origin this process republishes into.
    #[serde(rename = "rtmp-server")]
    pub rtmp_server: RtmpServerConfig,
    /// Upstream RTMP origin's statistics/control endpoints.
    #[serde(rename = "http-server")]
    pub http_server: HttpServerConfig,
    /// Mobile ingest server tuning.
    pub mobile: MobileConfig,
    /// Startup auto-start behavior.
    pub general: GeneralConfig,
    /// Declarative provider definitions, one `[[providers]]` table per
    /// prefix.
    pub providers: Vec<ProviderEntry>,
}

/// One `[[providers]]` table: enough to build a single
/// [`crate::providers::Numeric`] or [`crate::providers::Named`] provider.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ProviderEntry {
    /// Alphabetic prefix this provider is registered under, e.g. `"C"`.
    pub identifier: String,
    /// Input URI template; `{}` is replaced with the resolved origin name.
    pub input_stream_template: String,
    /// Output URI template; `{}` is replaced with the stream id.
    pub output_stream_template: String,
    /// Extra FFmpeg input options.
    pub input_opt: String,
    /// Extra FFmpeg output options.
    pub output_opt: String,
    /// Whether thumbnails may be taken from the local republish once
    /// alive, instead of from the origin.
    #[default(true)]
    pub thumbnail_local: bool,
    /// Named origin stream list; when non-empty this provider is
    /// [`crate::providers::Named`] indexed by position, otherwise it's
    /// [`crate::providers::Numeric`] over `stream_count` bare indices.
    pub stream_names: Vec<String>,
    /// Stream count for a [`crate::providers::Numeric`] provider; unused
    /// when `stream_names` is non-empty.
    #[default(0)]
    pub stream_count: u32,
}

/// `[ffmpeg]` section.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Path to the FFmpeg (or compatible) binary.
    #[default = "/usr/bin/ffmpeg"]
    pub path: String,
    /// Grace-period, in seconds, between the last viewer leaving and the
    /// transcoder being killed.
    #[default(Duration::from_secs(10))]
    #[serde(with = "serde_humantime")]
    pub timeout: Duration,
    /// Delay, in seconds, before respawning after an unexpected death.
    #[default(Duration::from_secs(2))]
    #[serde(with = "serde_humantime")]
    pub reload: Duration,
}

/// `[thumbnail]` section.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Wall-clock period between thumbnail rounds.
    #[default(Duration::from_secs(60))]
    #[serde(with = "serde_humantime")]
    pub interval: Duration,
    /// Maximum number of thumbnail jobs running in parallel.
    #[default(4)]
    pub workers: usize,
    /// Per-job timeout before a thumbnail FFmpeg is killed.
    #[default(Duration::from_secs(20))]
    #[serde(with = "serde_humantime")]
    pub timeout: Duration,
    /// Age after which a persistently-failing stream's old thumbnails are
    /// unlinked.
    #[default(Duration::from_secs(3600))]
    #[serde(with = "serde_humantime")]
    pub delete_after: Duration,
    /// `name:scale` resize variants produced alongside the base thumbnail.
    pub sizes: Vec<(String, String)>,
    /// Extra FFmpeg input options for thumbnail jobs.
    pub input_opt: String,
    /// Extra FFmpeg output options for thumbnail jobs.
    pub output_opt: String,
    /// FFmpeg scale filter template for resize variants (`{scale}`
    /// substituted).
    pub resize_opt: String,
    /// Directory thumbnail images are written to.
    #[default = "/tmp/dss/thumbnails"]
    pub dir: String,
    /// Image format/extension (e.g. `"jpg"`).
    #[default = "jpg"]
    pub format: String,
    /// Seconds after process start before the first thumbnail is taken.
    #[default(5)]
    pub start_after: u64,
    /// Interval, in seconds, between mobile-stream thumbnail frames.
    #[default(10)]
    pub mobile_interval: u64,
}

/// `[local]` section.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct LocalConfig {
    /// HTTP control surface bind address.
    #[default = "0.0.0.0"]
    pub addr: String,
    /// HTTP control surface bind port.
    #[default(8080)]
    pub port: u16,
    /// Mobile ingest TCP server bind port.
    #[default(8081)]
    pub tcp_port: u16,
    /// Default HTTP pseudo-client wait, in seconds.
    #[default(10)]
    pub http_client_timeout: u64,
    /// Minimum allowed HTTP pseudo-client wait, in seconds.
    #[default(5)]
    pub http_client_timeout_min: u64,
    /// Maximum allowed HTTP pseudo-client wait, in seconds.
    #[default(60)]
    pub http_client_timeout_max: u64,
}

/// `[rtmp-server]` section: the local RTMP origin this process publishes
/// into.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct RtmpServerConfig {
    /// Base RTMP address, e.g. `"rtmp://127.0.0.1"`.
    #[default = "rtmp://127.0.0.1"]
    pub addr: String,
    /// Application name streams are published under.
    #[default = "live"]
    pub app: String,
}

/// `[http-server]` section: the upstream RTMP server's HTTP-exposed
/// statistics and control endpoints, consumed during bootstrap.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Base address of the upstream server's HTTP API.
    #[default = "http://127.0.0.1:8080"]
    pub addr: String,
    /// Path of the statistics endpoint returning the stats XML document.
    #[default = "/stat"]
    pub stat_url: String,
    /// Path of the control endpoint (unused by this crate; kept for shape
    /// parity with the upstream server's own API).
    #[default = "/control"]
    pub control_url: String,
}

/// `[mobile]` section.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct MobileConfig {
    /// Maximum session duration, in seconds; `0` disables the limit.
    #[default(0)]
    pub time_limit: u64,
    /// Base directory mobile session temp dirs and FIFOs are created
    /// under.
    #[default = "/tmp/dss/mobile"]
    pub dir: String,
}

/// `[general]` section.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct GeneralConfig {
    /// Stream ids to auto-start on boot.
    pub auto_start: Vec<String>,
    /// Provider prefixes whose entire stream list should auto-start on
    /// boot.
    pub auto_start_provider: Vec<String>,
}

impl Config {
    /// Loads configuration by merging, in order: built-in defaults, the
    /// file at `path` (if present), then environment variables prefixed
    /// with `DSS_` (e.g. `DSS_LOCAL.PORT`).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed or the merged
    /// result doesn't deserialize into [`Config`].
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::new();
        raw.merge(
            config::File::with_name(path)
                .format(FileFormat::Toml)
                .required(false),
        )?
        .merge(Environment::with_prefix("DSS").separator("_"))?;

        raw.try_into()
    }
}

#[cfg(test)]
mod config_spec {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert!(cfg.local.http_client_timeout_min <= cfg.local.http_client_timeout);
        assert!(cfg.local.http_client_timeout <= cfg.local.http_client_timeout_max);
        assert_eq!(cfg.rtmp_server.app, "live");
    }

    #[test]
    fn loading_a_missing_file_falls_back_to_defaults() {
        let cfg = Config::from_file("/no/such/dss-config-file").unwrap();
        assert_eq!(cfg.thumbnail.format, "jpg");
    }
}
