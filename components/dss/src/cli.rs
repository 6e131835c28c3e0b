//! CLI (command line interface).

use std::{fmt, str::FromStr as _};

use anyhow::anyhow;
use ephyr_log::Level;
use structopt::StructOpt;

/// CLI (command line interface) of the Dynamic Stream Server.
#[derive(Clone, Debug, StructOpt)]
#[structopt(about = "Dynamic Stream Server")]
pub struct Opts {
    /// Debug mode of the server.
    #[structopt(short, long, help = "Enables debug mode")]
    pub debug: bool,

    /// Path to the TOML configuration file.
    #[structopt(
        short,
        long,
        env = "DSS_CONFIG_PATH",
        default_value = "dss",
        help = "Path to the configuration file (without extension)",
        long_help = "Path to the TOML configuration file this server reads \
                     its `[ffmpeg]`, `[thumbnail]`, `[local]`, \
                     `[rtmp-server]`, `[http-server]`, `[mobile]` and \
                     `[general]` sections from"
    )]
    pub config_path: String,

    /// Verbosity level of the server logs.
    #[structopt(
        short,
        long,
        parse(try_from_str = Self::parse_log_level),
        help = "Logs verbosity level: \
                ERROR | WARN | INFO | DEBUG | TRACE"
    )]
    pub verbose: Option<Level>,
}

impl Opts {
    /// Parses CLI [`Opts`] from command line arguments.
    ///
    /// Prints the error message and quits the program in case of failure.
    #[inline]
    #[must_use]
    pub fn from_args() -> Self {
        <Self as StructOpt>::from_args()
    }

    /// Parses [`Level`] from the given string.
    ///
    /// This function is required because [`Level`]'s [`FromStr`]
    /// implementation's error type is not [`Display`], which [`StructOpt`]
    /// requires.
    ///
    /// # Errors
    ///
    /// If [`Level`] failed to parse from the string.
    ///
    /// [`Display`]: std::fmt::Display
    /// [`FromStr`]: std::str::FromStr
    pub fn parse_log_level(lvl: &str) -> Result<Level, anyhow::Error> {
        #[allow(clippy::map_err_ignore)]
        Level::from_str(lvl).map_err(|_| {
            anyhow!(
                "'{}' is invalid verbosity level, allowed levels are: \
                 ERROR | WARN | INFO | DEBUG | TRACE",
                lvl,
            )
        })
    }
}

/// Error type indicating non-zero process exit code. The actual failure
/// was already logged at the point it occurred; this type carries nothing
/// so `main` exits non-zero without printing it again.
pub struct Failure;

impl fmt::Debug for Failure {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "")
    }
}

impl From<()> for Failure {
    #[inline]
    fn from(_: ()) -> Self {
        Self
    }
}

impl From<anyhow::Error> for Failure {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        ephyr_log::log::error!("{}", e);
        Self
    }
}
