//! Error kinds shared by the supervisor, mobile ingest, and HTTP layers.
//!
//! Each kind maps to the propagation policy of the control surface: most
//! are logged and absorbed at the point they occur, a few are translated
//! into HTTP status codes by the handlers in [`crate::http`].

use derive_more::{Display, Error};

/// A child process could not be spawned (binary missing, permissions, ...).
#[derive(Clone, Debug, Display, Error)]
#[display(fmt = "failed to spawn `{}`: {}", program, message)]
pub struct SpawnError {
    /// Path or name of the program that failed to start.
    pub program: String,
    /// Underlying OS error message.
    pub message: String,
}

/// A stream id did not resolve to a known [`Provider`][1] or was out of
/// range for its provider.
///
/// [1]: crate::providers::Provider
#[derive(Clone, Debug, Display, Error)]
#[display(fmt = "unknown stream id: {}", _0)]
pub struct UnknownStream(#[error(not(source))] pub String);

/// The mobile ingest wire protocol was violated by the peer.
#[derive(Clone, Debug, Display, Error)]
pub enum ProtocolError {
    /// The connection closed with a partial frame still buffered.
    #[display(fmt = "socket closed mid-frame")]
    SocketClosed,

    /// The first frame of a session was not a metadata frame.
    #[display(fmt = "first frame must be metadata, got type {}", _0)]
    NotMetadata(u8),

    /// A metadata/userdata payload was not valid UTF-8 JSON.
    #[display(fmt = "malformed metadata payload: {}", _0)]
    MalformedPayload(String),

    /// The handshake frame carried an unexpected content type.
    #[display(fmt = "unknown frame type {}", _0)]
    UnknownFrameType(u8),
}

/// A mobile session's media queue could not keep up with its consumer.
#[derive(Clone, Debug, Display, Error)]
#[display(fmt = "backpressure on {} queue of stream {}", queue, stream_id)]
pub struct Backpressure {
    /// Which queue overflowed (`"audio"`, `"video"`, `"data"`).
    pub queue: &'static str,
    /// The mobile session's assigned id.
    pub stream_id: String,
}

/// The upstream RTMP server's statistics endpoint could not be reached
/// during bootstrap.
#[derive(Clone, Debug, Display, Error)]
#[display(fmt = "failed to fetch upstream stats: {}", _0)]
pub struct StatFetchFailure(#[error(not(source))] pub String);
