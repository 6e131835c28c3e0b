//! Mobile ingest: a bare TCP server accepting the framed protocol of
//! [`crate::buffer`] directly from a phone, demuxing audio/video into
//! FIFOs a muxer process reads from and republishes to the origin.
//!
//! Grounded on `original_source/dss/mobile/handler.py` (per-connection
//! state machine) and its `processing/{data,media}.py` helpers.

mod server;
mod session;

pub use server::MobileIngestServer;

/// Alphabetic provider prefix mobile-ingested streams are republished
/// under.
pub const PROVIDER_PREFIX: &str = "M";

/// Builds a mobile session's republish stream name from its database id.
#[must_use]
pub fn stream_name(id: &str) -> String {
    format!("{}_{}", PROVIDER_PREFIX, id)
}

/// Time a pump or the handshake read may block waiting for data before
/// the session is considered stalled.
pub const WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Maximum number of unconsumed chunks an audio/video pump queue may hold
/// before the session aborts as backpressured.
pub const QUEUE_LIMIT: usize = 50_000;

/// Frame type byte values of the mobile wire protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    /// A JSON control frame (handshake reply, session metadata).
    Metadata,
    /// Raw video elementary stream bytes.
    Video,
    /// Raw audio elementary stream bytes.
    Audio,
    /// A JSON user-originated frame (e.g. `coord` updates).
    UserData,
}

impl ContentType {
    /// Converts a raw wire type byte, if it names a known content type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Metadata),
            1 => Some(Self::Video),
            2 => Some(Self::Audio),
            3 => Some(Self::UserData),
            _ => None,
        }
    }

    /// The wire type byte for this content type.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Metadata => 0,
            Self::Video => 1,
            Self::Audio => 2,
            Self::UserData => 3,
        }
    }
}
