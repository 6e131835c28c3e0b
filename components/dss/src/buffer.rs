//! Length-delimited framed reader over an async byte stream.
//!
//! Wire shape: `[type: u8][length: u32 big-endian][payload: length bytes]`.

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;

/// Size in bytes of the frame header (`type` + `length`).
pub const HEADER_SIZE: usize = 5;

/// One decoded frame: a type byte plus its payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// The frame's type byte (application-defined).
    pub kind: u8,
    /// The frame's raw payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serializes this frame back to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.push(self.kind);
        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, self.payload.len() as u32);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Refills on demand from an underlying [`AsyncRead`] socket, handing out
/// exact-length reads to the protocol layer.
#[derive(Debug)]
pub struct FramedBuffer<S> {
    socket: S,
    read_size: usize,
    /// Bytes already pulled from the socket but not yet handed out.
    pending: Vec<u8>,
}

impl<S: AsyncRead + Unpin> FramedBuffer<S> {
    /// Wraps `socket`, refilling in chunks of `read_size` bytes at a time.
    #[must_use]
    pub fn new(socket: S, read_size: usize) -> Self {
        Self {
            socket,
            read_size,
            pending: Vec::new(),
        }
    }

    /// Changes the refill chunk size used by subsequent reads.
    pub fn set_read_size(&mut self, read_size: usize) {
        self.read_size = read_size;
    }

    /// Reads exactly `n` bytes, refilling from the socket in `read_size`
    /// chunks as needed; any surplus beyond `n` is kept for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::SocketClosed`] if the socket reaches EOF
    /// with a partial frame still outstanding.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        while self.pending.len() < n {
            let mut chunk = vec![0u8; self.read_size.max(1)];
            let read = self
                .socket
                .read(&mut chunk)
                .await
                .map_err(|_| ProtocolError::SocketClosed)?;
            if read == 0 {
                return Err(ProtocolError::SocketClosed);
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
        Ok(self.pending.drain(..n).collect())
    }

    /// Reads one length-delimited [`Frame`].
    ///
    /// # Errors
    ///
    /// Propagates [`FramedBuffer::read`]'s errors.
    pub async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        let header = self.read(HEADER_SIZE).await?;
        let kind = header[0];
        let len = BigEndian::read_u32(&header[1..]) as usize;
        let payload = self.read(len).await?;
        Ok(Frame { kind, payload })
    }
}

#[cfg(test)]
mod buffer_spec {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_exact_length_across_refills() {
        let data = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut buf = FramedBuffer::new(Cursor::new(data.clone()), 3);
        let first = buf.read(5).await.unwrap();
        let second = buf.read(3).await.unwrap();
        assert_eq!(first, data[..5]);
        assert_eq!(second, data[5..]);
    }

    #[tokio::test]
    async fn eof_mid_frame_is_socket_closed() {
        let mut buf = FramedBuffer::new(Cursor::new(vec![1u8, 2]), 4);
        let err = buf.read(5).await.unwrap_err();
        assert!(matches!(err, ProtocolError::SocketClosed));
    }

    #[tokio::test]
    async fn frame_round_trips_through_encode_and_decode() {
        let frame = Frame {
            kind: 1,
            payload: b"hello".to_vec(),
        };
        let encoded = frame.encode();
        let mut buf = FramedBuffer::new(Cursor::new(encoded), 16);
        let decoded = buf.read_frame().await.unwrap();
        assert_eq!(decoded, frame);
    }
}
