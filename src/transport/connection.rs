//! Framed transport connection.
//!
//! A [`Connection`] wraps any byte stream in the [`FrameCodec`] and owns the
//! [`CipherSlot`] shared by its read and write halves. The session splits it
//! so that exactly one task reads and exactly one task writes.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument};

use crate::core::codec::{CipherSlot, FrameCodec};
use crate::error::{ProtocolError, Result};
use crate::transport::directory::Endpoint;
use crate::utils::timeout::with_timeout_error;

pub type FrameReader<S> = FramedRead<ReadHalf<S>, FrameCodec>;
pub type FrameWriter<S> = FramedWrite<WriteHalf<S>, FrameCodec>;

/// One framed connection to a server.
pub struct Connection<S> {
    reader: FrameReader<S>,
    writer: FrameWriter<S>,
    cipher: CipherSlot,
    closed: bool,
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `endpoint`.
    #[instrument(skip(max_payload), fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &Endpoint, timeout: Duration, max_payload: usize) -> Result<Self> {
        let addr = endpoint.to_string();
        let stream = with_timeout_error(
            async { TcpStream::connect(addr.as_str()).await.map_err(ProtocolError::from) },
            timeout,
        )
        .await?;
        stream.set_nodelay(true)?;
        info!("TCP connection established");
        Ok(Self::new(stream, max_payload))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, max_payload: usize) -> Self {
        let cipher = CipherSlot::new();
        let codec = FrameCodec::new(cipher.clone()).with_max_payload(max_payload);
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(read_half, codec.clone()),
            writer: FramedWrite::new(write_half, codec),
            cipher,
            closed: false,
        }
    }

    /// Read one plaintext frame payload.
    ///
    /// # Errors
    /// - `ConnectionClosed` on a clean end of stream
    /// - `TruncatedInput` if the stream ends mid-frame
    /// - `InvalidMagic` / `OversizedPacket` / `DecryptionFailure` on corrupt frames
    pub async fn read(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.reader
            .next()
            .await
            .ok_or(ProtocolError::ConnectionClosed)?
    }

    /// Encrypt (if active), frame and flush one payload.
    pub async fn write(&mut self, payload: Bytes) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.writer.send(payload).await
    }

    /// Install or clear the session key.
    ///
    /// # Errors
    /// Returns `InvalidKeyLength` unless the key is exactly 32 bytes
    pub fn set_cipher(&self, key: Option<&[u8]>) -> Result<()> {
        self.cipher.install(key)
    }

    pub fn cipher(&self) -> &CipherSlot {
        &self.cipher
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush and shut down the write side. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing connection");
        match self.writer.close().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_clean_disconnect() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Hand the halves to independent reader and writer tasks.
    pub fn into_split(self) -> (FrameReader<S>, FrameWriter<S>, CipherSlot) {
        (self.reader, self.writer, self.cipher)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::MAX_PAYLOAD_SIZE;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Connection::new(a, MAX_PAYLOAD_SIZE);
        let mut server = Connection::new(b, MAX_PAYLOAD_SIZE);

        client.write(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(server.read().await.unwrap().as_ref(), b"ping");
    }

    #[tokio::test]
    async fn test_encrypted_after_set_cipher() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Connection::new(a, MAX_PAYLOAD_SIZE);
        let mut server = Connection::new(b, MAX_PAYLOAD_SIZE);

        client.set_cipher(Some(&[4u8; 32])).unwrap();
        server.set_cipher(Some(&[4u8; 32])).unwrap();
        client.write(Bytes::from_static(b"sealed")).await.unwrap();
        assert_eq!(server.read().await.unwrap().as_ref(), b"sealed");

        assert!(client.set_cipher(Some(&[0u8; 8])).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_peer_sees_eof() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Connection::new(a, MAX_PAYLOAD_SIZE);
        let mut server = Connection::new(b, MAX_PAYLOAD_SIZE);

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(
            client.write(Bytes::new()).await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(matches!(
            server.read().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_short_read_is_truncation() {
        let (mut raw, b) = tokio::io::duplex(4096);
        let mut server = Connection::new(b, MAX_PAYLOAD_SIZE);

        raw.write_all(&10u32.to_le_bytes()).await.unwrap();
        raw.write_all(b"VT01abc").await.unwrap();
        drop(raw);

        let err = server.read().await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedInput));
        assert!(err.is_clean_disconnect());
    }
}
