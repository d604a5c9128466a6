//! Length + magic framing as a Tokio codec.
//!
//! ```text
//! [Length(4, LE)] [Magic(4, LE) = "VT01"] [Payload(Length)]
//! ```
//!
//! The length counts payload bytes only. Once a session key is installed in
//! the shared [`CipherSlot`], payloads are encrypted after framing-level
//! validation on the way in and before the length is computed on the way out.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::{Arc, RwLock};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::SessionCipher;

/// Frame magic, ASCII `VT01` read as a little-endian word.
pub const MAGIC: u32 = 0x3130_5456;

/// Length word plus magic word.
pub const FRAME_HEADER_LEN: usize = 8;

/// Symmetric cipher state shared between a connection's read and write halves.
///
/// Each encrypt or decrypt holds the read lock for its whole duration, so a
/// concurrent [`install`](Self::install) only affects operations that start
/// after it returns.
#[derive(Debug, Clone, Default)]
pub struct CipherSlot {
    inner: Arc<RwLock<Option<SessionCipher>>>,
}

impl CipherSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (`Some`) or clear (`None`) the session key.
    ///
    /// # Errors
    /// Returns `InvalidKeyLength` unless the key is exactly 32 bytes
    pub fn install(&self, key: Option<&[u8]>) -> Result<()> {
        let cipher = key.map(SessionCipher::new).transpose()?;
        let mut slot = self
            .inner
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CIPHER_LOCK))?;
        *slot = cipher;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Encrypt an outbound payload if a key is active.
    pub fn seal(&self, payload: Bytes) -> Result<Bytes> {
        let slot = self
            .inner
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CIPHER_LOCK))?;
        match slot.as_ref() {
            Some(cipher) => Ok(Bytes::from(cipher.encrypt(&payload)?)),
            None => Ok(payload),
        }
    }

    /// Decrypt an inbound payload if a key is active.
    pub fn open(&self, payload: Bytes) -> Result<Bytes> {
        let slot = self
            .inner
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CIPHER_LOCK))?;
        match slot.as_ref() {
            Some(cipher) => Ok(Bytes::from(cipher.decrypt(&payload)?)),
            None => Ok(payload),
        }
    }
}

/// Codec yielding plaintext frame payloads.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    cipher: CipherSlot,
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(CipherSlot::new())
    }
}

impl FrameCodec {
    pub fn new(cipher: CipherSlot) -> Self {
        Self {
            cipher,
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn cipher(&self) -> &CipherSlot {
        &self.cipher
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let magic = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);

        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic { found: magic });
        }
        if len > self.max_payload {
            return Err(ProtocolError::OversizedPacket(len));
        }

        let total = FRAME_HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();
        self.cipher.open(payload).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            // peer hung up mid-frame
            None => Err(ProtocolError::TruncatedInput),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        let payload = self.cipher.seal(payload)?;
        if payload.len() > self.max_payload {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }

        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_u32_le(MAGIC);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::copy_from_slice(payload), &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_wire_layout() {
        let buf = frame(b"abc");
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..8], b"VT01");
        assert_eq!(&buf[8..], b"abc");
    }

    #[test]
    fn test_partial_frames_wait_for_more() {
        let full = frame(b"hello");
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&full[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[6..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(4);
        buf.put_u32_le(0);
        buf.extend_from_slice(b"data");
        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMagic { found: 0 }));
    }

    #[test]
    fn test_oversized_length_rejected_before_buffering() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1024);
        buf.put_u32_le(MAGIC);
        let mut codec = FrameCodec::default().with_max_payload(512);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(1024))
        ));
    }

    #[test]
    fn test_eof_mid_frame_is_truncation() {
        let full = frame(b"hello");
        let mut buf = BytesMut::from(&full[..10]);
        let mut codec = FrameCodec::default();
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedInput)
        ));
        assert!(codec.decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }

    #[test]
    fn test_encrypted_roundtrip_shares_slot() {
        let slot = CipherSlot::new();
        slot.install(Some(&[5u8; 32])).unwrap();
        assert!(slot.is_active());

        let mut writer = FrameCodec::new(slot.clone());
        let mut reader = FrameCodec::new(slot.clone());
        let mut buf = BytesMut::new();
        writer.encode(Bytes::from_static(b"secret"), &mut buf).unwrap();
        assert_ne!(&buf[8..], b"secret");
        assert_eq!(reader.decode(&mut buf).unwrap().unwrap().as_ref(), b"secret");

        slot.install(None).unwrap();
        assert!(!slot.is_active());
    }

    #[test]
    fn test_install_rejects_bad_key() {
        let slot = CipherSlot::new();
        assert!(matches!(
            slot.install(Some(&[0u8; 31])),
            Err(ProtocolError::InvalidKeyLength(31))
        ));
        assert!(!slot.is_active());
    }
}
