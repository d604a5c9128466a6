//! Channel-encryption handshake.
//!
//! The server opens with an encrypt request naming its realm. The client
//! answers with a fresh 32-byte session key wrapped under that realm's RSA
//! public key, then waits for the encrypt result before switching the
//! connection over to the session cipher.
//!
//! ```text
//! Unencrypted --request--> KeyProposed --result OK--> Active
//!                                      \--result !OK--> Rejected
//! ```
//!
//! **Per-connection state**
//! A [`Handshake`] lives exactly as long as one connection. The proposed key
//! is held in a zeroizing buffer and handed out once on success.

use bytes::Bytes;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::io::Write;
use zeroize::Zeroizing;

use crate::core::binary::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::emsg::{EMsg, EResult, EUniverse};
use crate::protocol::message::OutgoingMessage;
use crate::utils::crypto::{self, SESSION_KEY_LEN};

use tracing::{debug, instrument, warn};

pub const PROTOCOL_VERSION: u32 = 1;

/// SubjectPublicKeyInfo DER of the public realm's 1024-bit key.
const PUBLIC_UNIVERSE_KEY_DER: &[u8] = &[
    0x30, 0x81, 0x9d, 0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01,
    0x05, 0x00, 0x03, 0x81, 0x8b, 0x00, 0x30, 0x81, 0x87, 0x02, 0x81, 0x81, 0x00, 0xdf, 0xec, 0x1a,
    0xd6, 0x2c, 0x10, 0x66, 0x2c, 0x17, 0x35, 0x3a, 0x14, 0xb0, 0x7c, 0x59, 0x11, 0x7f, 0x9d, 0xd3,
    0xd8, 0x2b, 0x7a, 0xe3, 0xe0, 0x15, 0xcd, 0x19, 0x1e, 0x46, 0xe8, 0x7b, 0x87, 0x74, 0xa2, 0x18,
    0x46, 0x31, 0xa9, 0x03, 0x14, 0x79, 0x82, 0x8e, 0xe9, 0x45, 0xa2, 0x49, 0x12, 0xa9, 0x23, 0x68,
    0x73, 0x89, 0xcf, 0x69, 0xa1, 0xb1, 0x61, 0x46, 0xbd, 0xc1, 0xbe, 0xbf, 0xd6, 0x01, 0x1b, 0xd8,
    0x81, 0xd4, 0xdc, 0x90, 0xfb, 0xfe, 0x4f, 0x52, 0x73, 0x66, 0xcb, 0x95, 0x70, 0xd7, 0xc5, 0x8e,
    0xba, 0x1c, 0x7a, 0x33, 0x75, 0xa1, 0x62, 0x34, 0x46, 0xbb, 0x60, 0xb7, 0x80, 0x68, 0xfa, 0x13,
    0xa7, 0x7a, 0x8a, 0x37, 0x4b, 0x9e, 0xc6, 0xf4, 0x5d, 0x5f, 0x3a, 0x99, 0xf9, 0x9e, 0xc4, 0x3a,
    0xe9, 0x63, 0xa2, 0xbb, 0x88, 0x19, 0x28, 0xe0, 0xe7, 0x14, 0xc0, 0x42, 0x89, 0x02, 0x01, 0x11,
];

/// Body of the server's encrypt request. Trailing challenge bytes are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgChannelEncryptRequest {
    pub protocol_version: u32,
    pub universe: i32,
}

impl Decode for MsgChannelEncryptRequest {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            protocol_version: r.read_u32()?,
            universe: r.read_i32()?,
        })
    }
}

impl Encode for MsgChannelEncryptRequest {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        w.write_u32(self.protocol_version)?;
        w.write_i32(self.universe)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgChannelEncryptResponse {
    pub protocol_version: u32,
    pub key_size: u32,
}

impl Encode for MsgChannelEncryptResponse {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        w.write_u32(self.protocol_version)?;
        w.write_u32(self.key_size)
    }
}

impl Decode for MsgChannelEncryptResponse {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            protocol_version: r.read_u32()?,
            key_size: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgChannelEncryptResult {
    pub result: EResult,
}

impl Decode for MsgChannelEncryptResult {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            result: EResult(r.read_i32()?),
        })
    }
}

impl Encode for MsgChannelEncryptResult {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        w.write_i32(self.result.0)
    }
}

/// Realm public keys used to wrap the session key.
#[derive(Debug, Clone)]
pub struct RealmKeys {
    keys: HashMap<EUniverse, RsaPublicKey>,
}

impl RealmKeys {
    /// No keys at all. Every handshake fails with `UnsupportedRealm`.
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// The compiled-in public realm key.
    pub fn builtin() -> Result<Self> {
        let mut keys = Self::empty();
        keys.insert_der(EUniverse::Public, PUBLIC_UNIVERSE_KEY_DER)?;
        Ok(keys)
    }

    pub fn insert(&mut self, universe: EUniverse, key: RsaPublicKey) {
        self.keys.insert(universe, key);
    }

    /// Register a key from SubjectPublicKeyInfo DER.
    pub fn insert_der(&mut self, universe: EUniverse, der: &[u8]) -> Result<()> {
        let key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| ProtocolError::HandshakeError(format!("bad realm key: {e}")))?;
        self.insert(universe, key);
        Ok(())
    }

    pub fn get(&self, universe: EUniverse) -> Option<&RsaPublicKey> {
        self.keys.get(&universe)
    }
}

impl Default for RealmKeys {
    fn default() -> Self {
        match Self::builtin() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Built-in realm key failed to parse");
                Self::empty()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unencrypted,
    KeyProposed,
    Active,
    Rejected,
}

/// Build `encryptedKey || crc32(encryptedKey) || 0u32`.
pub fn handshake_payload(encrypted_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encrypted_key.len() + 8);
    out.extend_from_slice(encrypted_key);
    out.extend_from_slice(&crypto::crc32(encrypted_key).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out
}

/// Per-connection handshake state machine.
pub struct Handshake {
    state: HandshakeState,
    pending_key: Option<Zeroizing<[u8; SESSION_KEY_LEN]>>,
    allowed_universe: EUniverse,
}

impl Handshake {
    /// A handshake that accepts requests for `universe` only.
    pub fn new(universe: EUniverse) -> Self {
        Self {
            state: HandshakeState::Unencrypted,
            pending_key: None,
            allowed_universe: universe,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Answer the server's encrypt request with a wrapped session key.
    ///
    /// # Errors
    /// - `UnsupportedRealm` if the requested universe is not the configured one
    ///   or no key is registered for it
    /// - `HandshakeError` if a key was already proposed on this connection
    #[instrument(skip(self, packet, keys), fields(state = ?self.state))]
    pub fn handle_encrypt_request(
        &mut self,
        packet: &Packet,
        keys: &RealmKeys,
    ) -> Result<OutgoingMessage> {
        if self.state != HandshakeState::Unencrypted {
            return Err(ProtocolError::HandshakeError(format!(
                "encrypt request received in state {:?}",
                self.state
            )));
        }

        let (request, _challenge) = packet.read_msg::<MsgChannelEncryptRequest>()?;
        let universe = EUniverse::from_i32(request.universe)
            .filter(|u| *u == self.allowed_universe)
            .ok_or(ProtocolError::UnsupportedRealm(request.universe))?;
        let public_key = keys.get(universe).ok_or_else(|| {
            warn!(universe = ?universe, "{}", constants::ERR_UNKNOWN_REALM_KEY);
            ProtocolError::UnsupportedRealm(request.universe)
        })?;

        let session_key = crypto::generate_session_key()?;
        let encrypted = crypto::rsa_encrypt(public_key, session_key.as_slice())?;

        let mut body = MsgChannelEncryptResponse {
            protocol_version: PROTOCOL_VERSION,
            key_size: encrypted.len() as u32,
        }
        .to_bytes()?;
        body.extend_from_slice(&handshake_payload(&encrypted));

        self.pending_key = Some(session_key);
        self.state = HandshakeState::KeyProposed;
        debug!(universe = ?universe, key_size = encrypted.len(), "Session key proposed");

        Ok(OutgoingMessage::plain(EMsg::CHANNEL_ENCRYPT_RESPONSE, body))
    }

    /// Consume the encrypt result, yielding the key to install on success.
    ///
    /// # Errors
    /// - `HandshakeRejected` if the server refused the key
    /// - `HandshakeError` if no key was proposed first
    #[instrument(skip(self, packet), fields(state = ?self.state))]
    pub fn handle_encrypt_result(
        &mut self,
        packet: &Packet,
    ) -> Result<Zeroizing<[u8; SESSION_KEY_LEN]>> {
        if self.state != HandshakeState::KeyProposed {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_MISSING_SESSION_KEY.into(),
            ));
        }

        let (result, _) = packet.read_msg::<MsgChannelEncryptResult>()?;
        if !result.result.is_ok() {
            self.pending_key = None;
            self.state = HandshakeState::Rejected;
            return Err(ProtocolError::HandshakeRejected(result.result));
        }

        let key = self.pending_key.take().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_MISSING_SESSION_KEY.into())
        })?;
        self.state = HandshakeState::Active;
        debug!("Channel encryption active");
        Ok(key)
    }
}

/// Encrypt request as a server would send it. Used by fakes and fuzzing.
pub fn encrypt_request_message(universe: i32, challenge: &[u8]) -> Result<Bytes> {
    let mut body = MsgChannelEncryptRequest {
        protocol_version: PROTOCOL_VERSION,
        universe,
    }
    .to_bytes()?;
    body.extend_from_slice(challenge);
    OutgoingMessage::plain(EMsg::CHANNEL_ENCRYPT_REQUEST, body).serialize()
}

/// Encrypt result as a server would send it.
pub fn encrypt_result_message(result: EResult) -> Result<Bytes> {
    let body = MsgChannelEncryptResult { result }.to_bytes()?;
    OutgoingMessage::plain(EMsg::CHANNEL_ENCRYPT_RESULT, body).serialize()
}
