//! # Error Types
//!
//! Error handling for the connection-manager protocol core.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`ProtocolError`]. The variants follow the protocol's failure taxonomy:
//!
//! - **Clean disconnects**: `TruncatedInput`, `ConnectionClosed`. The peer went
//!   away mid-frame or between frames. The connection ends, but nothing is corrupt.
//!   A complete frame too short for its header is `MalformedHeader` instead.
//! - **Protocol violations**: `InvalidMagic`, `MalformedHeader`, `OversizedPacket`.
//!   Always fatal for the connection.
//! - **Handshake failures**: `UnsupportedRealm`, `HandshakeRejected`. Fatal, and
//!   kept distinct so callers can tell "the server refused us" apart from
//!   "we are confused".
//! - **Container failures**: `DecompressionFailure`. Non-fatal, the frame is dropped.
//! - **Directory failures**: `DirectoryFetch`. Returned to the caller of
//!   `Directory::initialize`, never fatal to a live connection.
//!
//! ## Example Usage
//! ```rust
//! use cm_protocol::error::{ProtocolError, Result};
//! use cm_protocol::core::binary::BinaryReader;
//!
//! fn first_word(data: &[u8]) -> Result<u32> {
//!     BinaryReader::new(data).read_u32()
//! }
//!
//! assert!(matches!(first_word(&[1, 2]), Err(ProtocolError::TruncatedInput)));
//! ```

use crate::protocol::emsg::EResult;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Header validation errors
    pub const ERR_NEGATIVE_HEADER_LENGTH: &str = "Protobuf header length is negative";
    pub const ERR_MULTI_RECORD_LENGTH: &str = "Multi record length exceeds container";
    pub const ERR_HEADER_TRUNCATED: &str = "Packet ends before its header";

    /// Cipher state errors
    pub const ERR_CIPHER_LOCK: &str = "Cipher state lock poisoned";

    /// Cryptographic errors
    pub const ERR_MISSING_SESSION_KEY: &str = "Encrypt result arrived before a key was proposed";
    pub const ERR_CIPHERTEXT_TOO_SHORT: &str = "Ciphertext shorter than one block";
    pub const ERR_UNKNOWN_REALM_KEY: &str = "No public key registered for realm";

    /// Directory errors
    pub const ERR_DIRECTORY_EMPTY: &str = "Directory returned an empty server list";
}

/// Primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Truncated input: not enough bytes remaining")]
    TruncatedInput,

    #[error("Write failed: {0}")]
    WriteFailed(io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Bad magic: expected 0x31305456, found {found:#010x}")]
    InvalidMagic { found: u32 },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Invalid session key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Unsupported realm: {0}")]
    UnsupportedRealm(i32),

    #[error("Handshake rejected by server: {0}")]
    HandshakeRejected(EResult),

    #[error("Handshake error: {0}")]
    HandshakeError(String),

    #[error("Directory fetch failed: {0}")]
    DirectoryFetch(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Outgoing queue is full")]
    QueueFull,

    #[error("Not connected")]
    NotConnected,

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// True when the error means the peer simply went away.
    ///
    /// These still end the connection but are logged without alarm.
    pub fn is_clean_disconnect(&self) -> bool {
        match self {
            ProtocolError::TruncatedInput | ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// True when the error must tear the connection down if it happens on the
    /// read or write path. Only a broken Multi container is survivable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::DecompressionFailure | ProtocolError::DirectoryFetch(_)
        )
    }

    /// True when the server explicitly refused the channel encryption.
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(self, ProtocolError::HandshakeRejected(_))
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_disconnect_classification() {
        assert!(ProtocolError::TruncatedInput.is_clean_disconnect());
        assert!(ProtocolError::ConnectionClosed.is_clean_disconnect());
        assert!(ProtocolError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_clean_disconnect());
        assert!(!ProtocolError::InvalidMagic { found: 0 }.is_clean_disconnect());
    }

    #[test]
    fn test_fatality() {
        assert!(ProtocolError::InvalidMagic { found: 0 }.is_fatal());
        assert!(ProtocolError::HandshakeRejected(EResult::FAIL).is_fatal());
        assert!(!ProtocolError::DecompressionFailure.is_fatal());
        assert!(!ProtocolError::DirectoryFetch("offline".into()).is_fatal());
    }

    #[test]
    fn test_bad_magic_message() {
        let err = ProtocolError::InvalidMagic { found: 0 };
        assert!(err.to_string().contains("Bad magic"));
        assert!(ProtocolError::HandshakeRejected(EResult::FAIL).is_handshake_rejection());
    }
}
