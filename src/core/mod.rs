//! # Core Protocol Components
//!
//! Low-level framing, binary layout and packet decoding.
//!
//! ## Components
//! - **Binary**: little-endian primitive reader/writer
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Packet**: decoded message-type word, header and body
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [Magic(4) = "VT01"] [Payload(Length)]
//! ```
//!
//! ## Security
//! - Maximum payload size: 16MB (prevents memory exhaustion)
//! - Length validated before the payload is buffered

pub mod binary;
pub mod codec;
pub mod packet;
