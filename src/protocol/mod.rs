//! # Protocol Layer
//!
//! Message envelopes, the channel-encryption handshake and packet dispatch.
//!
//! ## Components
//! - **EMsg**: message-type word and the registry values the core acts on
//! - **Header**: plain, extended and protobuf-wrapped envelopes
//! - **Message**: outgoing message builders
//! - **Handshake**: session key negotiation
//! - **Dispatcher**: broadcast routing and Multi container expansion
//! - **Job**: request/response correlation ids

pub mod dispatcher;
pub mod emsg;
pub mod handshake;
pub mod header;
pub mod job;
pub mod message;
pub mod proto;
