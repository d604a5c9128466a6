//! # Transport Layer
//!
//! Framed TCP connections and server selection.
//!
//! ## Components
//! - **Connection**: length + magic framing with a switchable session cipher
//! - **Directory**: dynamic server list with a static regional fallback

pub mod connection;
pub mod directory;

pub use connection::Connection;
pub use directory::{Directory, Endpoint};
