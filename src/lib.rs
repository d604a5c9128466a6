//! # cm-protocol
//!
//! Client core for connection-manager gateways: framed TCP transport,
//! RSA/AES channel encryption, message envelopes and broadcast dispatch.
//!
//! ## Layers
//! - [`core`]: binary layout, frame codec, packet decoding
//! - [`protocol`]: message types, headers, handshake, dispatcher, job ids
//! - [`transport`]: framed connections and the server directory
//! - [`client`]: the session that ties them together
//! - [`utils`]: crypto, compression, logging, metrics, timeouts
//!
//! ## Example
//! ```no_run
//! use cm_protocol::client::{Event, Session};
//! use cm_protocol::config::CmConfig;
//! use futures::StreamExt;
//!
//! # async fn run() -> cm_protocol::error::Result<()> {
//! let session = Session::new(CmConfig::default())?;
//! let mut events = session.events().expect("first call");
//! session.connect(None).await?;
//! while let Some(event) = events.next().await {
//!     if let Event::Connected = event {
//!         // send the logon request here
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use client::{Event, Session, SessionState};
pub use config::CmConfig;
pub use error::{ProtocolError, Result};
