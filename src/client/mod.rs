//! # Client Session
//!
//! The connection lifecycle seen by applications.
//!
//! ## Components
//! - **Session**: connect, handshake, dispatch, heartbeat, disconnect
//! - **Event**: what a session reports through its event stream
//! - **Logon**: built-in handler for logon and logoff results

pub mod event;
pub mod logon;
pub mod session;

pub use event::{Event, SessionState};
pub use session::Session;
