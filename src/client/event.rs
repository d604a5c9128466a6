use std::time::Duration;

use crate::error::ProtocolError;
use crate::protocol::emsg::EResult;
use crate::protocol::header::SteamId;
use crate::transport::directory::Endpoint;

/// Everything a session reports to its owner, in the order it happened.
#[derive(Debug)]
pub enum Event {
    /// Channel encryption is active; application messages may flow.
    Connected,
    /// The current connection is gone. Emitted once per connection.
    Disconnected,
    /// The connection was torn down by this error. Always followed by `Disconnected`.
    FatalError(ProtocolError),
    /// A non-fatal problem: a failing handler or a dropped Multi container.
    Error(ProtocolError),
    /// The server pushed a fresh list of connection managers.
    CmList(Vec<Endpoint>),
    LoggedOn {
        steam_id: SteamId,
        session_id: i32,
        heartbeat: Duration,
    },
    LogOnFailed {
        result: EResult,
    },
    LoggedOff {
        result: EResult,
    },
}

impl Event {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::FatalError(_))
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    /// Encrypted channel up, no account logged on.
    LoggedOff,
    LoggedOn,
    Disconnected,
}

impl SessionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Connecting => 1,
            SessionState::Handshaking => 2,
            SessionState::LoggedOff => 3,
            SessionState::LoggedOn => 4,
            SessionState::Disconnected => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Handshaking,
            3 => SessionState::LoggedOff,
            4 => SessionState::LoggedOn,
            5 => SessionState::Disconnected,
            _ => SessionState::Idle,
        }
    }
}
