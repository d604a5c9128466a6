//! Message-type words and the small slice of the numeric registries the core
//! depends on.
//!
//! The full catalog of message codes and result values is supplied externally;
//! these newtypes accept any integer, and only name the values the transport,
//! handshake and dispatch layers act on.

use std::fmt;

/// High bit of the message-type word: the header is protobuf-wrapped.
pub const PROTO_MASK: u32 = 0x8000_0000;

/// Mask yielding the canonical message-type code.
pub const EMSG_MASK: u32 = !PROTO_MASK;

/// Numeric message-type code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EMsg(pub u32);

impl EMsg {
    pub const INVALID: EMsg = EMsg(0);
    pub const MULTI: EMsg = EMsg(1);
    pub const CLIENT_HEART_BEAT: EMsg = EMsg(703);
    pub const CLIENT_LOG_ON_RESPONSE: EMsg = EMsg(751);
    pub const CLIENT_LOGGED_OFF: EMsg = EMsg(757);
    pub const CLIENT_CM_LIST: EMsg = EMsg(783);
    pub const CHANNEL_ENCRYPT_REQUEST: EMsg = EMsg(1303);
    pub const CHANNEL_ENCRYPT_RESPONSE: EMsg = EMsg(1304);
    pub const CHANNEL_ENCRYPT_RESULT: EMsg = EMsg(1305);
    pub const CLIENT_LOGON: EMsg = EMsg(5514);

    /// Split a raw message-type word into the code and the protobuf flag.
    pub fn from_raw(raw: u32) -> (EMsg, bool) {
        (EMsg(raw & EMSG_MASK), raw & PROTO_MASK != 0)
    }

    /// Build the raw word, setting the protobuf bit when asked.
    pub fn to_raw(self, is_proto: bool) -> u32 {
        if is_proto {
            self.0 | PROTO_MASK
        } else {
            self.0 & EMSG_MASK
        }
    }

    /// Message types that always travel with the plain header, even once the
    /// channel is encrypted.
    pub fn uses_plain_header(self) -> bool {
        matches!(
            self,
            EMsg::CHANNEL_ENCRYPT_REQUEST
                | EMsg::CHANNEL_ENCRYPT_RESPONSE
                | EMsg::CHANNEL_ENCRYPT_RESULT
        )
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            EMsg::INVALID => "Invalid",
            EMsg::MULTI => "Multi",
            EMsg::CLIENT_HEART_BEAT => "ClientHeartBeat",
            EMsg::CLIENT_LOG_ON_RESPONSE => "ClientLogOnResponse",
            EMsg::CLIENT_LOGGED_OFF => "ClientLoggedOff",
            EMsg::CLIENT_CM_LIST => "ClientCMList",
            EMsg::CHANNEL_ENCRYPT_REQUEST => "ChannelEncryptRequest",
            EMsg::CHANNEL_ENCRYPT_RESPONSE => "ChannelEncryptResponse",
            EMsg::CHANNEL_ENCRYPT_RESULT => "ChannelEncryptResult",
            EMsg::CLIENT_LOGON => "ClientLogon",
            _ => return None,
        })
    }
}

impl fmt::Display for EMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "EMsg({})", self.0),
        }
    }
}

/// Numeric result code carried by responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EResult(pub i32);

impl EResult {
    pub const INVALID: EResult = EResult(0);
    pub const OK: EResult = EResult(1);
    pub const FAIL: EResult = EResult(2);
    pub const SERVICE_UNAVAILABLE: EResult = EResult(20);
    pub const TRY_ANOTHER_CM: EResult = EResult(48);

    pub fn is_ok(self) -> bool {
        self == EResult::OK
    }
}

impl fmt::Display for EResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EResult::INVALID => write!(f, "Invalid"),
            EResult::OK => write!(f, "OK"),
            EResult::FAIL => write!(f, "Fail"),
            EResult::SERVICE_UNAVAILABLE => write!(f, "ServiceUnavailable"),
            EResult::TRY_ANOTHER_CM => write!(f, "TryAnotherCM"),
            EResult(other) => write!(f, "EResult({other})"),
        }
    }
}

/// Deployment partition whose public key wraps the session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EUniverse {
    Invalid,
    Public,
    Beta,
    Internal,
    Dev,
}

impl EUniverse {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(EUniverse::Invalid),
            1 => Some(EUniverse::Public),
            2 => Some(EUniverse::Beta),
            3 => Some(EUniverse::Internal),
            4 => Some(EUniverse::Dev),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            EUniverse::Invalid => 0,
            EUniverse::Public => 1,
            EUniverse::Beta => 2,
            EUniverse::Internal => 3,
            EUniverse::Dev => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_word_split() {
        let (emsg, proto) = EMsg::from_raw(751 | PROTO_MASK);
        assert_eq!(emsg, EMsg::CLIENT_LOG_ON_RESPONSE);
        assert!(proto);

        let (emsg, proto) = EMsg::from_raw(1303);
        assert_eq!(emsg, EMsg::CHANNEL_ENCRYPT_REQUEST);
        assert!(!proto);
    }

    #[test]
    fn test_to_raw_sets_and_clears_flag() {
        assert_eq!(EMsg::MULTI.to_raw(true), 0x8000_0001);
        assert_eq!(EMsg::MULTI.to_raw(false), 1);
    }

    #[test]
    fn test_display_unknown_code() {
        assert_eq!(EMsg(9999).to_string(), "EMsg(9999)");
        assert_eq!(EMsg::MULTI.to_string(), "Multi");
        assert_eq!(EResult(77).to_string(), "EResult(77)");
    }

    #[test]
    fn test_universe_conversion() {
        for universe in [EUniverse::Public, EUniverse::Beta, EUniverse::Internal, EUniverse::Dev] {
            assert_eq!(EUniverse::from_i32(universe.as_i32()), Some(universe));
        }
        assert_eq!(EUniverse::from_i32(42), None);
    }
}
