//! Protobuf sub-messages the core reads or writes itself.
//!
//! Field numbers match the gateway's published schema; every other message is
//! opaque to this crate and decoded by the handler that owns it via
//! [`Packet::read_proto`](crate::core::packet::Packet::read_proto).

use prost::Message;

/// Header carried inside protobuf-wrapped envelopes.
#[derive(Clone, PartialEq, Message)]
pub struct CMsgProtoBufHeader {
    #[prost(fixed64, optional, tag = "1")]
    pub steamid: Option<u64>,
    #[prost(int32, optional, tag = "2")]
    pub client_sessionid: Option<i32>,
    #[prost(uint32, optional, tag = "3")]
    pub routing_appid: Option<u32>,
    #[prost(fixed64, optional, tag = "10", default = "18446744073709551615")]
    pub jobid_source: Option<u64>,
    #[prost(fixed64, optional, tag = "11", default = "18446744073709551615")]
    pub jobid_target: Option<u64>,
    #[prost(string, optional, tag = "12")]
    pub target_job_name: Option<String>,
    #[prost(int32, optional, tag = "13", default = "2")]
    pub eresult: Option<i32>,
    #[prost(string, optional, tag = "14")]
    pub error_message: Option<String>,
}

/// Batched container of length-prefixed packets, optionally gzip-compressed.
#[derive(Clone, PartialEq, Message)]
pub struct CMsgMulti {
    #[prost(uint32, optional, tag = "1")]
    pub size_unzipped: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub message_body: Option<Vec<u8>>,
}

/// Fresh connection-manager endpoints pushed by the server.
#[derive(Clone, PartialEq, Message)]
pub struct CMsgClientCmList {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub cm_addresses: Vec<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "2")]
    pub cm_ports: Vec<u32>,
    #[prost(string, repeated, tag = "3")]
    pub cm_websocket_addresses: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CMsgClientHeartBeat {}

#[derive(Clone, PartialEq, Message)]
pub struct CMsgClientLogonResponse {
    #[prost(int32, optional, tag = "1", default = "2")]
    pub eresult: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub out_of_game_heartbeat_seconds: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub in_game_heartbeat_seconds: Option<i32>,
    #[prost(fixed32, optional, tag = "5")]
    pub rtime32_server_time: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub account_flags: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub cell_id: Option<u32>,
    #[prost(fixed64, optional, tag = "20")]
    pub client_supplied_steamid: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CMsgClientLoggedOff {
    #[prost(int32, optional, tag = "1", default = "2")]
    pub eresult: Option<i32>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_job_defaults() {
        let header = CMsgProtoBufHeader::default();
        assert_eq!(header.jobid_source(), u64::MAX);
        assert_eq!(header.jobid_target(), u64::MAX);
        assert_eq!(header.eresult(), 2);
    }

    #[test]
    fn test_cm_list_decodes_packed_and_unpacked() {
        let list = CMsgClientCmList {
            cm_addresses: vec![0x7F00_0001, 0x0A00_0002],
            cm_ports: vec![27017, 27018],
            cm_websocket_addresses: vec![],
        };
        let bytes = list.encode_to_vec();
        let decoded = CMsgClientCmList::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, list);
    }
}
