//! Outgoing message builders.
//!
//! An [`OutgoingMessage`] pairs one of the three envelope headers with an
//! already-encoded body. Identity fields are left blank by the builders and
//! stamped by the session right before the message is queued.

use bytes::Bytes;
use prost::Message;

use crate::core::binary::{BinaryWriter, Encode};
use crate::error::Result;
use crate::protocol::emsg::EMsg;
use crate::protocol::header::{
    ExtendedClientMsgHdr, Header, MsgGcHdr, MsgGcHdrProtoBuf, MsgHdr, MsgHdrProtoBuf, SteamId,
};
use crate::protocol::job::JobId;

/// A message ready to be framed and written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    header: Header,
    body: Vec<u8>,
}

impl OutgoingMessage {
    /// Plain header, used by the channel-encrypt exchange.
    pub fn plain(emsg: EMsg, body: Vec<u8>) -> Self {
        Self {
            header: Header::Plain(MsgHdr::new(emsg)),
            body,
        }
    }

    /// Extended header with identity fields.
    pub fn client(emsg: EMsg, body: Vec<u8>) -> Self {
        Self {
            header: Header::Extended(ExtendedClientMsgHdr::new(emsg)),
            body,
        }
    }

    /// Extended header with a fixed-layout body.
    pub fn client_struct<T: Encode>(emsg: EMsg, body: &T) -> Result<Self> {
        Ok(Self::client(emsg, body.to_bytes()?))
    }

    /// Protobuf-wrapped header with a protobuf body.
    pub fn protobuf<M: Message>(emsg: EMsg, body: &M) -> Self {
        Self {
            header: Header::Protobuf(MsgHdrProtoBuf::new(emsg)),
            body: body.encode_to_vec(),
        }
    }

    pub fn emsg(&self) -> EMsg {
        self.header.emsg()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn with_source_job_id(mut self, job: JobId) -> Self {
        match &mut self.header {
            Header::Plain(h) => h.source_job_id = job,
            Header::Extended(h) => h.source_job_id = job,
            Header::Protobuf(h) => h.proto.jobid_source = Some(job.0),
        }
        self
    }

    /// Mark this message as the reply to `job`.
    pub fn with_target_job_id(mut self, job: JobId) -> Self {
        match &mut self.header {
            Header::Plain(h) => h.target_job_id = job,
            Header::Extended(h) => h.target_job_id = job,
            Header::Protobuf(h) => h.proto.jobid_target = Some(job.0),
        }
        self
    }

    /// Stamp the session identity. Plain headers carry none and are untouched.
    pub fn set_identity(&mut self, session_id: i32, steam_id: SteamId) {
        match &mut self.header {
            Header::Plain(_) => {}
            Header::Extended(h) => {
                h.session_id = session_id;
                h.steam_id = steam_id;
            }
            Header::Protobuf(h) => {
                h.proto.client_sessionid = Some(session_id);
                h.proto.steamid = Some(steam_id.0);
            }
        }
    }

    /// Header followed by body, as one frame payload.
    pub fn serialize(&self) -> Result<Bytes> {
        let mut writer = BinaryWriter::new(Vec::with_capacity(64 + self.body.len()));
        self.header.encode(&mut writer)?;
        writer.write_bytes(&self.body)?;
        Ok(Bytes::from(writer.into_inner()))
    }
}

/// Game-coordinator payload, wrapped by the caller into the tunnelling message.
#[derive(Debug, Clone, PartialEq)]
pub enum GcMessage {
    Plain {
        msg_type: u32,
        header: MsgGcHdr,
        body: Vec<u8>,
    },
    Protobuf {
        header: MsgGcHdrProtoBuf,
        body: Vec<u8>,
    },
}

impl GcMessage {
    pub fn plain(msg_type: u32, body: Vec<u8>) -> Self {
        GcMessage::Plain {
            msg_type,
            header: MsgGcHdr::default(),
            body,
        }
    }

    pub fn protobuf<M: Message>(msg_type: u32, body: &M) -> Self {
        GcMessage::Protobuf {
            header: MsgGcHdrProtoBuf {
                msg_type,
                ..Default::default()
            },
            body: body.encode_to_vec(),
        }
    }

    /// Raw type word, with the protobuf bit set for protobuf payloads.
    pub fn msg_type(&self) -> u32 {
        match self {
            GcMessage::Plain { msg_type, .. } => EMsg(*msg_type).to_raw(false),
            GcMessage::Protobuf { header, .. } => EMsg(header.msg_type).to_raw(true),
        }
    }

    pub fn with_source_job_id(mut self, job: JobId) -> Self {
        match &mut self {
            GcMessage::Plain { header, .. } => header.source_job_id = job,
            GcMessage::Protobuf { header, .. } => header.proto.jobid_source = Some(job.0),
        }
        self
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let mut writer = BinaryWriter::new(Vec::new());
        match self {
            GcMessage::Plain { header, body, .. } => {
                header.encode(&mut writer)?;
                writer.write_bytes(body)?;
            }
            GcMessage::Protobuf { header, body } => {
                header.encode(&mut writer)?;
                writer.write_bytes(body)?;
            }
        }
        Ok(Bytes::from(writer.into_inner()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::{GcPacket, Packet};
    use crate::protocol::proto::{CMsgClientHeartBeat, CMsgClientLoggedOff};

    #[test]
    fn test_protobuf_message_stamps_identity() {
        let mut msg = OutgoingMessage::protobuf(EMsg::CLIENT_HEART_BEAT, &CMsgClientHeartBeat {})
            .with_source_job_id(JobId(3));
        msg.set_identity(42, SteamId(76561198000000000));

        let packet = Packet::from_bytes(msg.serialize().unwrap()).unwrap();
        assert_eq!(packet.emsg(), EMsg::CLIENT_HEART_BEAT);
        assert!(packet.is_proto());
        assert_eq!(packet.session_id(), Some(42));
        assert_eq!(packet.steam_id(), Some(SteamId(76561198000000000)));
        assert_eq!(packet.source_job_id(), JobId(3));
        assert!(packet.body().is_empty());
    }

    #[test]
    fn test_client_message_layout() {
        let mut msg = OutgoingMessage::client(EMsg(5400), vec![1, 2, 3]);
        msg.set_identity(-1, SteamId(9));
        let bytes = msg.serialize().unwrap();
        assert_eq!(bytes.len(), ExtendedClientMsgHdr::SIZE + 3);

        let packet = Packet::from_bytes(bytes).unwrap();
        assert_eq!(packet.session_id(), Some(-1));
        assert_eq!(packet.body().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_plain_message_ignores_identity() {
        let mut msg = OutgoingMessage::plain(EMsg::CHANNEL_ENCRYPT_RESPONSE, vec![0xAA])
            .with_target_job_id(JobId(5));
        msg.set_identity(1, SteamId(1));
        let packet = Packet::from_bytes(msg.serialize().unwrap()).unwrap();
        assert!(packet.steam_id().is_none());
        assert_eq!(packet.target_job_id(), JobId(5));
        assert_eq!(packet.body().len(), 1);
    }

    #[test]
    fn test_gc_message_roundtrip() {
        let msg = GcMessage::protobuf(4006, &CMsgClientLoggedOff { eresult: Some(1) })
            .with_source_job_id(JobId(11));
        let gc = GcPacket::new(730, msg.msg_type(), msg.serialize().unwrap()).unwrap();
        assert!(gc.is_proto);
        assert_eq!(gc.msg_type, 4006);
        assert_eq!(gc.header.source_job_id(), JobId(11));
        let body: CMsgClientLoggedOff = gc.read_proto().unwrap();
        assert_eq!(body.eresult(), 1);

        let plain = GcMessage::plain(4004, b"x".to_vec());
        let gc = GcPacket::new(730, plain.msg_type(), plain.serialize().unwrap()).unwrap();
        assert!(!gc.is_proto);
        assert_eq!(gc.body.as_ref(), b"x");
    }
}
