//! Decoded inbound packet.
//!
//! A [`Packet`] is built once per plaintext frame payload (or per record inside
//! a Multi container) and is immutable afterwards. The header is decoded
//! eagerly so every handler sees the same job ids and identity; the body stays
//! a cheap [`Bytes`] slice into the original buffer.

use bytes::Bytes;

use crate::core::binary::{BinaryReader, Decode};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::emsg::EMsg;
use crate::protocol::header::{GcHeader, Header, MsgGcHdr, MsgGcHdrProtoBuf, SteamId};
use crate::protocol::job::JobId;

/// One decoded message from the wire.
#[derive(Debug, Clone)]
pub struct Packet {
    emsg: EMsg,
    is_proto: bool,
    header: Header,
    data: Bytes,
    body_offset: usize,
}

impl Packet {
    /// Decode the message-type word and header from a plaintext payload.
    ///
    /// The payload is always a whole frame or Multi record, so running out of
    /// bytes here is corruption rather than a short read.
    ///
    /// # Errors
    /// - `MalformedHeader` if the payload ends before the header does or the
    ///   header is corrupt
    /// - `ProtobufDecode` if a protobuf header fails to decode
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        let (emsg, is_proto, header, body_offset) = Self::decode_header(&data).map_err(|e| match e {
            ProtocolError::TruncatedInput => {
                ProtocolError::MalformedHeader(constants::ERR_HEADER_TRUNCATED.into())
            }
            other => other,
        })?;

        Ok(Self {
            emsg,
            is_proto,
            header,
            data,
            body_offset,
        })
    }

    fn decode_header(data: &Bytes) -> Result<(EMsg, bool, Header, usize)> {
        let mut reader = BinaryReader::new(data);
        let raw = reader.read_u32()?;
        let (emsg, is_proto) = EMsg::from_raw(raw);

        // re-read from the start so each header owns its type word
        let mut reader = BinaryReader::new(data);
        let header = Header::decode(&mut reader, emsg, is_proto)?;
        Ok((emsg, is_proto, header, reader.position()))
    }

    pub fn emsg(&self) -> EMsg {
        self.emsg
    }

    pub fn is_proto(&self) -> bool {
        self.is_proto
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn target_job_id(&self) -> JobId {
        self.header.target_job_id()
    }

    pub fn source_job_id(&self) -> JobId {
        self.header.source_job_id()
    }

    pub fn steam_id(&self) -> Option<SteamId> {
        self.header.steam_id()
    }

    pub fn session_id(&self) -> Option<i32> {
        self.header.session_id()
    }

    /// Header plus body, exactly as received.
    pub fn raw(&self) -> &Bytes {
        &self.data
    }

    /// The message body following the header.
    pub fn body(&self) -> Bytes {
        self.data.slice(self.body_offset..)
    }

    /// Decode the body as a protobuf message.
    ///
    /// # Errors
    /// Returns `MalformedHeader` if the packet does not carry a protobuf header
    pub fn read_proto<M: prost::Message + Default>(&self) -> Result<M> {
        if !self.is_proto {
            return Err(ProtocolError::MalformedHeader(format!(
                "{} is not a protobuf message",
                self.emsg
            )));
        }
        Ok(M::decode(self.body())?)
    }

    /// Decode a fixed-layout body, returning it with any trailing payload.
    pub fn read_msg<T: Decode>(&self) -> Result<(T, Bytes)> {
        let body = self.body();
        let mut reader = BinaryReader::new(&body);
        let msg = T::decode(&mut reader)?;
        let consumed = reader.position();
        Ok((msg, body.slice(consumed..)))
    }
}

/// A game-coordinator message tunnelled through the main channel.
#[derive(Debug, Clone)]
pub struct GcPacket {
    pub app_id: u32,
    pub msg_type: u32,
    pub is_proto: bool,
    pub header: GcHeader,
    pub body: Bytes,
}

impl GcPacket {
    /// Decode the GC header selected by the protobuf bit of `msg_type`.
    pub fn new(app_id: u32, msg_type: u32, payload: Bytes) -> Result<Self> {
        let (kind, is_proto) = EMsg::from_raw(msg_type);
        let mut reader = BinaryReader::new(&payload);
        let header = if is_proto {
            GcHeader::Protobuf(MsgGcHdrProtoBuf::decode(&mut reader)?)
        } else {
            GcHeader::Plain(MsgGcHdr::decode(&mut reader)?)
        };
        let body = payload.slice(reader.position()..);

        Ok(Self {
            app_id,
            msg_type: kind.0,
            is_proto,
            header,
            body,
        })
    }

    pub fn target_job_id(&self) -> JobId {
        self.header.target_job_id()
    }

    pub fn read_proto<M: prost::Message + Default>(&self) -> Result<M> {
        Ok(M::decode(self.body.clone())?)
    }
}
