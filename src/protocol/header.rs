//! Envelope headers.
//!
//! Three shapes wrap a message on the main channel and two more wrap
//! game-coordinator payloads. They share job-id plumbing but differ in layout,
//! so they are modelled as a closed [`Header`] enum decoded at a single site
//! ([`Header::decode`]), keyed by the protobuf bit and the message type.

use prost::Message;
use std::io::Write;

use crate::core::binary::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::emsg::{EMsg, EMSG_MASK, PROTO_MASK};
use crate::protocol::job::JobId;
use crate::protocol::proto::CMsgProtoBufHeader;

/// Account identity stamped on client messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SteamId(pub u64);

impl std::fmt::Display for SteamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plain header: message type plus job ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHdr {
    pub emsg: EMsg,
    pub target_job_id: JobId,
    pub source_job_id: JobId,
}

impl MsgHdr {
    pub const SIZE: usize = 20;

    pub fn new(emsg: EMsg) -> Self {
        Self {
            emsg,
            target_job_id: JobId::NONE,
            source_job_id: JobId::NONE,
        }
    }
}

impl Encode for MsgHdr {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        w.write_u32(self.emsg.to_raw(false))?;
        w.write_u64(self.target_job_id.0)?;
        w.write_u64(self.source_job_id.0)
    }
}

impl Decode for MsgHdr {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        let emsg = EMsg(r.read_u32()? & EMSG_MASK);
        Ok(Self {
            emsg,
            target_job_id: JobId(r.read_u64()?),
            source_job_id: JobId(r.read_u64()?),
        })
    }
}

/// Extended header carrying the client's identity in fixed binary fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedClientMsgHdr {
    pub emsg: EMsg,
    pub header_size: u8,
    pub header_version: u16,
    pub target_job_id: JobId,
    pub source_job_id: JobId,
    pub header_canary: u8,
    pub steam_id: SteamId,
    pub session_id: i32,
}

impl ExtendedClientMsgHdr {
    pub const SIZE: usize = 36;
    pub const HEADER_VERSION: u16 = 2;
    pub const CANARY: u8 = 239;

    pub fn new(emsg: EMsg) -> Self {
        Self {
            emsg,
            header_size: Self::SIZE as u8,
            header_version: Self::HEADER_VERSION,
            target_job_id: JobId::NONE,
            source_job_id: JobId::NONE,
            header_canary: Self::CANARY,
            steam_id: SteamId::default(),
            session_id: 0,
        }
    }
}

impl Encode for ExtendedClientMsgHdr {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        w.write_u32(self.emsg.to_raw(false))?;
        w.write_u8(self.header_size)?;
        w.write_u16(self.header_version)?;
        w.write_u64(self.target_job_id.0)?;
        w.write_u64(self.source_job_id.0)?;
        w.write_u8(self.header_canary)?;
        w.write_u64(self.steam_id.0)?;
        w.write_i32(self.session_id)
    }
}

impl Decode for ExtendedClientMsgHdr {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            emsg: EMsg(r.read_u32()? & EMSG_MASK),
            header_size: r.read_u8()?,
            header_version: r.read_u16()?,
            target_job_id: JobId(r.read_u64()?),
            source_job_id: JobId(r.read_u64()?),
            header_canary: r.read_u8()?,
            steam_id: SteamId(r.read_u64()?),
            session_id: r.read_i32()?,
        })
    }
}

fn read_proto_header(r: &mut BinaryReader<'_>) -> Result<CMsgProtoBufHeader> {
    let len = r.read_i32()?;
    if len < 0 {
        return Err(ProtocolError::MalformedHeader(
            constants::ERR_NEGATIVE_HEADER_LENGTH.into(),
        ));
    }
    let bytes = r.read_slice(len as usize)?;
    Ok(CMsgProtoBufHeader::decode(bytes)?)
}

fn write_proto_header<W: Write>(
    w: &mut BinaryWriter<W>,
    raw_type: u32,
    proto: &CMsgProtoBufHeader,
) -> Result<()> {
    let bytes = proto.encode_to_vec();
    let len = i32::try_from(bytes.len()).map_err(|_| ProtocolError::OversizedPacket(bytes.len()))?;
    w.write_u32(raw_type | PROTO_MASK)?;
    w.write_i32(len)?;
    w.write_bytes(&bytes)
}

/// Protobuf-wrapped header: the job ids and identity live in a sub-message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MsgHdrProtoBuf {
    pub emsg: EMsg,
    pub proto: CMsgProtoBufHeader,
}

impl MsgHdrProtoBuf {
    pub fn new(emsg: EMsg) -> Self {
        Self {
            emsg,
            proto: CMsgProtoBufHeader::default(),
        }
    }
}

impl Encode for MsgHdrProtoBuf {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        write_proto_header(w, self.emsg.0, &self.proto)
    }
}

impl Decode for MsgHdrProtoBuf {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        let emsg = EMsg(r.read_u32()? & EMSG_MASK);
        let proto = read_proto_header(r)?;
        Ok(Self { emsg, proto })
    }
}

/// The header found on an inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Plain(MsgHdr),
    Extended(ExtendedClientMsgHdr),
    Protobuf(MsgHdrProtoBuf),
}

impl Header {
    /// Decode the header variant selected by the protobuf bit and message type.
    pub fn decode(r: &mut BinaryReader<'_>, emsg: EMsg, is_proto: bool) -> Result<Self> {
        if emsg.uses_plain_header() {
            Ok(Header::Plain(MsgHdr::decode(r)?))
        } else if is_proto {
            Ok(Header::Protobuf(MsgHdrProtoBuf::decode(r)?))
        } else {
            Ok(Header::Extended(ExtendedClientMsgHdr::decode(r)?))
        }
    }

    pub fn emsg(&self) -> EMsg {
        match self {
            Header::Plain(h) => h.emsg,
            Header::Extended(h) => h.emsg,
            Header::Protobuf(h) => h.emsg,
        }
    }

    pub fn target_job_id(&self) -> JobId {
        match self {
            Header::Plain(h) => h.target_job_id,
            Header::Extended(h) => h.target_job_id,
            Header::Protobuf(h) => JobId(h.proto.jobid_target()),
        }
    }

    pub fn source_job_id(&self) -> JobId {
        match self {
            Header::Plain(h) => h.source_job_id,
            Header::Extended(h) => h.source_job_id,
            Header::Protobuf(h) => JobId(h.proto.jobid_source()),
        }
    }

    /// Identity carried by the header, when the variant has one.
    pub fn steam_id(&self) -> Option<SteamId> {
        match self {
            Header::Plain(_) => None,
            Header::Extended(h) => Some(h.steam_id),
            Header::Protobuf(h) => h.proto.steamid.map(SteamId),
        }
    }

    pub fn session_id(&self) -> Option<i32> {
        match self {
            Header::Plain(_) => None,
            Header::Extended(h) => Some(h.session_id),
            Header::Protobuf(h) => h.proto.client_sessionid,
        }
    }
}

impl Encode for Header {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        match self {
            Header::Plain(h) => h.encode(w),
            Header::Extended(h) => h.encode(w),
            Header::Protobuf(h) => h.encode(w),
        }
    }
}

/// Game-coordinator plain header. The message type travels outside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgGcHdr {
    pub header_version: u16,
    pub target_job_id: JobId,
    pub source_job_id: JobId,
}

impl MsgGcHdr {
    pub const HEADER_VERSION: u16 = 1;
}

impl Default for MsgGcHdr {
    fn default() -> Self {
        Self {
            header_version: Self::HEADER_VERSION,
            target_job_id: JobId::NONE,
            source_job_id: JobId::NONE,
        }
    }
}

impl Encode for MsgGcHdr {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        w.write_u16(self.header_version)?;
        w.write_u64(self.target_job_id.0)?;
        w.write_u64(self.source_job_id.0)
    }
}

impl Decode for MsgGcHdr {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            header_version: r.read_u16()?,
            target_job_id: JobId(r.read_u64()?),
            source_job_id: JobId(r.read_u64()?),
        })
    }
}

/// Game-coordinator protobuf header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MsgGcHdrProtoBuf {
    pub msg_type: u32,
    pub proto: CMsgProtoBufHeader,
}

impl Encode for MsgGcHdrProtoBuf {
    fn encode<W: Write>(&self, w: &mut BinaryWriter<W>) -> Result<()> {
        write_proto_header(w, self.msg_type, &self.proto)
    }
}

impl Decode for MsgGcHdrProtoBuf {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self> {
        let msg_type = r.read_u32()? & EMSG_MASK;
        let proto = read_proto_header(r)?;
        Ok(Self { msg_type, proto })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GcHeader {
    Plain(MsgGcHdr),
    Protobuf(MsgGcHdrProtoBuf),
}

impl GcHeader {
    pub fn target_job_id(&self) -> JobId {
        match self {
            GcHeader::Plain(h) => h.target_job_id,
            GcHeader::Protobuf(h) => JobId(h.proto.jobid_target()),
        }
    }

    pub fn source_job_id(&self) -> JobId {
        match self {
            GcHeader::Plain(h) => h.source_job_id,
            GcHeader::Protobuf(h) => JobId(h.proto.jobid_source()),
        }
    }
}
