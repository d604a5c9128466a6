#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions and malformed input across the decode path

use bytes::{BufMut, Bytes, BytesMut};
use cm_protocol::config::MAX_PAYLOAD_SIZE;
use cm_protocol::core::codec::{CipherSlot, FrameCodec, MAGIC};
use cm_protocol::core::packet::Packet;
use cm_protocol::error::ProtocolError;
use cm_protocol::protocol::dispatcher::{expand_multi, multi_message};
use cm_protocol::protocol::emsg::{EMsg, PROTO_MASK};
use cm_protocol::protocol::message::OutgoingMessage;
use cm_protocol::protocol::proto::{CMsgClientHeartBeat, CMsgMulti};
use cm_protocol::utils::compression::{compress, decompress_limited};
use tokio_util::codec::Decoder;

fn raw_frame(len: u32, magic: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(len);
    buf.put_u32_le(magic);
    buf.extend_from_slice(payload);
    buf
}

// ============================================================================
// FRAMING
// ============================================================================

#[test]
fn test_zero_magic_is_rejected() {
    let mut codec = FrameCodec::default();
    let mut buf = raw_frame(4, 0, b"abcd");
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidMagic { found: 0 }));
    assert!(!err.is_clean_disconnect());
}

#[test]
fn test_oversized_length_rejected_before_payload_arrives() {
    let mut codec = FrameCodec::default();
    let mut buf = raw_frame(MAX_PAYLOAD_SIZE as u32 + 1, MAGIC, &[]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::OversizedPacket(n)) if n == MAX_PAYLOAD_SIZE + 1
    ));
}

#[test]
fn test_custom_payload_limit() {
    let mut codec = FrameCodec::default().with_max_payload(16);
    let mut buf = raw_frame(17, MAGIC, &[0; 17]);
    assert!(codec.decode(&mut buf).is_err());

    let mut buf = raw_frame(16, MAGIC, &[0; 16]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 16);
}

#[test]
fn test_truncated_frame_at_eof() {
    let mut codec = FrameCodec::default();
    let mut buf = raw_frame(10, MAGIC, b"abc");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    let err = codec.decode_eof(&mut buf).unwrap_err();
    assert!(matches!(err, ProtocolError::TruncatedInput));
    assert!(err.is_clean_disconnect());
}

#[test]
fn test_empty_frame_is_valid_but_not_a_packet() {
    let mut codec = FrameCodec::default();
    let mut buf = raw_frame(0, MAGIC, &[]);
    let payload = codec.decode(&mut buf).unwrap().unwrap();
    assert!(payload.is_empty());
    let err = Packet::from_bytes(payload).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    assert!(!err.is_clean_disconnect());
}

#[test]
fn test_garbage_under_active_cipher() {
    let slot = CipherSlot::new();
    slot.install(Some(&[9u8; 32])).unwrap();
    let mut codec = FrameCodec::new(slot);

    // not a whole number of blocks
    let mut buf = raw_frame(40, MAGIC, &[0xAB; 40]);
    assert!(codec.decode(&mut buf).is_err());

    // shorter than the encrypted IV plus one block
    let mut buf = raw_frame(16, MAGIC, &[0xAB; 16]);
    assert!(codec.decode(&mut buf).is_err());
}

// ============================================================================
// HEADERS
// ============================================================================

#[test]
fn test_negative_proto_header_length() {
    let mut data = Vec::new();
    data.extend_from_slice(&(703u32 | PROTO_MASK).to_le_bytes());
    data.extend_from_slice(&(-1i32).to_le_bytes());
    assert!(matches!(
        Packet::from_bytes(Bytes::from(data)),
        Err(ProtocolError::MalformedHeader(_))
    ));
}

#[test]
fn test_proto_header_length_past_end() {
    let mut data = Vec::new();
    data.extend_from_slice(&(703u32 | PROTO_MASK).to_le_bytes());
    data.extend_from_slice(&64i32.to_le_bytes());
    data.extend_from_slice(&[0u8; 10]);
    assert!(matches!(
        Packet::from_bytes(Bytes::from(data)),
        Err(ProtocolError::MalformedHeader(_))
    ));
}

#[test]
fn test_short_extended_header() {
    let mut data = Vec::new();
    data.extend_from_slice(&5514u32.to_le_bytes());
    data.extend_from_slice(&[36, 2, 0]);
    assert!(Packet::from_bytes(Bytes::from(data)).is_err());
}

#[test]
fn test_handshake_types_ignore_proto_bit_for_header_shape() {
    let msg = OutgoingMessage::plain(EMsg::CHANNEL_ENCRYPT_RESULT, 1i32.to_le_bytes().to_vec());
    let packet = Packet::from_bytes(msg.serialize().unwrap()).unwrap();
    assert_eq!(packet.emsg(), EMsg::CHANNEL_ENCRYPT_RESULT);
    assert_eq!(packet.body().as_ref(), &1i32.to_le_bytes());
}

// ============================================================================
// MULTI CONTAINERS
// ============================================================================

fn multi_packet(multi: &CMsgMulti) -> Packet {
    Packet::from_bytes(OutgoingMessage::protobuf(EMsg::MULTI, multi).serialize().unwrap()).unwrap()
}

#[test]
fn test_multi_record_overrun() {
    let mut body = Vec::new();
    body.extend_from_slice(&100u32.to_le_bytes());
    body.extend_from_slice(&[0u8; 8]);
    let packet = multi_packet(&CMsgMulti {
        size_unzipped: Some(0),
        message_body: Some(body),
    });
    assert!(matches!(
        expand_multi(&packet, MAX_PAYLOAD_SIZE),
        Err(ProtocolError::MalformedHeader(_))
    ));
}

#[test]
fn test_multi_decompression_bomb_is_capped() {
    let records = vec![0u8; 64 * 1024];
    let packet = multi_packet(&CMsgMulti {
        size_unzipped: Some(records.len() as u32),
        message_body: Some(compress(&records).unwrap()),
    });
    assert!(matches!(
        expand_multi(&packet, 1024),
        Err(ProtocolError::DecompressionFailure)
    ));
    assert!(decompress_limited(&compress(&records).unwrap(), 0, 1024).is_err());
}

#[test]
fn test_multi_missing_body_is_empty() {
    let packet = multi_packet(&CMsgMulti::default());
    let expansion = expand_multi(&packet, MAX_PAYLOAD_SIZE).unwrap();
    assert!(expansion.records.is_empty());
}

#[test]
fn test_multi_skips_undecodable_children() {
    let bad = Bytes::from_static(&[1, 2]);
    let good = OutgoingMessage::protobuf(EMsg::CLIENT_HEART_BEAT, &CMsgClientHeartBeat {})
        .serialize()
        .unwrap();
    let packet = Packet::from_bytes(
        multi_message(&[bad.clone(), good, bad], true)
            .unwrap()
            .serialize()
            .unwrap(),
    )
    .unwrap();
    let expansion = expand_multi(&packet, MAX_PAYLOAD_SIZE).unwrap();
    assert_eq!(expansion.packets().count(), 1);
    assert_eq!(expansion.errors().count(), 2);
}
