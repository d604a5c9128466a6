#![no_main]

use cm_protocol::core::packet::Packet;
use cm_protocol::protocol::dispatcher::expand_multi;
use cm_protocol::protocol::emsg::EMsg;
use cm_protocol::protocol::message::OutgoingMessage;
use cm_protocol::protocol::proto::CMsgMulti;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (size, body) = match data.split_first() {
        Some((&flag, rest)) if flag & 1 == 1 => (rest.len() as u32, rest),
        Some((_, rest)) => (0, rest),
        None => return,
    };
    let multi = CMsgMulti {
        size_unzipped: Some(size),
        message_body: Some(body.to_vec()),
    };
    let Ok(bytes) = OutgoingMessage::protobuf(EMsg::MULTI, &multi).serialize() else {
        return;
    };
    if let Ok(packet) = Packet::from_bytes(bytes) {
        let _ = expand_multi(&packet, 1024 * 1024);
    }
});
