#![no_main]

use bytes::Bytes;
use cm_protocol::core::packet::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // header decode must never panic, whatever the type word says
    if let Ok(packet) = Packet::from_bytes(Bytes::copy_from_slice(data)) {
        let _ = packet.body();
        let _ = packet.target_job_id();
    }
});
