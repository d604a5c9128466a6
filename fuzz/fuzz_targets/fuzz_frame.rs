#![no_main]

use bytes::BytesMut;
use cm_protocol::core::codec::{CipherSlot, FrameCodec};
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // plaintext and encrypted decoders over the same bytes
    let keyed = CipherSlot::new();
    let _ = keyed.install(Some(&[0x11; 32]));

    for slot in [CipherSlot::new(), keyed] {
        let mut codec = FrameCodec::new(slot).with_max_payload(64 * 1024);
        let mut buf = BytesMut::from(data);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
        let _ = codec.decode_eof(&mut buf);
    }
});
