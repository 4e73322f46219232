#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use relaynet_protocol::FrameCodec;
use relaynet_types::NetworkId;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed a raw byte stream through the frame decoder until it stalls or
    // errors. Neither path may panic.
    let mut codec = FrameCodec::new(NetworkId::Regtest.magic());
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
