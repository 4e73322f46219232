#![no_main]

use libfuzzer_sys::fuzz_target;
use relaynet_protocol::{Packet, PacketType};

fuzz_target!(|data: &[u8]| {
    // First byte picks the packet type, the rest is the payload.
    let Some((&code, payload)) = data.split_first() else {
        return;
    };
    let Some(kind) = PacketType::from_code(code) else {
        return;
    };

    // Decoding arbitrary payloads must never panic.
    let Ok(packet) = Packet::decode(kind.command(), payload) else {
        return;
    };

    // Whatever decoded must also encode.
    let _ = packet.encode();
});
