#![no_main]

use libfuzzer_sys::fuzz_target;
use relaynet_types::{BlockHeader, WireDecode};

fuzz_target!(|data: &[u8]| {
    // Proof-of-work checks on arbitrary headers, including malformed
    // compact targets, must never panic.
    if let Ok(header) = BlockHeader::from_wire(data) {
        let _ = header.hash();
        let _ = header.verify();
    }
});
