//! Packets of the BIP151 encryption and BIP150 authentication handshakes.
//!
//! Only the framing lives here; the session crypto belongs to the transport.

/// Size of a compressed secp256k1 public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncInitPacket {
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub cipher: u8,
}
