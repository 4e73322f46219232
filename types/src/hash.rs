//! Double-SHA256 hashes for blocks, transactions and alerts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash in internal (little-endian) byte order.
///
/// `Display` prints the reversed form used by block explorers and RPC.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse the reversed (display) hex form.
    pub fn from_rev_hex(s: &str) -> Option<Self> {
        let mut bytes: [u8; 32] = hex::decode(s).ok()?.try_into().ok()?;
        bytes.reverse();
        Some(Self(bytes))
    }

    pub fn to_rev_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rev = self.to_rev_hex();
        write!(f, "Hash256({})", &rev[..16])
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rev_hex())
    }
}

/// SHA256(SHA256(data)).
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256(second.into())
}

/// First four bytes of the double hash, as used in frame headers.
pub fn checksum(data: &[u8]) -> [u8; 4] {
    let hash = sha256d(data);
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.0[..4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_checksum() {
        assert_eq!(checksum(&[]), [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn rev_hex_roundtrip() {
        let text = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
        let hash = Hash256::from_rev_hex(text).unwrap();
        assert_eq!(hash.as_bytes()[31], 0x00);
        assert_eq!(hash.as_bytes()[0], 0x6f);
        assert_eq!(hash.to_string(), text);
    }

    #[test]
    fn rev_hex_rejects_wrong_length() {
        assert!(Hash256::from_rev_hex("abcd").is_none());
        assert!(Hash256::from_rev_hex("zz").is_none());
    }
}
