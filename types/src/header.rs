//! 80-byte block headers and compact-target proof-of-work checks.

use bytes::BufMut;

use crate::encoding::{DecodeResult, WireDecode, WireEncode, WireReader, WireWrite};
use crate::error::{RejectCode, VerifyError};
use crate::hash::{sha256d, Hash256};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.to_wire())
    }

    /// True when the header hash satisfies its own compact target.
    pub fn verify_pow(&self) -> bool {
        match compact_to_target(self.bits) {
            Some(target) => hash_le_target(&self.hash(), &target),
            None => false,
        }
    }

    /// Context-free header check.
    pub fn verify(&self) -> Result<(), VerifyError> {
        if self.verify_pow() {
            Ok(())
        } else {
            Err(VerifyError::block(
                self.hash(),
                RejectCode::Invalid,
                "high-hash",
                50,
            ))
        }
    }
}

impl WireEncode for BlockHeader {
    fn wire_size(&self) -> usize {
        Self::SIZE
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.version);
        buf.put_hash(&self.prev_block);
        buf.put_hash(&self.merkle_root);
        buf.put_u32_le(self.time);
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.nonce);
    }
}

impl WireDecode for BlockHeader {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        Ok(Self {
            version: r.read_i32()?,
            prev_block: r.read_hash()?,
            merkle_root: r.read_hash()?,
            time: r.read_u32()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }
}

/// Expand compact `bits` into a little-endian 256-bit target.
///
/// Returns `None` for negative, zero or overflowing encodings.
pub fn compact_to_target(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as usize;
    let mut mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 || mantissa == 0 {
        return None;
    }

    let mut target = [0u8; 32];
    if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        target[..4].copy_from_slice(&mantissa.to_le_bytes());
    } else {
        let bytes = mantissa.to_le_bytes();
        for (i, b) in bytes.iter().take(3).enumerate() {
            if *b == 0 {
                continue;
            }
            let pos = exponent - 3 + i;
            if pos >= 32 {
                return None;
            }
            target[pos] = *b;
        }
    }
    if target == [0u8; 32] {
        return None;
    }
    Some(target)
}

fn hash_le_target(hash: &Hash256, target: &[u8; 32]) -> bool {
    let hash = hash.as_bytes();
    for i in (0..32).rev() {
        if hash[i] != target[i] {
            return hash[i] < target[i];
        }
    }
    true
}
