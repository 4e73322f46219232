//! Inventory vectors used by `inv`, `getdata` and `notfound`.

use bytes::BufMut;

use crate::encoding::{DecodeResult, WireDecode, WireEncode, WireReader, WireWrite};
use crate::hash::Hash256;

/// Bit set on inventory types that request the witness serialization.
pub const WITNESS_FLAG: u32 = 1 << 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvType {
    Tx,
    Block,
    FilteredBlock,
    CmpctBlock,
    WitnessTx,
    WitnessBlock,
    WitnessFilteredBlock,
    Other(u32),
}

impl InvType {
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Tx => 1,
            Self::Block => 2,
            Self::FilteredBlock => 3,
            Self::CmpctBlock => 4,
            Self::WitnessTx => 1 | WITNESS_FLAG,
            Self::WitnessBlock => 2 | WITNESS_FLAG,
            Self::WitnessFilteredBlock => 3 | WITNESS_FLAG,
            Self::Other(v) => v,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::Tx,
            2 => Self::Block,
            3 => Self::FilteredBlock,
            4 => Self::CmpctBlock,
            v if v == 1 | WITNESS_FLAG => Self::WitnessTx,
            v if v == 2 | WITNESS_FLAG => Self::WitnessBlock,
            v if v == 3 | WITNESS_FLAG => Self::WitnessFilteredBlock,
            other => Self::Other(other),
        }
    }

    pub fn is_tx(self) -> bool {
        matches!(self, Self::Tx | Self::WitnessTx)
    }

    pub fn is_block(self) -> bool {
        matches!(
            self,
            Self::Block
                | Self::WitnessBlock
                | Self::FilteredBlock
                | Self::WitnessFilteredBlock
                | Self::CmpctBlock
        )
    }

    pub fn has_witness(self) -> bool {
        self.to_u32() & WITNESS_FLAG != 0
    }
}

/// A typed hash announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvItem {
    pub kind: InvType,
    pub hash: Hash256,
}

impl InvItem {
    pub const SIZE: usize = 36;

    pub fn new(kind: InvType, hash: Hash256) -> Self {
        Self { kind, hash }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self::new(InvType::Tx, hash)
    }

    pub fn block(hash: Hash256) -> Self {
        Self::new(InvType::Block, hash)
    }

    pub fn is_tx(&self) -> bool {
        self.kind.is_tx()
    }

    pub fn is_block(&self) -> bool {
        self.kind.is_block()
    }
}

impl WireEncode for InvItem {
    fn wire_size(&self) -> usize {
        Self::SIZE
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.kind.to_u32());
        buf.put_hash(&self.hash);
    }
}

impl WireDecode for InvItem {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let kind = InvType::from_u32(r.read_u32()?);
        let hash = r.read_hash()?;
        Ok(Self { kind, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn witness_types_carry_flag() {
        assert_eq!(InvType::WitnessTx.to_u32(), 0x4000_0001);
        assert_eq!(InvType::WitnessBlock.to_u32(), 0x4000_0002);
        assert_eq!(InvType::from_u32(0x4000_0003), InvType::WitnessFilteredBlock);
        assert!(InvType::WitnessBlock.has_witness());
        assert!(!InvType::Block.has_witness());
    }

    #[test]
    fn unknown_type_is_preserved() {
        let item = InvItem::new(InvType::from_u32(77), Hash256::new([3; 32]));
        let decoded = InvItem::from_wire(&item.to_wire()).unwrap();
        assert_eq!(decoded.kind, InvType::Other(77));
        assert!(!decoded.is_tx() && !decoded.is_block());
    }
}
