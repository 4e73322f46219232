//! Inventory, locator and chain-object packets.

use bytes::{BufMut, Bytes};
use relaynet_types::encoding::varint_size;
use relaynet_types::{
    Block, DecodeResult, Hash256, InvItem, Tx, WireDecode, WireEncode, WireReader, WireWrite,
};

use crate::ProtocolError;

/// Most items allowed in `inv`, `getdata` and `notfound`.
pub const MAX_INV: usize = 50_000;
/// Most addresses allowed in `addr`.
pub const MAX_ADDR: usize = 1_000;

/// Typed form of the list caps, checked before a packet is framed.
pub(super) fn check_count(what: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::LimitExceeded { what, len, max });
    }
    Ok(())
}

pub(super) fn encode_items<B: BufMut>(items: &[InvItem], buf: &mut B) {
    assert!(items.len() <= MAX_INV, "inventory exceeds {MAX_INV} items");
    buf.put_varint(items.len() as u64);
    for item in items {
        item.encode_into(buf);
    }
}

pub(super) fn decode_items(r: &mut WireReader<'_>) -> DecodeResult<Vec<InvItem>> {
    let count = r.read_count("inventory", MAX_INV)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(InvItem::decode_from(r)?);
    }
    Ok(items)
}

/// Body of `getblocks` and `getheaders`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBlocksPacket {
    pub version: u32,
    pub locator: Vec<Hash256>,
    /// `None` is sent as the zero hash and means "as many as allowed".
    pub stop: Option<Hash256>,
}

impl GetBlocksPacket {
    pub fn new(locator: Vec<Hash256>, stop: Option<Hash256>) -> Self {
        Self {
            version: crate::PROTOCOL_VERSION,
            locator,
            stop,
        }
    }

    pub fn size(&self) -> usize {
        4 + varint_size(self.locator.len() as u64) + 32 * self.locator.len() + 32
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.version);
        buf.put_varint(self.locator.len() as u64);
        for hash in &self.locator {
            buf.put_hash(hash);
        }
        buf.put_hash(&self.stop.unwrap_or(Hash256::ZERO));
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let version = r.read_u32()?;
        let count = r.read_bounded_count("locator")?;
        let mut locator = Vec::with_capacity(count);
        for _ in 0..count {
            locator.push(r.read_hash()?);
        }
        let stop = r.read_hash()?;
        Ok(Self {
            version,
            locator,
            stop: (!stop.is_zero()).then_some(stop),
        })
    }
}

/// A full block plus the serialization it should be sent with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPacket {
    pub block: Block,
    pub witness: bool,
}

impl BlockPacket {
    pub fn new(block: Block, witness: bool) -> Self {
        Self { block, witness }
    }

    pub(super) fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let block = Block::decode_from(r)?;
        let witness = block.has_witness();
        Ok(Self { block, witness })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxPacket {
    pub tx: Tx,
    pub witness: bool,
}

impl TxPacket {
    pub fn new(tx: Tx, witness: bool) -> Self {
        Self { tx, witness }
    }

    pub(super) fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let tx = Tx::decode_from(r)?;
        let witness = tx.has_witness();
        Ok(Self { tx, witness })
    }
}

/// `cmpctblock`, `getblocktxn` and `blocktxn` bodies.
///
/// These are parsed by the compact-block layer, so the payload is kept as
/// raw bytes here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactPacket {
    pub data: Bytes,
    pub witness: bool,
}

impl CompactPacket {
    pub fn new(data: impl Into<Bytes>, witness: bool) -> Self {
        Self {
            data: data.into(),
            witness,
        }
    }

    pub(super) fn from_rest(r: &mut WireReader<'_>) -> Self {
        Self {
            data: Bytes::copy_from_slice(r.read_rest()),
            witness: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Packet;

    #[test]
    fn zero_stop_decodes_as_none() {
        let packet = GetBlocksPacket::new(vec![Hash256::new([1; 32]), Hash256::new([2; 32])], None);
        let mut buf = Vec::new();
        packet.encode_into(&mut buf);
        assert_eq!(buf.len(), packet.size());
        assert_eq!(&buf[buf.len() - 32..], &[0u8; 32]);
        let decoded = GetBlocksPacket::decode_from(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(decoded.stop, None);
        assert_eq!(decoded.locator.len(), 2);
    }

    #[test]
    fn explicit_stop_survives() {
        let stop = Hash256::new([0xee; 32]);
        let packet = Packet::GetHeaders(GetBlocksPacket::new(vec![], Some(stop)));
        let decoded = Packet::decode("getheaders", &packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn notfound_at_cap_decodes() {
        let items = vec![InvItem::tx(Hash256::new([1; 32])); MAX_INV];
        let packet = Packet::NotFound(items);
        let raw = packet.encode();
        assert_eq!(raw.len(), packet.size());
        match Packet::decode("notfound", &raw).unwrap() {
            Packet::NotFound(items) => assert_eq!(items.len(), MAX_INV),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inventory_over_cap_is_refused() {
        let packet = Packet::Inv(vec![InvItem::block(Hash256::new([2; 32])); MAX_INV + 1]);
        assert!(matches!(
            packet.check_limits(),
            Err(ProtocolError::LimitExceeded { what: "inventory", len, max: MAX_INV })
                if len == MAX_INV + 1
        ));
        let at_cap = Packet::GetData(vec![InvItem::tx(Hash256::new([3; 32])); MAX_INV]);
        assert!(at_cap.check_limits().is_ok());
    }

    #[test]
    #[should_panic(expected = "inventory exceeds")]
    fn encoding_over_cap_panics() {
        let packet = Packet::NotFound(vec![InvItem::tx(Hash256::new([4; 32])); MAX_INV + 1]);
        let _ = packet.encode();
    }

    #[test]
    fn compact_payload_is_opaque() {
        let packet = Packet::CmpctBlock(CompactPacket::new(vec![9u8; 40], false));
        assert_eq!(packet.size(), 40);
        assert_eq!(Packet::decode("cmpctblock", &packet.encode()).unwrap(), packet);
    }
}
