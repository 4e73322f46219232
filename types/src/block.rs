//! Full blocks and BIP37 merkle blocks.

use bytes::BufMut;

use crate::encoding::{
    var_bytes_size, varint_size, DecodeResult, WireDecode, WireEncode, WireReader, WireWrite,
};
use crate::hash::Hash256;
use crate::header::BlockHeader;
use crate::tx::Tx;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn prev_block(&self) -> Hash256 {
        self.header.prev_block
    }

    pub fn has_witness(&self) -> bool {
        self.txs.iter().any(Tx::has_witness)
    }

    pub fn size(&self, witness: bool) -> usize {
        BlockHeader::SIZE
            + varint_size(self.txs.len() as u64)
            + self.txs.iter().map(|tx| tx.size(witness)).sum::<usize>()
    }

    pub fn encode_with<B: BufMut>(&self, buf: &mut B, witness: bool) {
        self.header.encode_into(buf);
        buf.put_varint(self.txs.len() as u64);
        for tx in &self.txs {
            tx.encode_with(buf, witness);
        }
    }
}

impl WireEncode for Block {
    fn wire_size(&self) -> usize {
        self.size(true)
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        self.encode_with(buf, true);
    }
}

impl WireDecode for Block {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let header = BlockHeader::decode_from(r)?;
        let count = r.read_bounded_count("block txs")?;
        let mut txs = Vec::with_capacity(count);
        for _ in 0..count {
            txs.push(Tx::decode_from(r)?);
        }
        Ok(Self { header, txs })
    }
}

/// Header plus a partial merkle tree proving a filtered set of txs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: BlockHeader,
    pub total: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<u8>,
}

impl MerkleBlock {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

impl WireEncode for MerkleBlock {
    fn wire_size(&self) -> usize {
        BlockHeader::SIZE
            + 4
            + varint_size(self.hashes.len() as u64)
            + 32 * self.hashes.len()
            + var_bytes_size(self.flags.len())
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        self.header.encode_into(buf);
        buf.put_u32_le(self.total);
        buf.put_varint(self.hashes.len() as u64);
        for hash in &self.hashes {
            buf.put_hash(hash);
        }
        buf.put_var_bytes(&self.flags);
    }
}

impl WireDecode for MerkleBlock {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let header = BlockHeader::decode_from(r)?;
        let total = r.read_u32()?;
        let count = r.read_bounded_count("merkle hashes")?;
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            hashes.push(r.read_hash()?);
        }
        let flags = r.read_var_bytes("merkle flags", r.remaining())?.to_vec();
        Ok(Self {
            header,
            total,
            hashes,
            flags,
        })
    }
}
