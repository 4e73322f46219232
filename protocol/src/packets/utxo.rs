//! BIP64 `getutxos` / `utxos`.

use bytes::BufMut;
use relaynet_types::encoding::{var_bytes_size, varint_size};
use relaynet_types::{
    DecodeResult, Hash256, Outpoint, WireDecode, WireEncode, WireReader, WireWrite,
};

/// Height marker for coins that only exist in the mempool.
const MEMPOOL_HEIGHT: u32 = 0x7fff_ffff;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetUtxosPacket {
    pub mempool: bool,
    pub prevouts: Vec<Outpoint>,
}

impl GetUtxosPacket {
    pub fn size(&self) -> usize {
        1 + varint_size(self.prevouts.len() as u64) + Outpoint::SIZE * self.prevouts.len()
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.mempool as u8);
        buf.put_varint(self.prevouts.len() as u64);
        for prevout in &self.prevouts {
            prevout.encode_into(buf);
        }
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let mempool = r.read_u8()? == 1;
        let count = r.read_bounded_count("outpoints")?;
        let mut prevouts = Vec::with_capacity(count);
        for _ in 0..count {
            prevouts.push(Outpoint::decode_from(r)?);
        }
        Ok(Self { mempool, prevouts })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoCoin {
    pub version: u32,
    /// `None` for mempool-only coins.
    pub height: Option<u32>,
    pub value: i64,
    pub script: Vec<u8>,
}

impl UtxoCoin {
    fn size(&self) -> usize {
        4 + 4 + 8 + var_bytes_size(self.script.len())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxosPacket {
    pub height: u32,
    pub tip: Hash256,
    /// One flag per requested outpoint; decoding yields a multiple of eight.
    pub hits: Vec<bool>,
    pub coins: Vec<UtxoCoin>,
}

impl UtxosPacket {
    fn bitmap_len(&self) -> usize {
        self.hits.len().div_ceil(8)
    }

    pub fn size(&self) -> usize {
        4 + 32
            + var_bytes_size(self.bitmap_len())
            + varint_size(self.coins.len() as u64)
            + self.coins.iter().map(UtxoCoin::size).sum::<usize>()
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        let mut map = vec![0u8; self.bitmap_len()];
        for (i, hit) in self.hits.iter().enumerate() {
            map[i / 8] |= (*hit as u8) << (7 - (i % 8));
        }

        buf.put_u32_le(self.height);
        buf.put_hash(&self.tip);
        buf.put_var_bytes(&map);
        buf.put_varint(self.coins.len() as u64);
        for coin in &self.coins {
            buf.put_u32_le(coin.version);
            buf.put_u32_le(coin.height.unwrap_or(MEMPOOL_HEIGHT));
            buf.put_i64_le(coin.value);
            buf.put_var_bytes(&coin.script);
        }
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let height = r.read_u32()?;
        let tip = r.read_hash()?;
        let map = r.read_var_bytes("utxo bitmap", r.remaining())?;
        let hits = (0..map.len() * 8)
            .map(|i| (map[i / 8] >> (7 - (i % 8))) & 1 == 1)
            .collect();
        let count = r.read_bounded_count("utxo coins")?;
        let mut coins = Vec::with_capacity(count);
        for _ in 0..count {
            let version = r.read_u32()?;
            let coin_height = r.read_u32()?;
            let value = r.read_i64()?;
            let script = r.read_var_bytes("coin script", r.remaining())?.to_vec();
            coins.push(UtxoCoin {
                version,
                height: (coin_height != MEMPOOL_HEIGHT).then_some(coin_height),
                value,
                script,
            });
        }
        Ok(Self {
            height,
            tip,
            hits,
            coins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Packet;

    #[test]
    fn hit_bitmap_is_msb_first() {
        let packet = UtxosPacket {
            height: 10,
            tip: Hash256::new([1; 32]),
            hits: vec![true, false, false, false, false, false, false, true, true],
            coins: vec![],
        };
        let raw = Packet::Utxos(packet.clone()).encode();
        assert_eq!(raw.len(), packet.size());
        assert_eq!(&raw[36..39], &[2, 0b1000_0001, 0b1000_0000]);

        let Packet::Utxos(decoded) = Packet::decode("utxos", &raw).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.hits.len(), 16);
        assert_eq!(&decoded.hits[..9], &packet.hits[..]);
        assert!(decoded.hits[9..].iter().all(|h| !h));
    }

    #[test]
    fn mempool_coin_height() {
        let packet = UtxosPacket {
            height: 500,
            tip: Hash256::ZERO,
            hits: vec![true; 8],
            coins: vec![
                UtxoCoin {
                    version: 1,
                    height: None,
                    value: 1_000,
                    script: vec![0x51],
                },
                UtxoCoin {
                    version: 2,
                    height: Some(499),
                    value: 5,
                    script: vec![],
                },
            ],
        };
        let raw = Packet::Utxos(packet.clone()).encode();
        assert_eq!(raw.len(), packet.size());
        assert_eq!(&raw[43..47], &0x7fff_ffffu32.to_le_bytes());
        assert_eq!(Packet::decode("utxos", &raw).unwrap(), Packet::Utxos(packet));
    }

    #[test]
    fn getutxos_layout() {
        let packet = GetUtxosPacket {
            mempool: true,
            prevouts: vec![Outpoint::new(Hash256::new([3; 32]), 2)],
        };
        let raw = Packet::GetUtxos(packet.clone()).encode();
        assert_eq!(raw.len(), 1 + 1 + 36);
        assert_eq!(raw[0], 1);
        assert_eq!(Packet::decode("getutxos", &raw).unwrap(), Packet::GetUtxos(packet));
    }
}
