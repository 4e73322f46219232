//! The closed set of peer-to-peer packets and their payload codecs.
//!
//! Every packet has a stable numeric [`PacketType`] and a lowercase command
//! string. [`Packet::decode`] maps a command plus payload to a variant;
//! commands nobody knows decode to [`Packet::Unknown`] instead of failing.

mod alert;
mod control;
mod crypto;
mod filter;
mod inventory;
mod utxo;

pub use alert::{AlertPacket, FINAL_ALERT_ID, FINAL_ALERT_STATUS};
pub use control::{FeeFilter, RejectPacket, SendCmpctPacket, VersionPacket, MAX_USER_AGENT};
pub use crypto::{EncInitPacket, PUBLIC_KEY_SIZE};
pub use filter::MAX_FILTERADD_SIZE;
pub use inventory::{BlockPacket, CompactPacket, GetBlocksPacket, TxPacket, MAX_ADDR, MAX_INV};
pub use utxo::{GetUtxosPacket, UtxoCoin, UtxosPacket};

use bytes::{BufMut, Bytes, BytesMut};
use relaynet_types::encoding::{var_bytes_size, varint_size};
use relaynet_types::{
    BlockHeader, BloomFilter, DecodeError, InvItem, MerkleBlock, NetAddress, WireDecode,
    WireEncode, WireReader, WireWrite,
};

use crate::ProtocolError;

macro_rules! packet_types {
    ($($variant:ident = $code:literal => $cmd:literal,)*) => {
        /// Stable numeric identifier of each packet variant.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum PacketType {
            $($variant = $code,)*
        }

        impl PacketType {
            pub const ALL: &'static [PacketType] = &[$(PacketType::$variant,)*];

            pub fn code(self) -> u8 {
                self as u8
            }

            /// Lowercase wire command. `Unknown` has no fixed command.
            pub fn command(self) -> &'static str {
                match self {
                    $(PacketType::$variant => $cmd,)*
                }
            }

            #[allow(unreachable_patterns)]
            pub fn from_command(cmd: &str) -> Option<Self> {
                match cmd {
                    "" => None,
                    $($cmd => Some(PacketType::$variant),)*
                    _ => None,
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                Self::ALL.get(code as usize).copied()
            }
        }
    };
}

packet_types! {
    Version = 0 => "version",
    Verack = 1 => "verack",
    Ping = 2 => "ping",
    Pong = 3 => "pong",
    Alert = 4 => "alert",
    GetAddr = 5 => "getaddr",
    Addr = 6 => "addr",
    Inv = 7 => "inv",
    GetData = 8 => "getdata",
    NotFound = 9 => "notfound",
    GetBlocks = 10 => "getblocks",
    GetHeaders = 11 => "getheaders",
    Headers = 12 => "headers",
    SendHeaders = 13 => "sendheaders",
    Block = 14 => "block",
    Tx = 15 => "tx",
    Reject = 16 => "reject",
    Mempool = 17 => "mempool",
    FilterLoad = 18 => "filterload",
    FilterAdd = 19 => "filteradd",
    FilterClear = 20 => "filterclear",
    MerkleBlock = 21 => "merkleblock",
    GetUtxos = 22 => "getutxos",
    Utxos = 23 => "utxos",
    HaveWitness = 24 => "havewitness",
    FeeFilter = 25 => "feefilter",
    SendCmpct = 26 => "sendcmpct",
    CmpctBlock = 27 => "cmpctblock",
    GetBlockTxn = 28 => "getblocktxn",
    BlockTxn = 29 => "blocktxn",
    EncInit = 30 => "encinit",
    EncAck = 31 => "encack",
    AuthChallenge = 32 => "authchallenge",
    AuthReply = 33 => "authreply",
    AuthPropose = 34 => "authpropose",
    Unknown = 35 => "",
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Version(VersionPacket),
    Verack,
    /// Pre-BIP31 peers send pings without a nonce.
    Ping(Option<u64>),
    Pong(u64),
    Alert(AlertPacket),
    GetAddr,
    Addr(Vec<NetAddress>),
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    NotFound(Vec<InvItem>),
    GetBlocks(GetBlocksPacket),
    GetHeaders(GetBlocksPacket),
    Headers(Vec<BlockHeader>),
    SendHeaders,
    Block(BlockPacket),
    Tx(TxPacket),
    Reject(RejectPacket),
    Mempool,
    FilterLoad(BloomFilter),
    FilterAdd(Vec<u8>),
    FilterClear,
    MerkleBlock(MerkleBlock),
    GetUtxos(GetUtxosPacket),
    Utxos(UtxosPacket),
    HaveWitness,
    FeeFilter(FeeFilter),
    SendCmpct(SendCmpctPacket),
    CmpctBlock(CompactPacket),
    GetBlockTxn(CompactPacket),
    BlockTxn(CompactPacket),
    EncInit(EncInitPacket),
    EncAck([u8; PUBLIC_KEY_SIZE]),
    AuthChallenge([u8; 32]),
    AuthReply([u8; 64]),
    AuthPropose([u8; 32]),
    Unknown { command: String, data: Bytes },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Version(_) => PacketType::Version,
            Packet::Verack => PacketType::Verack,
            Packet::Ping(_) => PacketType::Ping,
            Packet::Pong(_) => PacketType::Pong,
            Packet::Alert(_) => PacketType::Alert,
            Packet::GetAddr => PacketType::GetAddr,
            Packet::Addr(_) => PacketType::Addr,
            Packet::Inv(_) => PacketType::Inv,
            Packet::GetData(_) => PacketType::GetData,
            Packet::NotFound(_) => PacketType::NotFound,
            Packet::GetBlocks(_) => PacketType::GetBlocks,
            Packet::GetHeaders(_) => PacketType::GetHeaders,
            Packet::Headers(_) => PacketType::Headers,
            Packet::SendHeaders => PacketType::SendHeaders,
            Packet::Block(_) => PacketType::Block,
            Packet::Tx(_) => PacketType::Tx,
            Packet::Reject(_) => PacketType::Reject,
            Packet::Mempool => PacketType::Mempool,
            Packet::FilterLoad(_) => PacketType::FilterLoad,
            Packet::FilterAdd(_) => PacketType::FilterAdd,
            Packet::FilterClear => PacketType::FilterClear,
            Packet::MerkleBlock(_) => PacketType::MerkleBlock,
            Packet::GetUtxos(_) => PacketType::GetUtxos,
            Packet::Utxos(_) => PacketType::Utxos,
            Packet::HaveWitness => PacketType::HaveWitness,
            Packet::FeeFilter(_) => PacketType::FeeFilter,
            Packet::SendCmpct(_) => PacketType::SendCmpct,
            Packet::CmpctBlock(_) => PacketType::CmpctBlock,
            Packet::GetBlockTxn(_) => PacketType::GetBlockTxn,
            Packet::BlockTxn(_) => PacketType::BlockTxn,
            Packet::EncInit(_) => PacketType::EncInit,
            Packet::EncAck(_) => PacketType::EncAck,
            Packet::AuthChallenge(_) => PacketType::AuthChallenge,
            Packet::AuthReply(_) => PacketType::AuthReply,
            Packet::AuthPropose(_) => PacketType::AuthPropose,
            Packet::Unknown { .. } => PacketType::Unknown,
        }
    }

    /// Wire command, including the raw command of unknown packets.
    pub fn command(&self) -> &str {
        match self {
            Packet::Unknown { command, .. } => command,
            other => other.packet_type().command(),
        }
    }

    /// Exact payload length produced by [`Packet::encode`].
    pub fn size(&self) -> usize {
        match self {
            Packet::Verack
            | Packet::GetAddr
            | Packet::SendHeaders
            | Packet::Mempool
            | Packet::FilterClear
            | Packet::HaveWitness => 0,
            Packet::Version(p) => p.size(),
            Packet::Ping(nonce) => nonce.map_or(0, |_| 8),
            Packet::Pong(_) => 8,
            Packet::Alert(p) => p.size(),
            Packet::Addr(addrs) => {
                varint_size(addrs.len() as u64) + addrs.len() * NetAddress::FULL_SIZE
            }
            Packet::Inv(items) | Packet::GetData(items) | Packet::NotFound(items) => {
                varint_size(items.len() as u64) + items.len() * InvItem::SIZE
            }
            Packet::GetBlocks(p) | Packet::GetHeaders(p) => p.size(),
            Packet::Headers(headers) => {
                varint_size(headers.len() as u64) + headers.len() * (BlockHeader::SIZE + 1)
            }
            Packet::Block(p) => p.block.size(p.witness),
            Packet::Tx(p) => p.tx.size(p.witness),
            Packet::Reject(p) => p.size(),
            Packet::FilterLoad(f) => var_bytes_size(f.data.len()) + 9,
            Packet::FilterAdd(data) => var_bytes_size(data.len()),
            Packet::MerkleBlock(mb) => mb.wire_size(),
            Packet::GetUtxos(p) => p.size(),
            Packet::Utxos(p) => p.size(),
            Packet::FeeFilter(_) => 8,
            Packet::SendCmpct(_) => 9,
            Packet::CmpctBlock(p) | Packet::GetBlockTxn(p) | Packet::BlockTxn(p) => p.data.len(),
            Packet::EncInit(_) => PUBLIC_KEY_SIZE + 1,
            Packet::EncAck(_) => PUBLIC_KEY_SIZE,
            Packet::AuthChallenge(_) | Packet::AuthPropose(_) => 32,
            Packet::AuthReply(_) => 64,
            Packet::Unknown { data, .. } => data.len(),
        }
    }

    /// Check the list and string caps that [`Packet::encode`] asserts.
    pub fn check_limits(&self) -> Result<(), ProtocolError> {
        match self {
            Packet::Inv(items) | Packet::GetData(items) | Packet::NotFound(items) => {
                inventory::check_count("inventory", items.len(), MAX_INV)
            }
            Packet::Addr(addrs) => inventory::check_count("addr", addrs.len(), MAX_ADDR),
            Packet::Reject(p) => {
                RejectPacket::new(p.message.as_str(), p.code, p.reason.as_str(), p.hash)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Serialize the payload (without the frame header).
    ///
    /// Panics if an inventory or address list is over its cap; see
    /// [`Packet::check_limits`].
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        match self {
            Packet::Verack
            | Packet::GetAddr
            | Packet::SendHeaders
            | Packet::Mempool
            | Packet::FilterClear
            | Packet::HaveWitness => {}
            Packet::Version(p) => p.encode_into(buf),
            Packet::Ping(nonce) => {
                if let Some(nonce) = nonce {
                    buf.put_u64_le(*nonce);
                }
            }
            Packet::Pong(nonce) => buf.put_u64_le(*nonce),
            Packet::Alert(p) => p.encode_into(buf),
            Packet::Addr(addrs) => {
                assert!(addrs.len() <= MAX_ADDR, "too many addresses");
                buf.put_varint(addrs.len() as u64);
                for addr in addrs {
                    addr.encode_into(buf, true);
                }
            }
            Packet::Inv(items) | Packet::GetData(items) | Packet::NotFound(items) => {
                inventory::encode_items(items, buf)
            }
            Packet::GetBlocks(p) | Packet::GetHeaders(p) => p.encode_into(buf),
            Packet::Headers(headers) => {
                buf.put_varint(headers.len() as u64);
                for header in headers {
                    header.encode_into(buf);
                    buf.put_u8(0);
                }
            }
            Packet::Block(p) => p.block.encode_with(buf, p.witness),
            Packet::Tx(p) => p.tx.encode_with(buf, p.witness),
            Packet::Reject(p) => p.encode_into(buf),
            Packet::FilterLoad(f) => filter::encode_filter(f, buf),
            Packet::FilterAdd(data) => buf.put_var_bytes(data),
            Packet::MerkleBlock(mb) => mb.encode_into(buf),
            Packet::GetUtxos(p) => p.encode_into(buf),
            Packet::Utxos(p) => p.encode_into(buf),
            Packet::FeeFilter(rate) => buf.put_i64_le(rate.0),
            Packet::SendCmpct(p) => {
                buf.put_u8(p.mode);
                buf.put_u64_le(p.version);
            }
            Packet::CmpctBlock(p) | Packet::GetBlockTxn(p) | Packet::BlockTxn(p) => {
                buf.put_slice(&p.data)
            }
            Packet::EncInit(p) => {
                buf.put_slice(&p.public_key);
                buf.put_u8(p.cipher);
            }
            Packet::EncAck(key) => buf.put_slice(key),
            Packet::AuthChallenge(hash) | Packet::AuthPropose(hash) => buf.put_slice(hash),
            Packet::AuthReply(sig) => buf.put_slice(sig),
            Packet::Unknown { data, .. } => buf.put_slice(data),
        }
    }

    /// Parse a payload received under `command`.
    pub fn decode(command: &str, data: &[u8]) -> Result<Packet, ProtocolError> {
        let Some(kind) = PacketType::from_command(command) else {
            return Ok(Packet::Unknown {
                command: command.to_string(),
                data: Bytes::copy_from_slice(data),
            });
        };
        let mut r = WireReader::new(data);
        let packet = match kind {
            PacketType::Version => Packet::Version(VersionPacket::decode_from(&mut r)?),
            PacketType::Verack => Packet::Verack,
            PacketType::Ping => {
                if r.remaining() >= 8 {
                    Packet::Ping(Some(r.read_u64()?))
                } else {
                    Packet::Ping(None)
                }
            }
            PacketType::Pong => Packet::Pong(r.read_u64()?),
            PacketType::Alert => Packet::Alert(AlertPacket::decode_from(&mut r)?),
            PacketType::GetAddr => Packet::GetAddr,
            PacketType::Addr => {
                let count = r.read_count("addr", MAX_ADDR)?;
                let mut addrs = Vec::with_capacity(count);
                for _ in 0..count {
                    addrs.push(NetAddress::decode_from(&mut r, true)?);
                }
                Packet::Addr(addrs)
            }
            PacketType::Inv => Packet::Inv(inventory::decode_items(&mut r)?),
            PacketType::GetData => Packet::GetData(inventory::decode_items(&mut r)?),
            PacketType::NotFound => Packet::NotFound(inventory::decode_items(&mut r)?),
            PacketType::GetBlocks => Packet::GetBlocks(GetBlocksPacket::decode_from(&mut r)?),
            PacketType::GetHeaders => Packet::GetHeaders(GetBlocksPacket::decode_from(&mut r)?),
            PacketType::Headers => {
                let count = r.read_bounded_count("headers")?;
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    headers.push(BlockHeader::decode_from(&mut r)?);
                    r.read_varint()?;
                }
                Packet::Headers(headers)
            }
            PacketType::SendHeaders => Packet::SendHeaders,
            PacketType::Block => Packet::Block(BlockPacket::decode_from(&mut r)?),
            PacketType::Tx => Packet::Tx(TxPacket::decode_from(&mut r)?),
            PacketType::Reject => Packet::Reject(RejectPacket::decode_from(&mut r)?),
            PacketType::Mempool => Packet::Mempool,
            PacketType::FilterLoad => Packet::FilterLoad(filter::decode_filter(&mut r)?),
            PacketType::FilterAdd => Packet::FilterAdd(
                r.read_var_bytes("filteradd data", MAX_FILTERADD_SIZE)?
                    .to_vec(),
            ),
            PacketType::FilterClear => Packet::FilterClear,
            PacketType::MerkleBlock => Packet::MerkleBlock(MerkleBlock::decode_from(&mut r)?),
            PacketType::GetUtxos => Packet::GetUtxos(GetUtxosPacket::decode_from(&mut r)?),
            PacketType::Utxos => Packet::Utxos(UtxosPacket::decode_from(&mut r)?),
            PacketType::HaveWitness => Packet::HaveWitness,
            PacketType::FeeFilter => Packet::FeeFilter(FeeFilter(r.read_i64()?)),
            PacketType::SendCmpct => Packet::SendCmpct(SendCmpctPacket {
                mode: r.read_u8()?,
                version: r.read_u64()?,
            }),
            PacketType::CmpctBlock => Packet::CmpctBlock(CompactPacket::from_rest(&mut r)),
            PacketType::GetBlockTxn => Packet::GetBlockTxn(CompactPacket::from_rest(&mut r)),
            PacketType::BlockTxn => Packet::BlockTxn(CompactPacket::from_rest(&mut r)),
            PacketType::EncInit => Packet::EncInit(EncInitPacket {
                public_key: r.read_array()?,
                cipher: r.read_u8()?,
            }),
            PacketType::EncAck => Packet::EncAck(r.read_array()?),
            PacketType::AuthChallenge => Packet::AuthChallenge(r.read_array()?),
            PacketType::AuthReply => Packet::AuthReply(r.read_array()?),
            PacketType::AuthPropose => Packet::AuthPropose(r.read_array()?),
            PacketType::Unknown => {
                return Err(ProtocolError::Malformed(DecodeError::Invalid("command")))
            }
        };
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_types::{Hash256, InvType};

    #[test]
    fn type_codes_are_dense_and_ordered() {
        assert_eq!(PacketType::ALL.len(), 36);
        for (i, kind) in PacketType::ALL.iter().enumerate() {
            assert_eq!(kind.code() as usize, i);
            assert_eq!(PacketType::from_code(i as u8), Some(*kind));
        }
        assert_eq!(PacketType::from_code(36), None);
    }

    #[test]
    fn commands_are_lowercase_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in PacketType::ALL.iter().filter(|k| **k != PacketType::Unknown) {
            let cmd = kind.command();
            assert_eq!(cmd, cmd.to_lowercase());
            assert!(seen.insert(cmd), "duplicate command {cmd}");
            assert_eq!(PacketType::from_command(cmd), Some(*kind));
        }
    }

    #[test]
    fn unknown_command_is_preserved() {
        let packet = Packet::decode("wtxidrelay", &[1, 2, 3]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Unknown);
        assert_eq!(packet.command(), "wtxidrelay");
        assert_eq!(packet.encode().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn ping_nonce_is_optional() {
        assert_eq!(Packet::decode("ping", &[]).unwrap(), Packet::Ping(None));
        assert_eq!(Packet::Ping(None).size(), 0);
        let ping = Packet::decode("ping", &7u64.to_le_bytes()).unwrap();
        assert_eq!(ping, Packet::Ping(Some(7)));
        assert_eq!(ping.size(), 8);
    }

    #[test]
    fn short_pong_is_malformed() {
        let err = Packet::decode("pong", &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Malformed(DecodeError::ShortRead { .. })
        ));
    }

    #[test]
    fn inventory_cap_enforced() {
        let mut raw = Vec::new();
        raw.put_varint(MAX_INV as u64 + 1);
        let err = Packet::decode("getdata", &raw).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Malformed(DecodeError::CountTooLarge { .. })
        ));
    }

    #[test]
    fn headers_carry_zero_tx_count() {
        let header = BlockHeader {
            version: 1,
            prev_block: Hash256::ZERO,
            merkle_root: Hash256::new([4; 32]),
            time: 1,
            bits: 0x207f_ffff,
            nonce: 3,
        };
        let packet = Packet::Headers(vec![header.clone(), header]);
        let raw = packet.encode();
        assert_eq!(raw.len(), 1 + 2 * 81);
        assert_eq!(raw[81], 0);
        assert_eq!(Packet::decode("headers", &raw).unwrap(), packet);
    }

    #[test]
    fn getdata_layout() {
        let packet = Packet::GetData(vec![InvItem::new(
            InvType::WitnessBlock,
            Hash256::new([0xab; 32]),
        )]);
        let raw = packet.encode();
        assert_eq!(raw.len(), packet.size());
        assert_eq!(&raw[..5], &[1, 0x02, 0, 0, 0x40]);
    }

    #[test]
    fn fixed_size_crypto_packets() {
        let init = Packet::EncInit(EncInitPacket {
            public_key: [2; PUBLIC_KEY_SIZE],
            cipher: 0,
        });
        assert_eq!(init.encode().len(), 34);
        assert_eq!(Packet::decode("encinit", &init.encode()).unwrap(), init);
        assert!(Packet::decode("authreply", &[0u8; 63]).is_err());
        assert_eq!(Packet::AuthReply([1; 64]).size(), 64);
    }
}
