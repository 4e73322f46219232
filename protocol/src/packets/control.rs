//! Session control packets: `version`, `reject`, `feefilter`, `sendcmpct`.

use bytes::BufMut;
use relaynet_types::encoding::var_bytes_size;
use relaynet_types::{
    DecodeError, DecodeResult, Hash256, NetAddress, RejectCode, RejectedObject, VerifyError,
    WireReader, WireWrite,
};

use crate::version::{LOCAL_SERVICES, PROTOCOL_VERSION, USER_AGENT};
use crate::ProtocolError;

/// Longest user agent accepted in `version`.
pub const MAX_USER_AGENT: usize = 256;
/// Longest `reject` message (the rejected command).
pub const MAX_REJECT_MESSAGE: usize = 12;
/// Longest `reject` reason.
pub const MAX_REJECT_REASON: usize = 111;

/// Version some ancient clients send instead of 300.
const LEGACY_VERSION: u32 = 10300;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionPacket {
    pub version: u32,
    /// Only the low 32 service bits travel in `version`.
    pub services: u64,
    pub time: i64,
    pub remote: NetAddress,
    pub local: NetAddress,
    pub nonce: u64,
    pub agent: String,
    pub height: u32,
    pub no_relay: bool,
}

impl Default for VersionPacket {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            services: LOCAL_SERVICES,
            time: 0,
            remote: NetAddress::default(),
            local: NetAddress::default(),
            nonce: 0,
            agent: USER_AGENT.to_string(),
            height: 0,
            no_relay: false,
        }
    }
}

impl VersionPacket {
    pub fn has_services(&self, mask: u64) -> bool {
        self.services & mask == mask
    }

    pub fn size(&self) -> usize {
        20 + NetAddress::SIZE + NetAddress::SIZE + 8 + var_bytes_size(self.agent.len()) + 5
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.version as i32);
        buf.put_u32_le(self.services as u32);
        buf.put_u32_le(0);
        buf.put_i64_le(self.time);
        self.remote.encode_into(buf, false);
        self.local.encode_into(buf, false);
        buf.put_u64_le(self.nonce);
        buf.put_var_str(&self.agent);
        buf.put_i32_le(self.height as i32);
        buf.put_u8(if self.no_relay { 0 } else { 1 });
    }

    /// Everything after the receiving address is optional for old peers.
    pub fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let version = r.read_i32()?;
        if version < 0 {
            return Err(DecodeError::Invalid("version number"));
        }
        let services = r.read_u32()? as u64;
        r.read_u32()?;
        let time = r.read_i64()?;
        if time < 0 {
            return Err(DecodeError::Invalid("version timestamp"));
        }
        let remote = NetAddress::decode_from(r, false)?;

        let mut packet = Self {
            version: version as u32,
            services,
            time,
            remote,
            local: NetAddress::default(),
            nonce: 0,
            agent: String::new(),
            height: 0,
            no_relay: false,
        };

        if !r.is_empty() {
            packet.local = NetAddress::decode_from(r, false)?;
            packet.nonce = r.read_u64()?;
        }
        if !r.is_empty() {
            packet.agent = r.read_var_str("user agent", MAX_USER_AGENT)?;
        }
        if !r.is_empty() {
            packet.height = r.read_i32()?.max(0) as u32;
        }
        if !r.is_empty() {
            packet.no_relay = r.read_u8()? == 0;
        }
        if packet.version == LEGACY_VERSION {
            packet.version = 300;
        }
        Ok(packet)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectPacket {
    pub message: String,
    pub code: RejectCode,
    pub reason: String,
    /// Present iff `message` is `block` or `tx`.
    pub hash: Option<Hash256>,
}

impl RejectPacket {
    pub fn new(
        message: impl Into<String>,
        code: RejectCode,
        reason: impl Into<String>,
        hash: Option<Hash256>,
    ) -> Result<Self, ProtocolError> {
        let message = message.into();
        let reason = reason.into();
        if message.len() > MAX_REJECT_MESSAGE {
            return Err(ProtocolError::LimitExceeded {
                what: "reject message",
                len: message.len(),
                max: MAX_REJECT_MESSAGE,
            });
        }
        if reason.len() > MAX_REJECT_REASON {
            return Err(ProtocolError::LimitExceeded {
                what: "reject reason",
                len: reason.len(),
                max: MAX_REJECT_REASON,
            });
        }
        Ok(Self {
            message,
            code,
            reason,
            hash,
        })
    }

    /// Build a reject for a failed object. Internal codes become `invalid`
    /// and over-long reasons are truncated.
    pub fn from_reason(code: RejectCode, reason: &str, object: Option<RejectedObject>) -> Self {
        let code = if code.is_internal() {
            RejectCode::Invalid
        } else {
            code
        };
        let mut reason: String = reason.chars().filter(char::is_ascii).collect();
        reason.truncate(MAX_REJECT_REASON);
        Self {
            message: object.map(|o| o.message().to_string()).unwrap_or_default(),
            code,
            reason,
            hash: object.map(|o| o.hash()),
        }
    }

    pub fn from_error(err: &VerifyError) -> Self {
        Self::from_reason(err.code, &err.reason, err.object)
    }

    fn carries_hash(message: &str) -> bool {
        message == "block" || message == "tx"
    }

    pub fn size(&self) -> usize {
        let mut size = var_bytes_size(self.message.len()) + 1 + var_bytes_size(self.reason.len());
        if Self::carries_hash(&self.message) {
            size += 32;
        }
        size
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        debug_assert!(self.message.len() <= MAX_REJECT_MESSAGE);
        debug_assert!(self.reason.len() <= MAX_REJECT_REASON);
        buf.put_var_str(&self.message);
        buf.put_u8(self.code.wire_byte());
        buf.put_var_str(&self.reason);
        if Self::carries_hash(&self.message) {
            buf.put_hash(&self.hash.unwrap_or(Hash256::ZERO));
        }
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let message = r.read_var_str("reject message", MAX_REJECT_MESSAGE)?;
        let code = RejectCode::from_u8(r.read_u8()?);
        let reason = r.read_var_str("reject reason", MAX_REJECT_REASON)?;
        let hash = if Self::carries_hash(&message) {
            Some(r.read_hash()?)
        } else {
            None
        };
        Ok(Self {
            message,
            code,
            reason,
            hash,
        })
    }
}

/// Minimum fee rate (per kB) the sender wants relayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeFilter(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendCmpctPacket {
    pub mode: u8,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Packet;

    fn version() -> VersionPacket {
        VersionPacket {
            time: 1_500_000_000,
            remote: NetAddress::parse("8.8.8.8", 8333).unwrap(),
            local: NetAddress::parse("1.2.3.4", 8333).unwrap(),
            nonce: 0xdead_beef,
            height: 500_000,
            ..VersionPacket::default()
        }
    }

    #[test]
    fn version_size_matches_encoding() {
        let packet = version();
        let mut buf = Vec::new();
        packet.encode_into(&mut buf);
        assert_eq!(buf.len(), packet.size());
        assert_eq!(buf.len(), 85 + var_bytes_size(packet.agent.len()));
    }

    #[test]
    fn legacy_version_is_normalised() {
        let mut packet = version();
        packet.version = 10300;
        let mut buf = Vec::new();
        packet.encode_into(&mut buf);
        let decoded = VersionPacket::decode_from(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(decoded.version, 300);
    }

    #[test]
    fn truncated_version_uses_defaults() {
        let full = version();
        let mut buf = Vec::new();
        full.encode_into(&mut buf);
        // version, services, time and the receiving address only
        let decoded = VersionPacket::decode_from(&mut WireReader::new(&buf[..46])).unwrap();
        assert_eq!(decoded.remote, full.remote);
        assert!(decoded.local.is_null());
        assert_eq!(decoded.agent, "");
        assert_eq!(decoded.height, 0);
        assert!(!decoded.no_relay);
    }

    #[test]
    fn relay_flag_zero_means_no_relay() {
        let mut packet = version();
        packet.no_relay = true;
        let mut buf = Vec::new();
        packet.encode_into(&mut buf);
        assert_eq!(*buf.last().unwrap(), 0);
        let decoded = VersionPacket::decode_from(&mut WireReader::new(&buf)).unwrap();
        assert!(decoded.no_relay);
    }

    #[test]
    fn negative_fields() {
        let mut buf = Vec::new();
        version().encode_into(&mut buf);

        let mut neg_version = buf.clone();
        neg_version[..4].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(VersionPacket::decode_from(&mut WireReader::new(&neg_version)).is_err());

        let mut neg_time = buf.clone();
        neg_time[12..20].copy_from_slice(&(-5i64).to_le_bytes());
        assert!(VersionPacket::decode_from(&mut WireReader::new(&neg_time)).is_err());

        let height_at = buf.len() - 5;
        let mut neg_height = buf;
        neg_height[height_at..height_at + 4].copy_from_slice(&(-7i32).to_le_bytes());
        let decoded = VersionPacket::decode_from(&mut WireReader::new(&neg_height)).unwrap();
        assert_eq!(decoded.height, 0);
    }

    #[test]
    fn agent_at_cap_accepted() {
        let mut packet = version();
        packet.agent = "a".repeat(MAX_USER_AGENT);
        let mut buf = Vec::new();
        packet.encode_into(&mut buf);
        let decoded = VersionPacket::decode_from(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(decoded.agent, packet.agent);
        assert_eq!(decoded.height, packet.height);
    }

    #[test]
    fn oversized_agent_rejected() {
        let mut packet = version();
        packet.agent = "a".repeat(MAX_USER_AGENT + 1);
        let mut buf = Vec::new();
        packet.encode_into(&mut buf);
        assert!(matches!(
            VersionPacket::decode_from(&mut WireReader::new(&buf)),
            Err(DecodeError::StringTooLong { .. })
        ));
    }

    #[test]
    fn reject_hash_only_for_block_and_tx() {
        let tx = RejectPacket::new(
            "tx",
            RejectCode::Dust,
            "dust",
            Some(Hash256::new([5; 32])),
        )
        .unwrap();
        assert_eq!(tx.size(), 3 + 1 + 5 + 32);
        let raw = Packet::Reject(tx.clone()).encode();
        assert_eq!(Packet::decode("reject", &raw).unwrap(), Packet::Reject(tx));

        let ver = RejectPacket::new("version", RejectCode::Obsolete, "old", None).unwrap();
        assert_eq!(ver.size(), 8 + 1 + 4);
        assert_eq!(Packet::Reject(ver).encode().len(), 13);
    }

    #[test]
    fn reject_caps() {
        assert!(RejectPacket::new("x".repeat(13), RejectCode::Invalid, "", None).is_err());
        assert!(RejectPacket::new("tx", RejectCode::Invalid, "r".repeat(112), None).is_err());

        let mut raw = Vec::new();
        raw.put_var_str("tx");
        raw.put_u8(0x10);
        raw.put_var_str(&"r".repeat(112));
        assert!(Packet::decode("reject", &raw).is_err());
    }

    #[test]
    fn from_reason_collapses_internal_codes() {
        let hash = Hash256::new([9; 32]);
        let reject = RejectPacket::from_error(&VerifyError::tx(
            hash,
            RejectCode::AlreadyKnown,
            "txn-already-known",
            0,
        ));
        assert_eq!(reject.code, RejectCode::Invalid);
        assert_eq!(reject.message, "tx");
        assert_eq!(reject.hash, Some(hash));

        let long = RejectPacket::from_reason(RejectCode::Invalid, &"z".repeat(300), None);
        assert_eq!(long.reason.len(), MAX_REJECT_REASON);
        assert_eq!(long.message, "");
    }
}
