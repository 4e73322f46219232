//! Signed network alerts.
//!
//! An alert is a serialized payload plus an ECDSA signature over its double
//! SHA256, made with the network's alert key.

use bytes::BufMut;
use relaynet_types::encoding::{var_bytes_size, varint_size};
use relaynet_types::{sha256d, DecodeResult, Hash256, WireReader, WireWrite};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::version::PROTOCOL_VERSION;
use crate::ProtocolError;

/// Id of the alert that permanently retires the alert key.
pub const FINAL_ALERT_ID: i32 = 0x7fff_ffff;
pub const FINAL_ALERT_STATUS: &str = "URGENT: Alert key compromised, upgrade required";

const DEFAULT_LIFETIME_SECS: i64 = 7 * 24 * 3600;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertPacket {
    pub version: i32,
    pub relay_until: i64,
    pub expiration: i64,
    pub id: i32,
    pub cancel: i32,
    pub cancels: Vec<i32>,
    pub min_ver: i32,
    pub max_ver: i32,
    pub sub_vers: Vec<String>,
    pub priority: i32,
    pub comment: String,
    pub status_bar: String,
    pub reserved: String,
    pub signature: Vec<u8>,
}

impl AlertPacket {
    /// An unsigned alert relayed and valid for a week from `now`.
    pub fn new(now: i64) -> Self {
        Self {
            version: 1,
            relay_until: now + DEFAULT_LIFETIME_SECS,
            expiration: now + DEFAULT_LIFETIME_SECS,
            id: 1,
            cancel: 0,
            cancels: Vec::new(),
            min_ver: 10000,
            max_ver: PROTOCOL_VERSION as i32,
            sub_vers: Vec::new(),
            priority: 100,
            comment: String::new(),
            status_bar: String::new(),
            reserved: String::new(),
            signature: Vec::new(),
        }
    }

    /// The alert that announces a compromised key.
    pub fn final_alert() -> Self {
        Self {
            version: 1,
            relay_until: FINAL_ALERT_ID as i64,
            expiration: FINAL_ALERT_ID as i64,
            id: FINAL_ALERT_ID,
            cancel: FINAL_ALERT_ID - 1,
            cancels: Vec::new(),
            min_ver: 0,
            max_ver: FINAL_ALERT_ID,
            sub_vers: Vec::new(),
            priority: FINAL_ALERT_ID,
            comment: String::new(),
            status_bar: FINAL_ALERT_STATUS.to_string(),
            reserved: String::new(),
            signature: Vec::new(),
        }
    }

    /// True when a max-id alert has exactly the shape of the final alert.
    pub fn is_well_formed_final(&self) -> bool {
        self.expiration == FINAL_ALERT_ID as i64
            && self.cancel == FINAL_ALERT_ID - 1
            && self.min_ver == 0
            && self.max_ver == FINAL_ALERT_ID
            && self.sub_vers.is_empty()
            && self.priority == FINAL_ALERT_ID
            && self.status_bar == FINAL_ALERT_STATUS
    }

    fn payload_size(&self) -> usize {
        28 + varint_size(self.cancels.len() as u64)
            + 4 * self.cancels.len()
            + 8
            + varint_size(self.sub_vers.len() as u64)
            + self
                .sub_vers
                .iter()
                .map(|s| var_bytes_size(s.len()))
                .sum::<usize>()
            + 4
            + var_bytes_size(self.comment.len())
            + var_bytes_size(self.status_bar.len())
            + var_bytes_size(self.reserved.len())
    }

    /// The signed portion of the alert.
    pub fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload_size());
        buf.put_i32_le(self.version);
        buf.put_i64_le(self.relay_until);
        buf.put_i64_le(self.expiration);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.cancel);
        buf.put_varint(self.cancels.len() as u64);
        for cancel in &self.cancels {
            buf.put_i32_le(*cancel);
        }
        buf.put_i32_le(self.min_ver);
        buf.put_i32_le(self.max_ver);
        buf.put_varint(self.sub_vers.len() as u64);
        for sub in &self.sub_vers {
            buf.put_var_str(sub);
        }
        buf.put_i32_le(self.priority);
        buf.put_var_str(&self.comment);
        buf.put_var_str(&self.status_bar);
        buf.put_var_str(&self.reserved);
        buf
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.payload())
    }

    pub fn sign(&mut self, secret: &[u8]) -> Result<(), ProtocolError> {
        let key =
            SecretKey::from_slice(secret).map_err(|e| ProtocolError::BadSignature(e.to_string()))?;
        let msg = Message::from_digest(*self.hash().as_bytes());
        let sig = Secp256k1::signing_only().sign_ecdsa(&msg, &key);
        self.signature = sig.serialize_der().to_vec();
        Ok(())
    }

    /// Check the signature against a serialized public key.
    pub fn verify(&self, public_key: &[u8]) -> bool {
        let Ok(key) = PublicKey::from_slice(public_key) else {
            return false;
        };
        let Ok(mut sig) = Signature::from_der_lax(&self.signature) else {
            return false;
        };
        sig.normalize_s();
        let msg = Message::from_digest(*self.hash().as_bytes());
        Secp256k1::verification_only()
            .verify_ecdsa(&msg, &sig, &key)
            .is_ok()
    }

    pub fn size(&self) -> usize {
        let payload = self.payload_size();
        var_bytes_size(payload) + var_bytes_size(self.signature.len())
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_var_bytes(&self.payload());
        buf.put_var_bytes(&self.signature);
    }

    /// The embedded payload must be consumed exactly.
    pub fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let payload = r.read_var_bytes("alert payload", r.remaining())?;
        let signature = r.read_var_bytes("alert signature", r.remaining())?.to_vec();

        let mut p = WireReader::new(payload);
        let version = p.read_i32()?;
        let relay_until = p.read_i64()?;
        let expiration = p.read_i64()?;
        let id = p.read_i32()?;
        let cancel = p.read_i32()?;
        let count = p.read_bounded_count("alert cancels")?;
        let mut cancels = Vec::with_capacity(count);
        for _ in 0..count {
            cancels.push(p.read_i32()?);
        }
        let min_ver = p.read_i32()?;
        let max_ver = p.read_i32()?;
        let count = p.read_bounded_count("alert subversions")?;
        let mut sub_vers = Vec::with_capacity(count);
        for _ in 0..count {
            sub_vers.push(p.read_var_str("alert subversion", p.remaining())?);
        }
        let priority = p.read_i32()?;
        let comment = p.read_var_str("alert comment", p.remaining())?;
        let status_bar = p.read_var_str("alert status bar", p.remaining())?;
        let reserved = p.read_var_str("alert reserved", p.remaining())?;
        p.finish()?;

        Ok(Self {
            version,
            relay_until,
            expiration,
            id,
            cancel,
            cancels,
            min_ver,
            max_ver,
            sub_vers,
            priority,
            comment,
            status_bar,
            reserved,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Packet;
    use relaynet_types::DecodeError;

    const SECRET: [u8; 32] = [0x11; 32];

    fn public_key() -> Vec<u8> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&SECRET).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
            .serialize_uncompressed()
            .to_vec()
    }

    #[test]
    fn sign_then_verify() {
        let mut alert = AlertPacket::new(1_000);
        alert.comment = "test".into();
        alert.sub_vers = vec!["/relaynet:0.1.0/".into()];
        alert.cancels = vec![3, 4];
        alert.sign(&SECRET).unwrap();
        assert!(alert.verify(&public_key()));

        let mut tampered = alert.clone();
        tampered.priority += 1;
        assert!(!tampered.verify(&public_key()));
        assert!(!alert.verify(&[0x04; 65]));
    }

    #[test]
    fn wire_form_keeps_signature_valid() {
        let mut alert = AlertPacket::new(50);
        alert.status_bar = "maintenance".into();
        alert.sign(&SECRET).unwrap();
        let packet = Packet::Alert(alert);
        let raw = packet.encode();
        assert_eq!(raw.len(), packet.size());
        let Packet::Alert(decoded) = Packet::decode("alert", &raw).unwrap() else {
            panic!("wrong variant");
        };
        assert!(decoded.verify(&public_key()));
    }

    #[test]
    fn defaults() {
        let alert = AlertPacket::new(100);
        assert_eq!(alert.relay_until, 100 + 7 * 24 * 3600);
        assert_eq!(alert.expiration, alert.relay_until);
        assert_eq!(alert.min_ver, 10000);
        assert_eq!(alert.max_ver, PROTOCOL_VERSION as i32);
        assert_eq!(alert.priority, 100);
        assert_eq!(alert.payload().len(), alert.payload_size());
    }

    #[test]
    fn final_alert_shape() {
        assert!(AlertPacket::final_alert().is_well_formed_final());
        let mut bogus = AlertPacket::final_alert();
        bogus.status_bar = "free coins".into();
        assert!(!bogus.is_well_formed_final());
    }

    #[test]
    fn trailing_payload_bytes_rejected() {
        let alert = AlertPacket::new(0);
        let mut payload = alert.payload();
        payload.push(0);
        let mut raw = Vec::new();
        raw.put_var_bytes(&payload);
        raw.put_var_bytes(&[]);
        assert!(matches!(
            Packet::decode("alert", &raw),
            Err(ProtocolError::Malformed(DecodeError::TrailingBytes(1)))
        ));
    }
}
