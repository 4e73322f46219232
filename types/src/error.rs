//! Reject codes and the verification error shared by chain, mempool and pool.

use std::fmt;
use thiserror::Error;

use crate::hash::Hash256;

/// Reject code carried by `reject` packets.
///
/// Codes at or above [`RejectCode::INTERNAL`] never go on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    Nonstandard,
    Dust,
    InsufficientFee,
    Checkpoint,
    HighFee,
    AlreadyKnown,
    Conflict,
    Other(u8),
}

impl RejectCode {
    /// First code reserved for local use.
    pub const INTERNAL: RejectCode = RejectCode::HighFee;

    pub fn value(self) -> u16 {
        match self {
            Self::Malformed => 0x01,
            Self::Invalid => 0x10,
            Self::Obsolete => 0x11,
            Self::Duplicate => 0x12,
            Self::Nonstandard => 0x40,
            Self::Dust => 0x41,
            Self::InsufficientFee => 0x42,
            Self::Checkpoint => 0x43,
            Self::HighFee => 0x100,
            Self::AlreadyKnown => 0x101,
            Self::Conflict => 0x102,
            Self::Other(b) => b as u16,
        }
    }

    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x01 => Self::Malformed,
            0x10 => Self::Invalid,
            0x11 => Self::Obsolete,
            0x12 => Self::Duplicate,
            0x40 => Self::Nonstandard,
            0x41 => Self::Dust,
            0x42 => Self::InsufficientFee,
            0x43 => Self::Checkpoint,
            b => Self::Other(b),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "malformed" => Self::Malformed,
            "invalid" => Self::Invalid,
            "obsolete" => Self::Obsolete,
            "duplicate" => Self::Duplicate,
            "nonstandard" => Self::Nonstandard,
            "dust" => Self::Dust,
            "insufficientfee" => Self::InsufficientFee,
            "checkpoint" => Self::Checkpoint,
            "internal" | "highfee" => Self::HighFee,
            "alreadyknown" => Self::AlreadyKnown,
            "conflict" => Self::Conflict,
            _ => return None,
        })
    }

    pub fn is_internal(self) -> bool {
        self.value() >= Self::INTERNAL.value()
    }

    /// The byte sent on the wire. Internal codes collapse to `invalid`.
    pub fn wire_byte(self) -> u8 {
        if self.is_internal() {
            Self::Invalid.value() as u8
        } else {
            self.value() as u8
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Invalid => "invalid",
            Self::Obsolete => "obsolete",
            Self::Duplicate => "duplicate",
            Self::Nonstandard => "nonstandard",
            Self::Dust => "dust",
            Self::InsufficientFee => "insufficientfee",
            Self::Checkpoint => "checkpoint",
            Self::HighFee => "highfee",
            Self::AlreadyKnown => "alreadyknown",
            Self::Conflict => "conflict",
            Self::Other(_) => "unknown",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(b) => write!(f, "unknown({b:#04x})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The object a verification failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectedObject {
    Block(Hash256),
    Tx(Hash256),
}

impl RejectedObject {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Block(_) => "block",
            Self::Tx(_) => "tx",
        }
    }

    pub fn hash(&self) -> Hash256 {
        match self {
            Self::Block(h) | Self::Tx(h) => *h,
        }
    }
}

/// A consensus or policy failure reported by the chain or mempool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("verification failure: {reason} (code={code}, score={score})")]
pub struct VerifyError {
    pub object: Option<RejectedObject>,
    pub code: RejectCode,
    pub reason: String,
    pub score: u32,
}

impl VerifyError {
    pub fn new(code: RejectCode, reason: impl Into<String>, score: u32) -> Self {
        Self {
            object: None,
            code,
            reason: reason.into(),
            score,
        }
    }

    pub fn block(hash: Hash256, code: RejectCode, reason: impl Into<String>, score: u32) -> Self {
        Self {
            object: Some(RejectedObject::Block(hash)),
            ..Self::new(code, reason, score)
        }
    }

    pub fn tx(hash: Hash256, code: RejectCode, reason: impl Into<String>, score: u32) -> Self {
        Self {
            object: Some(RejectedObject::Tx(hash)),
            ..Self::new(code, reason, score)
        }
    }
}
