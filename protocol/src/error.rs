use relaynet_types::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),

    #[error("bad magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },

    #[error("bad checksum for {command}")]
    BadChecksum { command: String },

    #[error("bad command field")]
    BadCommand,

    /// The command does not fit the 12-byte frame field. Only `authchallenge`
    /// hits this; it is carried inside an encrypted session instead.
    #[error("command {command} does not fit a frame header")]
    CommandTooLong { command: String },

    #[error("{what} exceeds limit: {len} > {max}")]
    LimitExceeded {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
