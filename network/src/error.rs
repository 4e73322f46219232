use relaynet_types::VerifyError;
use thiserror::Error;

use crate::peer::PeerId;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    #[error("peer {0} has not completed the handshake")]
    HandshakeIncomplete(PeerId),

    #[error("peer {0} was destroyed")]
    PeerDestroyed(PeerId),

    #[error("bad header chain from {0}")]
    BadHeaderChain(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("timed out")]
    Timeout,

    #[error("pool closed")]
    PoolClosed,

    #[error("no hosts available")]
    NoHosts,

    #[error("external IP discovery failed: {0}")]
    IpDiscovery(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] relaynet_protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
