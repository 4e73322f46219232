//! Protocol version management.

use relaynet_types::services;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 70014;

/// Minimum supported protocol version.
pub const MIN_PROTOCOL_VERSION: u32 = 70001;

/// First version that understands `sendheaders`.
pub const SENDHEADERS_VERSION: u32 = 70012;

/// First version that understands `feefilter`.
pub const FEEFILTER_VERSION: u32 = 70013;

/// First version that understands compact blocks.
pub const COMPACT_VERSION: u32 = 70014;

/// Services this node advertises by default.
pub const LOCAL_SERVICES: u64 = services::NETWORK | services::WITNESS;

/// User agent sent in `version`.
pub const USER_AGENT: &str = concat!("/relaynet:", env!("CARGO_PKG_VERSION"), "/");

/// Check if a peer's protocol version is compatible.
pub fn is_compatible(peer_version: u32) -> bool {
    peer_version >= MIN_PROTOCOL_VERSION
}
