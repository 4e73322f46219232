//! Wire-level value types for the relaynet peer-to-peer core.
//!
//! This crate defines the types every other crate in the workspace shares:
//! hashes, addresses, inventory items, headers, blocks, transactions, bloom
//! filters, network parameters, and the little-endian encoding helpers they
//! are built on.

pub mod address;
pub mod block;
pub mod bloom;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod header;
pub mod inv;
pub mod network;
pub mod tx;

pub use address::{services, NetAddress};
pub use block::{Block, MerkleBlock};
pub use bloom::{BloomFilter, BloomUpdate};
pub use encoding::{DecodeError, DecodeResult, WireDecode, WireEncode, WireReader, WireWrite};
pub use error::{RejectCode, RejectedObject, VerifyError};
pub use hash::{sha256d, Hash256};
pub use header::BlockHeader;
pub use inv::{InvItem, InvType};
pub use network::{NetworkId, NetworkParams};
pub use tx::{Outpoint, Tx, TxIn, TxOut};
