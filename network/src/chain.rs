//! Collaborators the pool consults but does not own.
//!
//! Consensus validation and mempool admission live elsewhere; the pool only
//! needs the narrow views below.

use async_trait::async_trait;
use relaynet_types::{Block, Hash256, MerkleBlock, Tx, VerifyError};

/// The blockchain as seen by the pool.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Validate and connect a full block.
    async fn add(&self, block: &Block) -> Result<(), VerifyError>;

    /// Validate and connect a filtered block (SPV).
    async fn add_merkle(&self, block: &MerkleBlock) -> Result<(), VerifyError>;

    /// True if the block is in the main chain or stored as a side branch.
    async fn has(&self, hash: &Hash256) -> bool;

    fn has_orphan(&self, hash: &Hash256) -> bool;

    /// Root of the orphan chain `hash` belongs to.
    fn orphan_root(&self, hash: &Hash256) -> Option<Hash256>;

    /// Block locator starting at `start`, or at the tip when `None`.
    async fn locator(&self, start: Option<Hash256>) -> Vec<Hash256>;

    /// Resolves once queued chain work has been processed.
    async fn on_drain(&self);

    fn height(&self) -> u32;

    fn synced(&self) -> bool;
}

/// Transaction admission.
#[async_trait]
pub trait Mempool: Send + Sync {
    /// Admit a transaction. Returns the hashes of missing parents when the
    /// transaction is an orphan.
    async fn add_tx(&self, tx: &Tx) -> Result<Vec<Hash256>, VerifyError>;

    fn has(&self, hash: &Hash256) -> bool;

    /// True if the transaction was recently rejected.
    fn has_reject(&self, hash: &Hash256) -> bool;
}
