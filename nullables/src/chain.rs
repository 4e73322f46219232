//! Nullable chain: an in-memory block index with scripted failures.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use relaynet_network::Chain;
use tokio::sync::watch;
use relaynet_types::{Block, Hash256, MerkleBlock, VerifyError};

#[derive(Default)]
struct ChainState {
    known: HashSet<Hash256>,
    /// Orphan hash to the root of its orphan chain.
    orphans: HashMap<Hash256, Hash256>,
    /// Errors returned when the keyed block is added.
    failures: HashMap<Hash256, VerifyError>,
    added: Vec<Hash256>,
    locator: Option<Vec<Hash256>>,
    height: u32,
    synced: bool,
    drains: usize,
}

/// A chain that accepts every block unless told otherwise.
///
/// Accepted blocks become known and advance the height by one.
pub struct NullChain {
    state: Mutex<ChainState>,
    /// `false` while drains are held.
    drain_gate: watch::Sender<bool>,
}

impl Default for NullChain {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            drain_gate: watch::Sender::new(true),
        }
    }
}

impl NullChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain at `height` that reports itself synced.
    pub fn synced_at(height: u32) -> Self {
        let chain = Self::new();
        {
            let mut st = chain.state.lock();
            st.height = height;
            st.synced = true;
        }
        chain
    }

    pub fn set_height(&self, height: u32) {
        self.state.lock().height = height;
    }

    pub fn set_synced(&self, synced: bool) {
        self.state.lock().synced = synced;
    }

    /// Pretend the block is already stored.
    pub fn insert_known(&self, hash: Hash256) {
        self.state.lock().known.insert(hash);
    }

    pub fn insert_orphan(&self, hash: Hash256, root: Hash256) {
        self.state.lock().orphans.insert(hash, root);
    }

    /// Make adding `hash` fail with `err`.
    pub fn fail_block(&self, hash: Hash256, err: VerifyError) {
        self.state.lock().failures.insert(hash, err);
    }

    /// Fixed locator returned for every request.
    pub fn set_locator(&self, locator: Vec<Hash256>) {
        self.state.lock().locator = Some(locator);
    }

    /// Hashes of accepted blocks, in order.
    pub fn added(&self) -> Vec<Hash256> {
        self.state.lock().added.clone()
    }

    /// Times the pool waited for the chain to drain.
    pub fn drains(&self) -> usize {
        self.state.lock().drains
    }

    /// Make `on_drain` wait until [`NullChain::release_drains`].
    pub fn hold_drains(&self) {
        self.drain_gate.send_replace(false);
    }

    pub fn release_drains(&self) {
        self.drain_gate.send_replace(true);
    }

    fn accept(&self, hash: Hash256) -> Result<(), VerifyError> {
        let mut st = self.state.lock();
        if let Some(err) = st.failures.get(&hash) {
            return Err(err.clone());
        }
        st.known.insert(hash);
        st.orphans.remove(&hash);
        st.added.push(hash);
        st.height += 1;
        Ok(())
    }
}

#[async_trait]
impl Chain for NullChain {
    async fn add(&self, block: &Block) -> Result<(), VerifyError> {
        self.accept(block.hash())
    }

    async fn add_merkle(&self, block: &MerkleBlock) -> Result<(), VerifyError> {
        self.accept(block.hash())
    }

    async fn has(&self, hash: &Hash256) -> bool {
        self.state.lock().known.contains(hash)
    }

    fn has_orphan(&self, hash: &Hash256) -> bool {
        self.state.lock().orphans.contains_key(hash)
    }

    fn orphan_root(&self, hash: &Hash256) -> Option<Hash256> {
        self.state.lock().orphans.get(hash).copied()
    }

    async fn locator(&self, start: Option<Hash256>) -> Vec<Hash256> {
        let st = self.state.lock();
        if let Some(locator) = &st.locator {
            return locator.clone();
        }
        match start.or_else(|| st.added.last().copied()) {
            Some(hash) => vec![hash, Hash256::ZERO],
            None => vec![Hash256::ZERO],
        }
    }

    async fn on_drain(&self) {
        self.state.lock().drains += 1;
        let mut open = self.drain_gate.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    fn height(&self) -> u32 {
        self.state.lock().height
    }

    fn synced(&self) -> bool {
        self.state.lock().synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_types::{BlockHeader, RejectCode};

    fn block(n: u8) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_block: Hash256::new([n; 32]),
                merkle_root: Hash256::ZERO,
                time: 0,
                bits: 0x207f_ffff,
                nonce: 0,
            },
            txs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn accepted_blocks_become_known() {
        let chain = NullChain::new();
        let b = block(1);
        assert!(!chain.has(&b.hash()).await);
        chain.add(&b).await.unwrap();
        assert!(chain.has(&b.hash()).await);
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.added(), vec![b.hash()]);
        assert_eq!(chain.locator(None).await[0], b.hash());
    }

    #[tokio::test]
    async fn scripted_failure() {
        let chain = NullChain::new();
        let b = block(2);
        chain.fail_block(b.hash(), VerifyError::new(RejectCode::Invalid, "bad-txns", 100));
        let err = chain.add(&b).await.unwrap_err();
        assert_eq!(err.reason, "bad-txns");
        assert!(!chain.has(&b.hash()).await);
    }

    #[tokio::test]
    async fn held_drains_wait_for_release() {
        let chain = std::sync::Arc::new(NullChain::new());
        chain.hold_drains();
        let waiting = tokio::spawn({
            let chain = chain.clone();
            async move { chain.on_drain().await }
        });
        while chain.drains() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!waiting.is_finished());
        chain.release_drains();
        waiting.await.unwrap();
    }
}
