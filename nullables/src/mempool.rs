//! Nullable mempool: records admissions and plays back scripted results.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use relaynet_network::Mempool;
use relaynet_types::{Hash256, Tx, VerifyError};

#[derive(Default)]
struct MempoolState {
    txs: HashSet<Hash256>,
    rejects: HashSet<Hash256>,
    missing: HashMap<Hash256, Vec<Hash256>>,
    failures: HashMap<Hash256, VerifyError>,
}

#[derive(Default)]
pub struct NullMempool {
    state: Mutex<MempoolState>,
}

impl NullMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: Hash256) {
        self.state.lock().txs.insert(hash);
    }

    pub fn insert_reject(&self, hash: Hash256) {
        self.state.lock().rejects.insert(hash);
    }

    /// Report `parents` as missing when `hash` is added.
    pub fn set_missing(&self, hash: Hash256, parents: Vec<Hash256>) {
        self.state.lock().missing.insert(hash, parents);
    }

    /// Make adding `hash` fail with `err`. Failed hashes become rejects.
    pub fn fail_tx(&self, hash: Hash256, err: VerifyError) {
        self.state.lock().failures.insert(hash, err);
    }

    pub fn len(&self) -> usize {
        self.state.lock().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().txs.is_empty()
    }
}

#[async_trait]
impl Mempool for NullMempool {
    async fn add_tx(&self, tx: &Tx) -> Result<Vec<Hash256>, VerifyError> {
        let hash = tx.txid();
        let mut st = self.state.lock();
        if let Some(err) = st.failures.get(&hash).cloned() {
            st.rejects.insert(hash);
            return Err(err);
        }
        if let Some(parents) = st.missing.remove(&hash) {
            return Ok(parents);
        }
        st.txs.insert(hash);
        Ok(Vec::new())
    }

    fn has(&self, hash: &Hash256) -> bool {
        self.state.lock().txs.contains(hash)
    }

    fn has_reject(&self, hash: &Hash256) -> bool {
        self.state.lock().rejects.contains(hash)
    }
}
