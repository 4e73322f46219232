//! Chain sync: headers, block announcements, block downloads and request
//! batching.

use relaynet_protocol::packets::{RejectPacket, MAX_INV};
use relaynet_types::{
    Block, BlockHeader, Hash256, InvItem, InvType, MerkleBlock, RejectCode, RejectedObject,
};
use tracing::{debug, warn};

use super::{Pool, PoolState};
use crate::error::{NetworkError, NetworkResult};
use crate::events::PoolNotification;
use crate::peer::PeerId;

/// Most headers a single `headers` packet may carry.
pub const MAX_HEADERS: usize = 2000;

/// In SPV mode, stop requesting once this many blocks are in flight.
const SPV_MAX_ACTIVE: usize = 2000;

/// Largest single SPV request batch.
const SPV_MAX_BATCH: usize = 50_000;

/// Reason the chain reports for a block whose parent is unknown.
const BAD_PREVBLK: &str = "bad-prevblk";

/// A block received from a peer, full or filtered.
pub(super) enum IncomingBlock {
    Full(Block),
    Merkle(MerkleBlock),
}

impl IncomingBlock {
    fn hash(&self) -> Hash256 {
        match self {
            Self::Full(block) => block.hash(),
            Self::Merkle(block) => block.hash(),
        }
    }
}

impl Pool {
    /// Send a `getheaders` or `getblocks` from our tip to `id`, once.
    ///
    /// Non-loader peers are only synced after the chain caught up.
    pub(super) async fn sync_peer(&self, id: PeerId) -> bool {
        {
            let mut st = self.inner.state.lock();
            if !st.syncing {
                return false;
            }
            let synced = self.inner.chain.synced();
            let Some(peer) = st.peers.get_mut(&id) else {
                return false;
            };
            if !peer.is_ready() || peer.sync_sent {
                return false;
            }
            if !peer.loader && !synced {
                return false;
            }
            peer.sync_sent = true;
        }

        let locator = self.inner.chain.locator(None).await;

        let st = self.inner.state.lock();
        let Some(peer) = st.peers.get(&id) else {
            return false;
        };
        debug!(peer = %peer.hostname(), locator = locator.len(), "syncing with peer");
        if self.inner.config.headers() {
            peer.send_get_headers(locator, None);
        } else {
            peer.send_get_blocks(locator, None);
        }
        true
    }

    // -- Headers ---------------------------------------------------------------

    pub(super) async fn handle_headers(
        &self,
        id: PeerId,
        headers: Vec<BlockHeader>,
    ) -> NetworkResult<()> {
        let sync = self.inner.sync_lock.lock().await;

        if !self.inner.config.headers() {
            return Ok(());
        }
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if !st.syncing || !st.peers.get(&id).is_some_and(|p| p.is_ready()) {
                return Ok(());
            }
            if headers.len() > MAX_HEADERS {
                warn!(peer = %id, count = headers.len(), "too many headers");
                self.increase_ban(st, id, 100);
                return Ok(());
            }
        }

        let mut last: Option<Hash256> = None;
        let mut wanted = Vec::new();
        for header in &headers {
            let hash = header.hash();

            if last.is_some_and(|prev| header.prev_block != prev) {
                let mut guard = self.inner.state.lock();
                let hostname = guard
                    .peers
                    .get(&id)
                    .map(|p| p.hostname().to_string())
                    .unwrap_or_default();
                warn!(peer = %hostname, hash = %hash, "peer sent a bad header chain");
                self.increase_ban(&mut guard, id, 100);
                return Err(NetworkError::BadHeaderChain(hostname));
            }

            if let Err(err) = header.verify() {
                let mut guard = self.inner.state.lock();
                warn!(peer = %id, hash = %hash, reason = %err.reason, "peer sent an invalid header");
                let reject = RejectPacket::from_reason(
                    RejectCode::Invalid,
                    &err.reason,
                    Some(RejectedObject::Block(hash)),
                );
                self.reject_peer(&mut guard, id, reject, 100);
                return Err(NetworkError::InvalidHeader(err.reason));
            }

            last = Some(hash);
            if !self.inner.chain.has(&hash).await {
                wanted.push(hash);
            }
        }

        debug!(peer = %id, count = headers.len(), wanted = wanted.len(), "received headers");
        {
            let mut st = self.inner.state.lock();
            for hash in wanted {
                st.queue_block(id, hash);
            }
        }

        drop(sync);
        self.schedule_requests(id).await;

        if headers.len() == MAX_HEADERS {
            if let Some(last) = last {
                let st = self.inner.state.lock();
                if let Some(peer) = st.peers.get(&id) {
                    peer.send_get_headers(vec![last], None);
                }
            }
        }
        Ok(())
    }

    // -- Inventory -------------------------------------------------------------

    pub(super) async fn handle_block_inv(
        &self,
        id: PeerId,
        hashes: Vec<Hash256>,
    ) -> NetworkResult<()> {
        let sync = self.inner.sync_lock.lock().await;
        let config = &self.inner.config;
        let chain = &self.inner.chain;

        {
            let st = self.inner.state.lock();
            if !st.syncing {
                return Ok(());
            }
            let Some(peer) = st.peers.get(&id) else {
                return Ok(());
            };
            if !chain.synced() && !peer.loader {
                return Ok(());
            }
            if config.witness && !peer.have_witness {
                return Ok(());
            }
        }

        debug!(peer = %id, count = hashes.len(), "received block inv");

        if config.headers() {
            let locator = chain.locator(None).await;
            {
                let st = self.inner.state.lock();
                if let Some(peer) = st.peers.get(&id) {
                    for hash in hashes {
                        peer.send_get_headers(locator.clone(), Some(hash));
                    }
                }
            }
            drop(sync);
            self.schedule_requests(id).await;
            return Ok(());
        }

        let last = hashes.len().saturating_sub(1);
        for (i, hash) in hashes.into_iter().enumerate() {
            if chain.has_orphan(&hash) {
                debug!(peer = %id, hash = %hash, "inv for known orphan");
                self.resolve_orphan(id, hash).await;
                continue;
            }
            if !chain.has(&hash).await {
                self.inner.state.lock().queue_block(id, hash);
                continue;
            }
            // Already have the last announced block: continue from it.
            if i == last {
                let locator = chain.locator(Some(hash)).await;
                let st = self.inner.state.lock();
                if let Some(peer) = st.peers.get(&id) {
                    peer.send_get_blocks(locator, None);
                }
            }
        }

        drop(sync);
        self.schedule_requests(id).await;
        Ok(())
    }

    /// Ask `id` for the blocks between our tip and the root of `orphan`'s
    /// chain.
    pub(super) async fn resolve_orphan(&self, id: PeerId, orphan: Hash256) {
        let Some(root) = self.inner.chain.orphan_root(&orphan) else {
            debug!(peer = %id, hash = %orphan, "orphan already resolved");
            return;
        };
        let locator = self.inner.chain.locator(None).await;
        let st = self.inner.state.lock();
        if let Some(peer) = st.peers.get(&id) {
            debug!(peer = %peer.hostname(), root = %root, "resolving orphan");
            peer.send_get_blocks(locator, Some(root));
        }
    }

    // -- Blocks ----------------------------------------------------------------

    pub(super) async fn handle_block(
        &self,
        id: PeerId,
        block: IncomingBlock,
    ) -> NetworkResult<()> {
        let hash = block.hash();
        let spv = self.inner.config.spv;

        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if !st.syncing {
                return Ok(());
            }
            let expected = matches!(
                (&block, spv),
                (IncomingBlock::Full(_), false) | (IncomingBlock::Merkle(_), true)
            );
            if !expected {
                debug!(peer = %id, hash = %hash, "ignoring block of the wrong kind");
                return Ok(());
            }
            if !st.fulfill(id, &hash) {
                if let Some(peer) = st.peers.get_mut(&id) {
                    peer.inv_filter.insert(hash);
                    warn!(peer = %peer.hostname(), hash = %hash, "received unrequested block");
                }
                return Ok(());
            }
        }

        let result = match &block {
            IncomingBlock::Full(block) => self.inner.chain.add(block).await,
            IncomingBlock::Merkle(block) => self.inner.chain.add_merkle(block).await,
        };

        let outcome = match result {
            Ok(()) => {
                self.notify(PoolNotification::Block { hash, peer: id });
                Ok(())
            }
            Err(err) if err.reason == BAD_PREVBLK => {
                if self.inner.config.headers() {
                    let mut st = self.inner.state.lock();
                    self.increase_ban(&mut st, id, 10);
                } else {
                    debug!(peer = %id, hash = %hash, "received orphan block");
                    self.resolve_orphan(id, hash).await;
                }
                Err(err.into())
            }
            Err(err) => {
                let reject = RejectPacket::from_reason(
                    err.code,
                    &err.reason,
                    Some(RejectedObject::Block(hash)),
                );
                let mut st = self.inner.state.lock();
                self.reject_peer(&mut st, id, reject, err.score);
                Err(err.into())
            }
        };

        self.schedule_requests(id).await;
        outcome
    }

    // -- Request scheduling ----------------------------------------------------

    /// Flush `id`'s block queue once the chain has drained its work.
    /// Concurrent calls coalesce.
    pub(super) async fn schedule_requests(&self, id: PeerId) {
        {
            let mut st = self.inner.state.lock();
            if st.scheduled {
                return;
            }
            st.scheduled = true;
        }

        self.inner.chain.on_drain().await;

        let mut st = self.inner.state.lock();
        st.scheduled = false;
        self.send_block_requests(&mut st, id);
    }

    fn send_block_requests(&self, st: &mut PoolState, id: PeerId) {
        let config = &self.inner.config;
        let PoolState {
            peers,
            requested,
            active_requests,
            ..
        } = st;
        let Some(peer) = peers.get_mut(&id) else {
            return;
        };
        if !peer.is_ready() || peer.queue_map.is_empty() {
            return;
        }

        let size = if config.spv {
            if *active_requests >= SPV_MAX_ACTIVE {
                return;
            }
            peer.queue_map.len().min(SPV_MAX_BATCH)
        } else {
            let size = self.inner.params.batch_size(self.inner.chain.height());
            if *active_requests >= size {
                return;
            }
            size
        };

        let mut hashes = Vec::with_capacity(size.min(peer.queue_map.len()));
        while hashes.len() < size {
            let Some(hash) = peer.queue_map.pop_front() else {
                break;
            };
            if !requested.insert(hash) {
                continue;
            }
            peer.request_map.insert(hash);
            *active_requests += 1;
            hashes.push(hash);
        }
        if hashes.is_empty() {
            return;
        }

        let kind = if config.spv {
            InvType::FilteredBlock
        } else if config.witness && peer.have_witness {
            InvType::WitnessBlock
        } else {
            InvType::Block
        };
        debug!(
            peer = %peer.hostname(),
            count = hashes.len(),
            active = *active_requests,
            "requesting blocks"
        );
        peer.get_blocks_data(&hashes, kind);
    }

    /// Split an `inv` into blocks and transactions and route each part.
    pub(super) async fn handle_inv(&self, id: PeerId, items: Vec<InvItem>) -> NetworkResult<()> {
        let mut blocks = Vec::new();
        let mut txs = Vec::new();
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if items.len() > MAX_INV {
                self.increase_ban(st, id, 100);
                return Ok(());
            }
            let Some(peer) = st.peers.get_mut(&id) else {
                return Ok(());
            };
            for item in &items {
                peer.inv_filter.insert(item.hash);
                if item.is_block() {
                    blocks.push(item.hash);
                } else if item.is_tx() {
                    txs.push(item.hash);
                }
            }
        }

        if !blocks.is_empty() {
            self.handle_block_inv(id, blocks).await?;
        }
        if !txs.is_empty() {
            self.handle_tx_inv(id, txs);
        }
        Ok(())
    }
}
