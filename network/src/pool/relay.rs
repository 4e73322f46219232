//! Transaction relay, address gossip, alerts, broadcasts and SPV filters.

use relaynet_protocol::packets::{
    AlertPacket, FeeFilter, RejectPacket, FINAL_ALERT_ID, MAX_ADDR, MAX_INV,
};
use relaynet_protocol::version::FEEFILTER_VERSION;
use relaynet_protocol::Packet;
use relaynet_types::{
    Block, BloomFilter, BloomUpdate, Hash256, InvItem, NetAddress, Outpoint, RejectCode,
    RejectedObject, Tx, VerifyError, WireEncode,
};
use tracing::{debug, info, warn};

use super::{announce, Pool, PoolState, WATCH_DELAY};
use crate::broadcast::{BroadcastJob, Broadcastable};
use crate::error::NetworkResult;
use crate::events::PoolNotification;
use crate::peer::PeerId;

/// Upper bound for a `feefilter` rate, in base units per kB.
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Addresses with timestamps before this are treated as unknown.
const MIN_ADDR_TIME: u64 = 100_000_000;

impl Pool {
    // -- Transactions ----------------------------------------------------------

    pub(super) fn handle_tx_inv(&self, id: PeerId, hashes: Vec<Hash256>) {
        let mut guard = self.inner.state.lock();
        if guard.syncing && !self.inner.chain.synced() {
            return;
        }
        debug!(peer = %id, count = hashes.len(), "received tx inv");
        self.get_tx(&mut guard, id, &hashes);
    }

    /// Request the transactions in `hashes` that we neither have nor are
    /// already fetching.
    fn get_tx(&self, st: &mut PoolState, id: PeerId, hashes: &[Hash256]) {
        if !st.peers.get(&id).is_some_and(|p| p.is_ready()) {
            return;
        }
        let mempool = self.inner.mempool.as_deref();
        // Check and mark in one pass so repeated hashes are requested once.
        let mut wanted = Vec::new();
        for hash in hashes {
            if st.has_tx(mempool, hash) {
                continue;
            }
            st.requested.insert(*hash);
            st.active_requests += 1;
            wanted.push(*hash);
        }
        if wanted.is_empty() {
            return;
        }

        let Some(peer) = st.peers.get_mut(&id) else {
            return;
        };
        peer.request_map.extend(wanted.iter().copied());
        debug!(peer = %peer.hostname(), count = wanted.len(), "requesting txs");
        peer.get_tx(&wanted);
    }

    pub(super) async fn handle_tx(&self, id: PeerId, tx: Tx) -> NetworkResult<()> {
        let hash = tx.txid();
        let mempool = self.inner.mempool.clone();

        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if !st.fulfill(id, &hash) {
                let Some(peer) = st.peers.get_mut(&id) else {
                    return Ok(());
                };
                peer.inv_filter.insert(hash);
                warn!(peer = %peer.hostname(), hash = %hash, "received unrequested tx");
                if mempool.is_none() {
                    st.tx_filter.insert(hash);
                }
                if mempool.as_ref().is_some_and(|m| m.has_reject(&hash)) {
                    return Err(VerifyError::tx(
                        hash,
                        RejectCode::AlreadyKnown,
                        "txn-already-in-mempool",
                        0,
                    )
                    .into());
                }
            }
        }

        let Some(mempool) = mempool else {
            self.notify(PoolNotification::Tx { hash, peer: id });
            return Ok(());
        };

        let outcome = match mempool.add_tx(&tx).await {
            Ok(missing) => {
                if !missing.is_empty() {
                    debug!(peer = %id, hash = %hash, missing = missing.len(), "requesting orphan parents");
                    let mut st = self.inner.state.lock();
                    self.get_tx(&mut st, id, &missing);
                }
                self.notify(PoolNotification::Tx { hash, peer: id });
                Ok(())
            }
            Err(err) => {
                let reject =
                    RejectPacket::from_reason(err.code, &err.reason, Some(RejectedObject::Tx(hash)));
                let mut st = self.inner.state.lock();
                self.reject_peer(&mut st, id, reject, err.score);
                Err(err.into())
            }
        };

        self.schedule_requests(id).await;
        outcome
    }

    pub(super) fn handle_not_found(&self, id: PeerId, items: Vec<InvItem>) {
        let mut st = self.inner.state.lock();
        for item in items {
            if !st.fulfill(id, &item.hash) {
                debug!(peer = %id, hash = %item.hash, "notfound for an item we did not request");
            }
        }
    }

    // -- Rejects and getdata ---------------------------------------------------

    pub(super) fn handle_reject(&self, id: PeerId, reject: RejectPacket) {
        warn!(
            peer = %id,
            message = %reject.message,
            code = %reject.code,
            reason = %reject.reason,
            hash = ?reject.hash,
            "received reject"
        );
        if let Some(hash) = &reject.hash {
            if self.inner.broadcasts.reject(hash) {
                debug!(hash = %hash, "broadcast rejected");
            }
        }
        self.notify(PoolNotification::Reject { peer: id, reject });
    }

    /// Serve broadcast items; everything else is answered with `notfound`.
    pub(super) fn handle_get_data(&self, id: PeerId, items: Vec<InvItem>) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        if items.len() > MAX_INV {
            self.increase_ban(st, id, 100);
            return;
        }
        let Some(peer) = st.peers.get(&id) else {
            return;
        };

        let mut not_found = Vec::new();
        for item in items {
            let served = match self.inner.broadcasts.get(&item.hash) {
                Some(msg @ Broadcastable::Block(_)) if item.is_block() => Some(msg),
                Some(msg @ Broadcastable::Tx(_)) if item.is_tx() => Some(msg),
                _ => None,
            };
            match served {
                Some(msg) => {
                    self.inner.broadcasts.ack(&item.hash);
                    debug!(peer = %peer.hostname(), hash = %item.hash, "serving broadcast item");
                    peer.send(msg.to_packet(item.kind.has_witness()));
                }
                None => not_found.push(item),
            }
        }
        if !not_found.is_empty() {
            peer.send(Packet::NotFound(not_found));
        }
    }

    // -- Addresses -------------------------------------------------------------

    pub(super) async fn handle_addr(&self, id: PeerId, addrs: Vec<NetAddress>) {
        if self.inner.config.ignore_discovery {
            return;
        }
        let now = self.inner.clock.now();
        let needed = self.inner.config.needed_services();

        let sync_target = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let mut added = 0usize;
            for mut addr in addrs {
                if !addr.is_routable() || !addr.has_services(needed) {
                    continue;
                }
                let ts = u64::from(addr.ts);
                if ts <= MIN_ADDR_TIME || ts > now + 10 * 60 {
                    addr.ts = now.saturating_sub(5 * 24 * 60 * 60) as u32;
                }
                if st.hosts.add(addr) {
                    added += 1;
                }
            }
            debug!(peer = %id, added, total = st.hosts.size(), "received addrs");
            self.fill_outbound(st)
        };

        if let Some(loader) = sync_target {
            self.sync_peer(loader).await;
        }
    }

    /// Answer the first `getaddr` from a peer with known hosts.
    pub(super) fn handle_get_addr(&self, id: PeerId) {
        if self.inner.config.selfish {
            return;
        }
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        let Some(peer) = st.peers.get_mut(&id) else {
            return;
        };
        if peer.sent_addr {
            debug!(peer = %peer.hostname(), "ignoring repeated getaddr");
            return;
        }
        peer.sent_addr = true;

        let addrs = st.hosts.addresses(MAX_ADDR);
        if addrs.is_empty() {
            return;
        }
        if let Some(peer) = st.peers.get(&id) {
            debug!(peer = %peer.hostname(), count = addrs.len(), "sending addrs");
            peer.send(Packet::Addr(addrs));
        }
    }

    // -- Alerts ----------------------------------------------------------------

    pub(super) fn handle_alert(&self, id: PeerId, alert: AlertPacket) {
        let now = self.inner.clock.now() as i64;
        let params = &self.inner.params;
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;

        if !alert.verify(&params.alert_key) {
            warn!(peer = %id, alert = alert.id, "peer sent a phony alert");
            self.increase_ban(st, id, 100);
            return;
        }
        if now >= alert.expiration {
            debug!(peer = %id, alert = alert.id, "ignoring expired alert");
            return;
        }
        if alert.id == FINAL_ALERT_ID && !alert.is_well_formed_final() {
            warn!(peer = %id, "peer sent a malformed final alert");
            self.increase_ban(st, id, 100);
            return;
        }
        if params.is_main() {
            warn!(peer = %id, alert = alert.id, "alert received on main network");
            self.increase_ban(st, id, 100);
            return;
        }

        info!(peer = %id, alert = alert.id, status = %alert.status_bar, "received alert");
        if now < alert.relay_until {
            for peer in st.ready_peers_mut().filter(|p| p.id != id) {
                peer.send(Packet::Alert(alert.clone()));
            }
        }
        self.notify(PoolNotification::Alert { peer: id, alert });
    }

    /// Relay a locally signed alert to every peer that has not seen it.
    pub fn send_alert(&self, alert: &AlertPacket) {
        let hash = alert.hash();
        let mut st = self.inner.state.lock();
        for peer in st.ready_peers_mut() {
            if peer.inv_filter.insert(hash) {
                peer.send(Packet::Alert(alert.clone()));
            }
        }
    }

    // -- Peer preferences ------------------------------------------------------

    pub(super) fn handle_fee_filter(&self, id: PeerId, rate: i64) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        if !(0..=MAX_MONEY).contains(&rate) {
            warn!(peer = %id, rate, "peer sent an invalid fee filter");
            self.increase_ban(st, id, 100);
            return;
        }
        if let Some(peer) = st.peers.get_mut(&id) {
            peer.fee_rate = rate;
        }
    }

    pub(super) fn handle_filter_load(&self, id: PeerId, filter: &BloomFilter) {
        if filter.is_within_constraints() {
            debug!(peer = %id, size = filter.data.len(), "peer loaded a filter");
            return;
        }
        let mut st = self.inner.state.lock();
        warn!(peer = %id, "peer sent an oversized filter");
        self.increase_ban(&mut st, id, 100);
    }

    // -- Broadcasting ----------------------------------------------------------

    /// Announce `msg` to every peer and keep it until a peer requests it,
    /// rejects it, or the inventory timeout passes.
    pub fn broadcast(&self, msg: Broadcastable) -> BroadcastJob {
        let (job, fresh) = self.inner.broadcasts.add(msg.clone());
        debug!(hash = %msg.hash(), fresh, "broadcasting");
        let mut st = self.inner.state.lock();
        for peer in st.ready_peers_mut() {
            announce(peer, &msg);
        }
        job
    }

    /// Announce a block without tracking it.
    pub fn announce_block(&self, block: &Block) {
        let mut st = self.inner.state.lock();
        for peer in st.ready_peers_mut() {
            peer.announce_block(block);
        }
    }

    /// Announce a transaction without tracking it.
    pub fn announce_tx(&self, tx: &Tx) {
        let mut st = self.inner.state.lock();
        for peer in st.ready_peers_mut() {
            peer.announce_tx(tx);
        }
    }

    pub fn send_mempool(&self) {
        let mut st = self.inner.state.lock();
        for peer in st.ready_peers_mut() {
            peer.send(Packet::Mempool);
        }
    }

    pub fn send_get_addr(&self) {
        let mut st = self.inner.state.lock();
        for peer in st.ready_peers_mut() {
            peer.send(Packet::GetAddr);
        }
    }

    /// Ask peers to only relay transactions paying at least `rate`.
    pub fn set_fee_rate(&self, rate: i64) {
        let mut st = self.inner.state.lock();
        st.fee_rate = rate;
        for peer in st.ready_peers_mut() {
            let understands = peer
                .version
                .as_ref()
                .is_some_and(|v| v.version >= FEEFILTER_VERSION);
            if understands {
                peer.send(Packet::FeeFilter(FeeFilter(rate)));
            }
        }
    }

    // -- SPV filter ------------------------------------------------------------

    /// Add `data` to the bloom filter sent to peers.
    pub fn watch(&self, data: &[u8]) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        st.spv_filter
            .get_or_insert_with(|| {
                BloomFilter::from_rate(20_000, 0.001, BloomUpdate::All, rand::random())
            })
            .add(data);
        self.update_watch(st);
    }

    /// Watch spends of `outpoint`, matched by its 36-byte wire form.
    pub fn watch_outpoint(&self, outpoint: &Outpoint) {
        self.watch(&outpoint.to_wire());
    }

    /// Reset the bloom filter to match nothing.
    pub fn unwatch(&self) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        if let Some(filter) = st.spv_filter.as_mut() {
            filter.clear();
        }
        self.update_watch(st);
    }

    pub fn set_filter(&self, filter: BloomFilter) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        st.spv_filter = Some(filter);
        self.update_watch(st);
    }

    /// Push the filter to every peer after [`WATCH_DELAY`]. Calls coalesce.
    fn update_watch(&self, st: &mut PoolState) {
        if st.watch_timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let pool = self.clone();
        st.watch_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(WATCH_DELAY).await;
            let mut st = pool.inner.state.lock();
            let Some(filter) = st.spv_filter.clone() else {
                return;
            };
            for peer in st.ready_peers_mut() {
                peer.send(Packet::FilterLoad(filter.clone()));
            }
        }));
    }
}
