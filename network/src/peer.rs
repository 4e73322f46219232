//! Pool-side record of a single connection.
//!
//! The pool owns every [`Peer`]. A peer never touches its socket directly:
//! packets are handed to the connection task through a command channel.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use relaynet_protocol::packets::{GetBlocksPacket, RejectPacket, VersionPacket};
use relaynet_protocol::Packet;
use relaynet_types::{Block, Hash256, InvItem, InvType, NetAddress, Tx};
use tokio::sync::mpsc;

use crate::events::PeerCommand;
use crate::filter::RollingFilter;

/// Pool-assigned connection identifier. Never reused within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

// ---------------------------------------------------------------------------
// Request queue
// ---------------------------------------------------------------------------

/// Insertion-ordered set of hashes waiting to be requested.
#[derive(Debug, Default)]
pub struct RequestQueue {
    order: VecDeque<Hash256>,
    members: HashSet<Hash256>,
}

impl RequestQueue {
    /// Returns `false` if `hash` was already queued.
    pub fn push(&mut self, hash: Hash256) -> bool {
        if !self.members.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        true
    }

    pub fn pop_front(&mut self) -> Option<Hash256> {
        let hash = self.order.pop_front()?;
        self.members.remove(&hash);
        Some(hash)
    }

    pub fn remove(&mut self, hash: &Hash256) -> bool {
        if !self.members.remove(hash) {
            return false;
        }
        self.order.retain(|h| h != hash);
        true
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.members.contains(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash256> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: NetAddress,
    pub outbound: bool,
    pub state: ConnectionState,
    pub destroyed: bool,
    pub loader: bool,
    /// The remote's version packet, set once the handshake completes.
    pub version: Option<VersionPacket>,
    pub have_witness: bool,
    pub prefer_headers: bool,
    /// Fee rate the remote asked us to respect; negative means none.
    pub fee_rate: i64,
    pub ban_score: u32,
    pub sync_sent: bool,
    /// Whether we already answered this peer's `getaddr`.
    pub sent_addr: bool,
    /// Hashes to request, not yet sent.
    pub queue_map: RequestQueue,
    /// Hashes requested and not yet answered.
    pub request_map: HashSet<Hash256>,
    /// Hashes the remote is known to have.
    pub inv_filter: RollingFilter,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl Peer {
    pub fn new(
        id: PeerId,
        addr: NetAddress,
        outbound: bool,
        commands: mpsc::UnboundedSender<PeerCommand>,
    ) -> Self {
        Self {
            id,
            addr,
            outbound,
            state: if outbound {
                ConnectionState::Connecting
            } else {
                ConnectionState::Handshaking
            },
            destroyed: false,
            loader: false,
            version: None,
            have_witness: false,
            prefer_headers: false,
            fee_rate: -1,
            ban_score: 0,
            sync_sent: false,
            sent_addr: false,
            queue_map: RequestQueue::default(),
            request_map: HashSet::new(),
            inv_filter: RollingFilter::default(),
            commands,
        }
    }

    pub fn hostname(&self) -> &str {
        self.addr.hostname()
    }

    /// Handshake finished and the peer is still usable.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open && !self.destroyed
    }

    /// The remote asked us not to relay transactions.
    pub fn no_relay(&self) -> bool {
        self.version.as_ref().is_some_and(|v| v.no_relay)
    }

    /// Queue a packet for the connection task. Dropped once destroyed.
    pub fn send(&self, packet: Packet) -> bool {
        if self.destroyed {
            return false;
        }
        self.commands.send(PeerCommand::Send(packet)).is_ok()
    }

    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.state = ConnectionState::Closing;
        let _ = self.commands.send(PeerCommand::Destroy);
    }

    /// Add to the ban score. Returns `true` when `threshold` is reached.
    pub fn increase_ban(&mut self, score: u32, threshold: u32) -> bool {
        self.ban_score = self.ban_score.saturating_add(score);
        self.ban_score >= threshold
    }

    // -- Requests --------------------------------------------------------------

    pub fn get_data(&self, items: Vec<InvItem>) {
        if !items.is_empty() {
            self.send(Packet::GetData(items));
        }
    }

    /// Request blocks as `kind` (block, witness block, or filtered block).
    pub fn get_blocks_data(&self, hashes: &[Hash256], kind: InvType) {
        self.get_data(hashes.iter().map(|h| InvItem::new(kind, *h)).collect());
    }

    pub fn get_tx(&self, hashes: &[Hash256]) {
        let kind = if self.have_witness {
            InvType::WitnessTx
        } else {
            InvType::Tx
        };
        self.get_data(hashes.iter().map(|h| InvItem::new(kind, *h)).collect());
    }

    pub fn send_get_headers(&self, locator: Vec<Hash256>, stop: Option<Hash256>) {
        self.send(Packet::GetHeaders(GetBlocksPacket::new(locator, stop)));
    }

    pub fn send_get_blocks(&self, locator: Vec<Hash256>, stop: Option<Hash256>) {
        self.send(Packet::GetBlocks(GetBlocksPacket::new(locator, stop)));
    }

    pub fn send_reject(&self, reject: RejectPacket) {
        self.send(Packet::Reject(reject));
    }

    // -- Announcements ---------------------------------------------------------

    /// Announce a block the remote does not know about yet. Sends a
    /// `headers` packet to peers that asked for them.
    pub fn announce_block(&mut self, block: &Block) -> bool {
        if !self.is_ready() {
            return false;
        }
        let hash = block.hash();
        if !self.inv_filter.insert(hash) {
            return false;
        }
        if self.prefer_headers {
            self.send(Packet::Headers(vec![block.header.clone()]))
        } else {
            self.send(Packet::Inv(vec![InvItem::block(hash)]))
        }
    }

    pub fn announce_tx(&mut self, tx: &Tx) -> bool {
        if !self.is_ready() || self.no_relay() {
            return false;
        }
        let hash = tx.txid();
        if !self.inv_filter.insert(hash) {
            return false;
        }
        self.send(Packet::Inv(vec![InvItem::tx(hash)]))
    }
}
