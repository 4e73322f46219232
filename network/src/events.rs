//! Messages exchanged between connection tasks and the pool.
//!
//! Connection tasks own sockets only. They report what happens on the wire
//! as [`PoolEvent`]s and act on [`PeerCommand`]s; every decision is made by
//! the pool.

use relaynet_protocol::packets::{AlertPacket, RejectPacket, VersionPacket};
use relaynet_protocol::Packet;
use relaynet_types::{Hash256, NetAddress};
use tokio::sync::mpsc;

use crate::peer::PeerId;

/// What a connection task observed.
#[derive(Clone, Debug)]
pub enum PeerEvent {
    /// The socket is up and the handshake is starting.
    Connected,
    /// Both sides exchanged version and verack.
    Open(VersionPacket),
    Packet(Packet),
    /// The connection is gone. Always the last event for a peer.
    Closed,
}

#[derive(Clone, Debug)]
pub struct PoolEvent {
    pub peer: PeerId,
    pub event: PeerEvent,
}

impl PoolEvent {
    pub fn new(peer: PeerId, event: PeerEvent) -> Self {
        Self { peer, event }
    }
}

/// Instructions from the pool to a connection task.
#[derive(Clone, Debug)]
pub enum PeerCommand {
    Send(Packet),
    /// Close the socket without further I/O.
    Destroy,
}

/// Everything a connection task needs to serve one peer.
#[derive(Debug)]
pub struct PeerLink {
    pub id: PeerId,
    pub addr: NetAddress,
    pub outbound: bool,
    pub magic: u32,
    /// Our version packet, sent during the handshake.
    pub version: VersionPacket,
    pub commands: mpsc::UnboundedReceiver<PeerCommand>,
    pub events: mpsc::Sender<PoolEvent>,
}

impl PeerLink {
    /// Report an event to the pool. Returns `false` once the pool is gone.
    pub async fn emit(&self, event: PeerEvent) -> bool {
        self.events.send(PoolEvent::new(self.id, event)).await.is_ok()
    }

    /// Take every command queued so far without waiting.
    pub fn drain_commands(&mut self) -> Vec<PeerCommand> {
        let mut out = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            out.push(command);
        }
        out
    }

    /// Like [`PeerLink::drain_commands`] but keeps only the packets.
    pub fn drain_packets(&mut self) -> Vec<Packet> {
        self.drain_commands()
            .into_iter()
            .filter_map(|c| match c {
                PeerCommand::Send(packet) => Some(packet),
                PeerCommand::Destroy => None,
            })
            .collect()
    }
}

/// Observational notifications published by the pool.
#[derive(Clone, Debug)]
pub enum PoolNotification {
    /// A peer finished its handshake.
    Peer {
        id: PeerId,
        hostname: String,
        outbound: bool,
    },
    /// A new loader was elected.
    Loader { id: PeerId, hostname: String },
    /// A block was accepted by the chain.
    Block { hash: Hash256, peer: PeerId },
    /// A transaction was accepted (or seen, without a mempool).
    Tx { hash: Hash256, peer: PeerId },
    Reject { peer: PeerId, reject: RejectPacket },
    Alert { peer: PeerId, alert: AlertPacket },
}
