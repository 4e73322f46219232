//! The peer pool.
//!
//! Owns every [`Peer`], elects the loader, keeps outbound slots filled and
//! routes packets from connection tasks to the sync and relay handlers.
//!
//! All mutable pool state sits behind one `parking_lot` mutex that is never
//! held across an `.await`. Header and block-inv processing are additionally
//! serialized by an async sync lock; block validation runs outside of it.

mod relay;
mod sync;

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relaynet_protocol::packets::{FeeFilter, RejectPacket, VersionPacket};
use relaynet_protocol::version::{FEEFILTER_VERSION, PROTOCOL_VERSION, SENDHEADERS_VERSION};
use relaynet_protocol::Packet;
use relaynet_types::{services, BloomFilter, BloomUpdate, Hash256, NetAddress, NetworkParams};
use relaynet_utils::{Clock, SystemClock};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastManager, Broadcastable};
use crate::chain::{Chain, Mempool};
use crate::config::PoolConfig;
use crate::connection::{run_connection, Dialer, TcpDialer};
use crate::error::{NetworkError, NetworkResult};
use crate::events::{PeerEvent, PeerLink, PoolEvent, PoolNotification};
use crate::external_ip;
use crate::filter::RollingFilter;
use crate::host_list::{HostEntry, HostList, HostManager, DEFAULT_MAX_HOSTS};
use crate::peer::{ConnectionState, Peer, PeerId};

/// Delay before refilling outbound slots after a disconnect.
pub const REFILL_DELAY: Duration = Duration::from_secs(3);

/// Delay before pushing an updated bloom filter to peers.
pub const WATCH_DELAY: Duration = Duration::from_millis(50);

/// Capacity of the connection event channel.
const EVENT_CHANNEL_SIZE: usize = 1024;

const NOTIFY_CHANNEL_SIZE: usize = 256;

/// Hosts attempted within this many seconds are passed over at first.
const RECENT_ATTEMPT_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct PoolInner {
    config: PoolConfig,
    params: NetworkParams,
    chain: Arc<dyn Chain>,
    mempool: Option<Arc<dyn Mempool>>,
    dialer: Arc<dyn Dialer>,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState>,
    /// Serializes header and block-inv processing.
    sync_lock: tokio::sync::Mutex<()>,
    broadcasts: BroadcastManager,
    events_tx: mpsc::Sender<PoolEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PoolEvent>>>,
    notify: broadcast::Sender<PoolNotification>,
    /// Our handshake nonce, used to detect self-connections.
    nonce: u64,
}

struct PoolState {
    peers: HashMap<PeerId, Peer>,
    hosts: Box<dyn HostList>,
    loader: Option<PeerId>,
    /// Every hash currently requested from some peer.
    requested: HashSet<Hash256>,
    active_requests: usize,
    /// Transactions seen, used in place of a mempool.
    tx_filter: RollingFilter,
    spv_filter: Option<BloomFilter>,
    local: NetAddress,
    fee_rate: i64,
    next_id: u64,
    connected: bool,
    syncing: bool,
    closed: bool,
    /// A block request pass is waiting for the chain to drain.
    scheduled: bool,
    refill_timer: Option<JoinHandle<()>>,
    watch_timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
}

impl PoolState {
    fn outbound_count(&self) -> usize {
        self.peers.values().filter(|p| p.outbound).count()
    }

    fn inbound_count(&self) -> usize {
        self.peers.values().filter(|p| !p.outbound).count()
    }

    fn peer_by_hostname(&self, hostname: &str) -> Option<PeerId> {
        self.peers
            .values()
            .find(|p| p.hostname() == hostname)
            .map(|p| p.id)
    }

    fn ready_peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut().filter(|p| p.is_ready())
    }

    /// Mark `hash` as answered by `id`. The only way a request leaves the
    /// request maps. Returns `false` if the peer was not asked for it.
    fn fulfill(&mut self, id: PeerId, hash: &Hash256) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        if !peer.request_map.remove(hash) {
            return false;
        }
        self.requested.remove(hash);
        self.active_requests = self.active_requests.saturating_sub(1);
        true
    }

    /// Drop a peer from the pool, releasing its in-flight requests.
    fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
        let pending: Vec<Hash256> = self
            .peers
            .get(&id)?
            .request_map
            .iter()
            .copied()
            .collect();
        for hash in &pending {
            self.fulfill(id, hash);
        }
        if self.loader == Some(id) {
            self.loader = None;
        }
        self.peers.remove(&id)
    }

    /// Queue a block for `id` unless someone is already fetching it.
    fn queue_block(&mut self, id: PeerId, hash: Hash256) {
        if self.requested.contains(&hash) {
            return;
        }
        if let Some(peer) = self.peers.get_mut(&id) {
            if peer.is_ready() {
                peer.queue_map.push(hash);
            }
        }
    }

    /// True if the transaction is known, rejected or already in flight.
    /// Without a mempool, the check records the hash as seen.
    fn has_tx(&mut self, mempool: Option<&dyn Mempool>, hash: &Hash256) -> bool {
        match mempool {
            Some(mempool) => {
                if mempool.has(hash) || mempool.has_reject(hash) {
                    return true;
                }
            }
            None => {
                if !self.tx_filter.insert(*hash) {
                    return true;
                }
            }
        }
        self.requested.contains(hash)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Read-only view of a peer, for callers outside the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub hostname: String,
    pub outbound: bool,
    pub state: ConnectionState,
    pub loader: bool,
    pub ban_score: u32,
    pub sync_sent: bool,
    pub have_witness: bool,
    pub prefer_headers: bool,
    pub fee_rate: i64,
    pub queued: Vec<Hash256>,
    pub in_flight: HashSet<Hash256>,
}

impl PeerSnapshot {
    fn of(peer: &Peer) -> Self {
        Self {
            id: peer.id,
            hostname: peer.hostname().to_string(),
            outbound: peer.outbound,
            state: peer.state,
            loader: peer.loader,
            ban_score: peer.ban_score,
            sync_sent: peer.sync_sent,
            have_witness: peer.have_witness,
            prefer_headers: peer.prefer_headers,
            fee_rate: peer.fee_rate,
            queued: peer.queue_map.iter().copied().collect(),
            in_flight: peer.request_map.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Handle to the peer pool. Cheap to clone.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(
        config: PoolConfig,
        chain: Arc<dyn Chain>,
        mempool: Option<Arc<dyn Mempool>>,
        mut hosts: Box<dyn HostList>,
        dialer: Arc<dyn Dialer>,
        clock: Arc<dyn Clock>,
    ) -> NetworkResult<Self> {
        let params = config.params();
        let host: IpAddr = config
            .host
            .parse()
            .map_err(|_| NetworkError::Config(format!("invalid listen host: {}", config.host)))?;
        let local = NetAddress::new(host, config.port(), config.local_services(), 0);

        for seed in &config.seeds {
            match NetAddress::parse(seed, params.port) {
                Some(mut addr) => {
                    addr.services = config.needed_services();
                    hosts.add(addr);
                }
                None => warn!(seed = %seed, "ignoring unparseable seed"),
            }
        }

        let spv_filter = config
            .spv
            .then(|| BloomFilter::from_rate(20_000, 0.001, BloomUpdate::All, rand::random()));

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (notify, _) = broadcast::channel(NOTIFY_CHANNEL_SIZE);

        let state = PoolState {
            peers: HashMap::new(),
            hosts,
            loader: None,
            requested: HashSet::new(),
            active_requests: 0,
            tx_filter: RollingFilter::default(),
            spv_filter,
            local,
            fee_rate: config.fee_rate,
            next_id: 1,
            connected: false,
            syncing: false,
            closed: false,
            scheduled: false,
            refill_timer: None,
            watch_timer: None,
            listener: None,
            dispatch: None,
        };

        Ok(Self {
            inner: Arc::new(PoolInner {
                broadcasts: BroadcastManager::new(config.inv_timeout()),
                params,
                chain,
                mempool,
                dialer,
                clock,
                state: Mutex::new(state),
                sync_lock: tokio::sync::Mutex::new(()),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                notify,
                nonce: rand::random::<u64>().max(1),
                config,
            }),
        })
    }

    /// A pool that dials over TCP with an in-memory host list.
    pub fn tcp(
        config: PoolConfig,
        chain: Arc<dyn Chain>,
        mempool: Option<Arc<dyn Mempool>>,
    ) -> NetworkResult<Self> {
        let hosts = Box::new(HostManager::new(DEFAULT_MAX_HOSTS, config.ban_time_secs));
        Self::new(
            config,
            chain,
            mempool,
            hosts,
            Arc::new(TcpDialer),
            Arc::new(SystemClock),
        )
    }

    // -- Accessors -------------------------------------------------------------

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Subscribe to pool notifications.
    pub fn events(&self) -> broadcast::Receiver<PoolNotification> {
        self.inner.notify.subscribe()
    }

    pub fn peer(&self, id: PeerId) -> Option<PeerSnapshot> {
        self.inner.state.lock().peers.get(&id).map(PeerSnapshot::of)
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        let st = self.inner.state.lock();
        let mut peers: Vec<_> = st.peers.values().map(PeerSnapshot::of).collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    pub fn loader(&self) -> Option<PeerId> {
        self.inner.state.lock().loader
    }

    pub fn outbound_count(&self) -> usize {
        self.inner.state.lock().outbound_count()
    }

    pub fn inbound_count(&self) -> usize {
        self.inner.state.lock().inbound_count()
    }

    /// Number of blocks and transactions currently in flight.
    pub fn active_requests(&self) -> usize {
        self.inner.state.lock().active_requests
    }

    pub fn is_requested(&self, hash: &Hash256) -> bool {
        self.inner.state.lock().requested.contains(hash)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.state.lock().syncing
    }

    /// The address we advertise to peers.
    pub fn local_address(&self) -> NetAddress {
        self.inner.state.lock().local.clone()
    }

    fn notify(&self, notification: PoolNotification) {
        // No subscribers is fine.
        let _ = self.inner.notify.send(notification);
    }

    // -- Lifecycle -------------------------------------------------------------

    /// Start dialing outbound peers.
    pub async fn connect(&self) -> NetworkResult<()> {
        let discover = {
            let st = self.inner.state.lock();
            if st.closed {
                return Err(NetworkError::PoolClosed);
            }
            if st.connected {
                return Ok(());
            }
            self.inner.config.discover_ip && st.local.is_null()
        };

        if discover {
            match external_ip::discover().await {
                Ok(ip) => {
                    info!(ip = %ip, "discovered external address");
                    self.inner.state.lock().local.set_host(ip);
                }
                Err(e) => debug!(error = %e, "could not discover external address"),
            }
        }

        let sync_target = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.hosts.size() == 0 {
                return Err(NetworkError::NoHosts);
            }
            st.connected = true;
            info!(hosts = st.hosts.size(), "connecting to network");
            self.fill_outbound(st)
        };

        self.spawn_dispatch();
        if let Some(id) = sync_target {
            self.sync_peer(id).await;
        }
        Ok(())
    }

    /// Accept inbound peers on the configured host and port. Returns the
    /// bound address.
    pub async fn listen(&self) -> NetworkResult<SocketAddr> {
        if self.inner.state.lock().closed {
            return Err(NetworkError::PoolClosed);
        }
        let config = &self.inner.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port())).await?;
        let bound = listener.local_addr()?;
        info!(addr = %bound, "listening for inbound peers");

        let pool = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => match pool.add_inbound(remote) {
                        Ok(link) => {
                            tokio::spawn(run_connection(stream, link));
                        }
                        Err(e) => debug!(peer = %remote, error = %e, "refusing inbound peer"),
                    },
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        if let Some(old) = self.inner.state.lock().listener.replace(handle) {
            old.abort();
        }
        self.spawn_dispatch();
        Ok(bound)
    }

    /// Stop accepting inbound peers. Connected peers are kept.
    pub fn unlisten(&self) {
        if let Some(handle) = self.inner.state.lock().listener.take() {
            handle.abort();
            info!("stopped listening");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner
            .state
            .lock()
            .listener
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Connect and begin chain sync with every outbound peer.
    pub async fn start_sync(&self) -> NetworkResult<()> {
        self.connect().await?;
        self.inner.state.lock().syncing = true;
        self.resync(false).await;
        Ok(())
    }

    pub fn stop_sync(&self) {
        let mut st = self.inner.state.lock();
        if !st.syncing {
            return;
        }
        st.syncing = false;
        for peer in st.peers.values_mut() {
            peer.sync_sent = false;
        }
    }

    /// Re-send sync requests, even to peers that were already asked.
    pub async fn force_sync(&self) {
        self.resync(true).await;
    }

    async fn resync(&self, force: bool) {
        let targets: Vec<PeerId> = {
            let mut st = self.inner.state.lock();
            if !st.syncing {
                return;
            }
            let mut ids = Vec::new();
            for peer in st.peers.values_mut().filter(|p| p.outbound) {
                if force {
                    peer.sync_sent = false;
                }
                ids.push(peer.id);
            }
            ids.sort();
            ids
        };
        for id in targets {
            self.sync_peer(id).await;
        }
    }

    /// Shut the pool down. Outstanding broadcast jobs fail with
    /// [`NetworkError::PoolClosed`].
    pub fn close(&self) {
        self.inner.broadcasts.close();

        let mut st = self.inner.state.lock();
        st.syncing = false;
        st.connected = false;
        st.closed = true;

        let ids: Vec<PeerId> = st.peers.keys().copied().collect();
        for id in ids {
            if let Some(mut peer) = st.remove_peer(id) {
                peer.destroy();
            }
        }
        st.requested.clear();
        st.active_requests = 0;
        st.scheduled = false;

        let timers = [
            st.refill_timer.take(),
            st.watch_timer.take(),
            st.listener.take(),
            st.dispatch.take(),
        ];
        for handle in timers.into_iter().flatten() {
            handle.abort();
        }
        info!("pool closed");
    }

    // -- Peers -----------------------------------------------------------------

    fn build_version(&self, st: &PoolState) -> VersionPacket {
        let config = &self.inner.config;
        VersionPacket {
            version: PROTOCOL_VERSION,
            services: config.local_services(),
            time: self.inner.clock.now() as i64,
            local: st.local.clone(),
            nonce: self.inner.nonce,
            agent: config.user_agent().to_string(),
            height: self.inner.chain.height(),
            no_relay: config.no_relay(),
            ..VersionPacket::default()
        }
    }

    fn create_peer(&self, st: &mut PoolState, addr: NetAddress, outbound: bool) -> PeerLink {
        let id = PeerId(st.next_id);
        st.next_id += 1;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        st.peers
            .insert(id, Peer::new(id, addr.clone(), outbound, commands_tx));
        PeerLink {
            id,
            addr,
            outbound,
            magic: self.inner.params.magic,
            version: self.build_version(st),
            commands: commands_rx,
            events: self.inner.events_tx.clone(),
        }
    }

    fn add_outbound(&self, st: &mut PoolState, addr: NetAddress) -> PeerId {
        st.hosts.mark_attempt(addr.hostname(), self.inner.clock.now());
        debug!(peer = %addr, "dialing outbound peer");
        let link = self.create_peer(st, addr, true);
        let id = link.id;
        self.inner.dialer.dial(link);
        id
    }

    /// Register an accepted socket. The caller runs the returned link.
    pub fn add_inbound(&self, remote: SocketAddr) -> NetworkResult<PeerLink> {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        if st.closed {
            return Err(NetworkError::PoolClosed);
        }
        if st.inbound_count() >= self.inner.config.max_inbound {
            return Err(NetworkError::ConnectionFailed("too many inbound peers".into()));
        }
        if st.hosts.is_banned(remote.ip(), self.inner.clock.now()) {
            return Err(NetworkError::ConnectionFailed(format!("{} is banned", remote.ip())));
        }
        let link = self.create_peer(st, NetAddress::from_socket(remote), false);
        info!(peer = %link.addr, id = %link.id, "accepted inbound peer");
        Ok(link)
    }

    /// Disconnect and forget a peer, then schedule a refill.
    fn destroy_peer(&self, st: &mut PoolState, id: PeerId) {
        if let Some(mut peer) = st.remove_peer(id) {
            peer.destroy();
            debug!(peer = %peer.hostname(), id = %id, "peer destroyed");
        }
        self.refill(st);
    }

    /// Add to a peer's ban score; at the threshold its host is banned and the
    /// peer destroyed. Returns `true` if the peer was banned.
    fn increase_ban(&self, st: &mut PoolState, id: PeerId, score: u32) -> bool {
        let Some(peer) = st.peers.get_mut(&id) else {
            return false;
        };
        if !peer.increase_ban(score, self.inner.config.ban_score) {
            debug!(peer = %peer.hostname(), score = peer.ban_score, "increased ban score");
            return false;
        }
        let addr = peer.addr.clone();
        info!(peer = %addr, score = peer.ban_score, "ban threshold exceeded");
        self.ban_host(st, &addr);
        true
    }

    /// Send a reject and charge the peer `score`.
    fn reject_peer(&self, st: &mut PoolState, id: PeerId, reject: RejectPacket, score: u32) {
        if let Some(peer) = st.peers.get(&id) {
            debug!(peer = %peer.hostname(), code = %reject.code, reason = %reject.reason, "rejecting peer data");
            peer.send_reject(reject);
        }
        self.increase_ban(st, id, score);
    }

    fn ban_host(&self, st: &mut PoolState, addr: &NetAddress) {
        st.hosts.ban(addr.host(), self.inner.clock.now());
        st.hosts.remove(addr.hostname());
        if let Some(id) = st.peer_by_hostname(addr.hostname()) {
            self.destroy_peer(st, id);
        }
    }

    /// Ban a host and drop any connection to it.
    pub fn ban(&self, addr: &NetAddress) {
        let mut guard = self.inner.state.lock();
        info!(peer = %addr, "banning host");
        self.ban_host(&mut guard, addr);
    }

    pub fn unban(&self, addr: &NetAddress) {
        self.inner.state.lock().hosts.unban(addr.host());
    }

    pub fn is_banned(&self, addr: &NetAddress) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.lock().hosts.is_banned(addr.host(), now)
    }

    // -- Loader and outbound slots ---------------------------------------------

    /// Pick a dialable host, skipping recently tried ones and odd ports
    /// while there is a choice.
    fn get_host(&self, st: &mut PoolState, unique: bool) -> Option<HostEntry> {
        let now = self.inner.clock.now();
        let needed = self.inner.config.needed_services();

        for i in 0..100 {
            let entry = st.hosts.get_host()?;
            let addr = &entry.addr;
            if unique && st.peer_by_hostname(addr.hostname()).is_some() {
                continue;
            }
            if !addr.is_valid() || !addr.has_services(needed) {
                continue;
            }
            if st.hosts.is_banned(addr.host(), now) {
                continue;
            }
            if i < 30 && now.saturating_sub(entry.last_attempt) < RECENT_ATTEMPT_SECS {
                continue;
            }
            if i < 50 && addr.port() != self.inner.params.port {
                continue;
            }
            return Some(entry);
        }
        None
    }

    fn mark_loader(&self, st: &mut PoolState, id: PeerId) {
        if let Some(old) = st.loader.take() {
            if let Some(peer) = st.peers.get_mut(&old) {
                peer.loader = false;
            }
        }
        let Some(peer) = st.peers.get_mut(&id) else {
            return;
        };
        peer.loader = true;
        st.loader = Some(id);
        info!(peer = %peer.hostname(), id = %id, "new loader peer");
        self.notify(PoolNotification::Loader {
            id,
            hostname: peer.hostname().to_string(),
        });
    }

    /// Make `id` the loader and top up the outbound slots. The caller syncs
    /// the peer once the state lock is released.
    fn set_loader(&self, st: &mut PoolState, id: PeerId) {
        self.mark_loader(st, id);
        self.fill_outbound(st);
    }

    /// Elect a loader. Returns an already connected peer that now needs a
    /// sync; a freshly dialed loader syncs when it opens.
    fn add_loader(&self, st: &mut PoolState) -> Option<PeerId> {
        let first_outbound = st
            .peers
            .values()
            .filter(|p| p.outbound && !p.destroyed)
            .map(|p| p.id)
            .min();
        if let Some(id) = first_outbound {
            self.mark_loader(st, id);
            return Some(id);
        }

        let entry = self.get_host(st, false)?;
        if let Some(id) = st.peer_by_hostname(entry.addr.hostname()) {
            // Only an inbound connection to this host exists.
            debug!(peer = %entry.addr, id = %id, "loader candidate is inbound, retrying later");
            return None;
        }
        let id = self.add_outbound(st, entry.addr);
        self.mark_loader(st, id);
        None
    }

    /// Add a loader if missing, then dial until the outbound slots are full.
    fn fill_outbound(&self, st: &mut PoolState) -> Option<PeerId> {
        if !st.connected || st.closed {
            return None;
        }
        let sync_target = if st.loader.is_none() {
            self.add_loader(st)
        } else {
            None
        };
        if st.loader.is_none() {
            return sync_target;
        }

        let need = self
            .inner
            .config
            .max_outbound
            .saturating_sub(st.outbound_count());
        for _ in 0..need {
            let Some(entry) = self.get_host(st, true) else {
                break;
            };
            self.add_outbound(st, entry.addr);
        }
        sync_target
    }

    /// Refill outbound slots after [`REFILL_DELAY`]. Calls coalesce.
    fn refill(&self, st: &mut PoolState) {
        if st.closed || !st.connected {
            return;
        }
        if st.refill_timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let pool = self.clone();
        st.refill_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(REFILL_DELAY).await;
            let sync_target = {
                let mut guard = pool.inner.state.lock();
                pool.fill_outbound(&mut guard)
            };
            if let Some(id) = sync_target {
                pool.sync_peer(id).await;
            }
        }));
    }

    // -- Event dispatch --------------------------------------------------------

    fn spawn_dispatch(&self) {
        let Some(rx) = self.inner.events_rx.lock().take() else {
            return;
        };
        let pool = self.clone();
        let handle = tokio::spawn(pool.dispatch(rx));
        self.inner.state.lock().dispatch = Some(handle);
    }

    /// Route connection events. Lifecycle events are handled in order;
    /// packets go to a per-peer lane so one slow peer does not stall the
    /// others while each peer's packets stay ordered.
    async fn dispatch(self, mut rx: mpsc::Receiver<PoolEvent>) {
        let mut lanes: HashMap<PeerId, mpsc::UnboundedSender<Packet>> = HashMap::new();
        while let Some(PoolEvent { peer, event }) = rx.recv().await {
            match event {
                PeerEvent::Packet(packet) => {
                    let lane = lanes.entry(peer).or_insert_with(|| self.spawn_lane(peer));
                    if lane.send(packet).is_err() {
                        lanes.remove(&peer);
                    }
                }
                PeerEvent::Closed => {
                    lanes.remove(&peer);
                    self.handle_close(peer);
                }
                event => {
                    if let Err(e) = self.handle_event(PoolEvent::new(peer, event)).await {
                        warn!(peer = %peer, error = %e, "peer event failed");
                    }
                }
            }
        }
    }

    fn spawn_lane(&self, id: PeerId) -> mpsc::UnboundedSender<Packet> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let pool = self.clone();
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                let cmd = packet.command().to_string();
                if let Err(e) = pool.handle_packet(id, packet).await {
                    warn!(peer = %id, cmd = %cmd, error = %e, "packet handling failed");
                }
            }
        });
        tx
    }

    /// Apply one connection event.
    pub async fn handle_event(&self, event: PoolEvent) -> NetworkResult<()> {
        let PoolEvent { peer, event } = event;
        match event {
            PeerEvent::Connected => {
                self.handle_connect(peer);
                Ok(())
            }
            PeerEvent::Open(version) => self.handle_open(peer, version).await,
            PeerEvent::Packet(packet) => self.handle_packet(peer, packet).await,
            PeerEvent::Closed => {
                self.handle_close(peer);
                Ok(())
            }
        }
    }

    fn handle_connect(&self, id: PeerId) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        let Some(peer) = st.peers.get_mut(&id) else {
            return;
        };
        peer.state = ConnectionState::Handshaking;
        if peer.outbound {
            st.hosts.mark_success(peer.addr.hostname(), self.inner.clock.now());
        }
        debug!(peer = %peer.hostname(), id = %id, "connected");
    }

    async fn handle_open(&self, id: PeerId, version: VersionPacket) -> NetworkResult<()> {
        let config = &self.inner.config;
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let Some(peer) = st.peers.get_mut(&id) else {
                return Ok(());
            };
            if peer.destroyed {
                return Ok(());
            }

            let remote_version = version.version;
            let remote_services = version.services;
            peer.state = ConnectionState::Open;
            peer.have_witness = version.has_services(services::WITNESS);
            info!(
                peer = %peer.hostname(),
                id = %id,
                version = remote_version,
                agent = %version.agent,
                height = version.height,
                "peer handshake complete"
            );
            peer.version = Some(version);

            if peer.outbound && !peer_has_services(remote_services, config.needed_services()) {
                debug!(peer = %peer.hostname(), services = remote_services, "peer lacks required services");
                self.destroy_peer(st, id);
                return Ok(());
            }

            if config.headers() && remote_version >= SENDHEADERS_VERSION {
                peer.send(Packet::SendHeaders);
            }
            if !config.selfish && st.local.is_routable() {
                peer.send(Packet::Addr(vec![st.local.clone()]));
            }
            if !config.ignore_discovery {
                peer.send(Packet::GetAddr);
            }
            if let Some(filter) = &st.spv_filter {
                peer.send(Packet::FilterLoad(filter.clone()));
            }
            for item in self.inner.broadcasts.items() {
                announce(peer, &item);
            }
            if st.fee_rate != -1 && remote_version >= FEEFILTER_VERSION {
                peer.send(Packet::FeeFilter(FeeFilter(st.fee_rate)));
            }

            let outbound = peer.outbound;
            let hostname = peer.hostname().to_string();
            if outbound {
                st.hosts.mark_ack(&hostname, remote_services);

                // A loader that never finished its handshake is dead weight.
                if let Some(loader) = st.loader.filter(|l| *l != id) {
                    let acked = st.peers.get(&loader).is_some_and(|p| p.is_ready());
                    if !acked {
                        debug!(id = %loader, "dropping unacked loader");
                        self.destroy_peer(st, loader);
                    }
                }
                if st.loader.is_none() {
                    self.set_loader(st, id);
                }
            }

            self.notify(PoolNotification::Peer {
                id,
                hostname,
                outbound,
            });
        }

        self.sync_peer(id).await;
        Ok(())
    }

    fn handle_close(&self, id: PeerId) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        let Some(peer) = st.remove_peer(id) else {
            return;
        };
        info!(peer = %peer.hostname(), id = %id, loader = peer.loader, "peer disconnected");
        self.refill(st);
    }

    async fn handle_packet(&self, id: PeerId, packet: Packet) -> NetworkResult<()> {
        match packet {
            Packet::Headers(headers) => self.handle_headers(id, headers).await,
            Packet::Inv(items) => self.handle_inv(id, items).await,
            Packet::Block(packet) => {
                self.handle_block(id, sync::IncomingBlock::Full(packet.block))
                    .await
            }
            Packet::MerkleBlock(block) => {
                self.handle_block(id, sync::IncomingBlock::Merkle(block))
                    .await
            }
            Packet::Tx(packet) => self.handle_tx(id, packet.tx).await,
            Packet::NotFound(items) => {
                self.handle_not_found(id, items);
                Ok(())
            }
            Packet::Reject(reject) => {
                self.handle_reject(id, reject);
                Ok(())
            }
            Packet::GetData(items) => {
                self.handle_get_data(id, items);
                Ok(())
            }
            Packet::Addr(addrs) => {
                self.handle_addr(id, addrs).await;
                Ok(())
            }
            Packet::GetAddr => {
                self.handle_get_addr(id);
                Ok(())
            }
            Packet::Alert(alert) => {
                self.handle_alert(id, alert);
                Ok(())
            }
            Packet::FeeFilter(FeeFilter(rate)) => {
                self.handle_fee_filter(id, rate);
                Ok(())
            }
            Packet::FilterLoad(filter) => {
                self.handle_filter_load(id, &filter);
                Ok(())
            }
            Packet::SendHeaders => {
                self.update_peer(id, |peer| peer.prefer_headers = true);
                Ok(())
            }
            Packet::HaveWitness => {
                self.update_peer(id, |peer| peer.have_witness = true);
                Ok(())
            }
            other => {
                debug!(peer = %id, cmd = other.command(), "ignoring packet");
                Ok(())
            }
        }
    }

    fn update_peer(&self, id: PeerId, f: impl FnOnce(&mut Peer)) {
        if let Some(peer) = self.inner.state.lock().peers.get_mut(&id) {
            f(peer);
        }
    }
}

fn peer_has_services(advertised: u64, needed: u64) -> bool {
    advertised & needed == needed
}

fn announce(peer: &mut Peer, item: &Broadcastable) -> bool {
    match item {
        Broadcastable::Block(block) => peer.announce_block(block),
        Broadcastable::Tx(tx) => peer.announce_tx(tx),
    }
}
