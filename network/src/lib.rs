//! P2P networking layer for relaynet.
//!
//! Handles peer connections and their handshakes, the peer pool with its
//! loader election, block and transaction request scheduling, header sync,
//! and reliable broadcast of locally originated inventory.

pub mod broadcast;
pub mod chain;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod external_ip;
pub mod filter;
pub mod host_list;
pub mod peer;
pub mod pool;

pub use broadcast::{BroadcastJob, BroadcastManager, Broadcastable};
pub use chain::{Chain, Mempool};
pub use config::PoolConfig;
pub use connection::{Dialer, TcpDialer};
pub use error::{NetworkError, NetworkResult};
pub use events::{PeerCommand, PeerEvent, PeerLink, PoolEvent, PoolNotification};
pub use filter::RollingFilter;
pub use host_list::{HostEntry, HostList, HostManager};
pub use peer::{ConnectionState, PeerId};
pub use pool::{PeerSnapshot, Pool};
