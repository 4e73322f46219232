//! Nullable dialer: keep outbound connection requests instead of opening
//! sockets.

use parking_lot::Mutex;
use relaynet_network::{Dialer, PeerLink};
use relaynet_types::NetAddress;

/// Records every dial. Tests take the links to inspect what the pool sent
/// and feed events back by hand.
#[derive(Default)]
pub struct NullDialer {
    links: Mutex<Vec<PeerLink>>,
    dialed: Mutex<Vec<NetAddress>>,
}

impl NullDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the links dialed since the last call.
    pub fn take_links(&self) -> Vec<PeerLink> {
        std::mem::take(&mut *self.links.lock())
    }

    /// Every address ever dialed, in order.
    pub fn dialed(&self) -> Vec<NetAddress> {
        self.dialed.lock().clone()
    }
}

impl Dialer for NullDialer {
    fn dial(&self, link: PeerLink) {
        self.dialed.lock().push(link.addr.clone());
        self.links.lock().push(link);
    }
}
