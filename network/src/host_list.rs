//! Known hosts, connection attempt bookkeeping, and IP bans.

use rand::seq::IteratorRandom;
use relaynet_types::NetAddress;
use std::collections::HashMap;
use std::net::IpAddr;

// ---------------------------------------------------------------------------
// Host entries
// ---------------------------------------------------------------------------

/// A candidate address plus what we learned from dialing it.
#[derive(Clone, Debug)]
pub struct HostEntry {
    pub addr: NetAddress,
    /// Unix seconds of the last dial attempt, 0 if never dialed.
    pub last_attempt: u64,
    /// Unix seconds of the last successful connect, 0 if never.
    pub last_success: u64,
    /// Failed attempts since the last completed handshake.
    pub attempts: u32,
    /// Whether a handshake with this host ever completed.
    pub acked: bool,
}

impl HostEntry {
    pub fn new(addr: NetAddress) -> Self {
        Self {
            addr,
            last_attempt: 0,
            last_success: 0,
            attempts: 0,
            acked: false,
        }
    }

    /// Eviction score. New hosts start at 0.
    fn score(&self) -> i64 {
        let bonus = if self.acked { 10 } else { 0 };
        bonus - i64::from(self.attempts)
    }
}

// ---------------------------------------------------------------------------
// Host list interface
// ---------------------------------------------------------------------------

/// Source of outbound candidates and keeper of bans.
///
/// Hosts are keyed by hostname (`ip:port`); bans apply to the bare IP.
pub trait HostList: Send {
    /// A random known host, or `None` when the list is empty.
    fn get_host(&self) -> Option<HostEntry>;

    /// Learn a new address. Returns `false` if it was already known or
    /// could not be stored.
    fn add(&mut self, addr: NetAddress) -> bool;

    fn mark_attempt(&mut self, hostname: &str, now: u64);

    fn mark_success(&mut self, hostname: &str, now: u64);

    /// The host completed a handshake advertising `services`.
    fn mark_ack(&mut self, hostname: &str, services: u64);

    fn ban(&mut self, host: IpAddr, now: u64);

    fn unban(&mut self, host: IpAddr);

    fn is_banned(&mut self, host: IpAddr, now: u64) -> bool;

    fn remove(&mut self, hostname: &str) -> bool;

    fn size(&self) -> usize;

    /// Up to `limit` random known addresses, for answering `getaddr`.
    fn addresses(&self, limit: usize) -> Vec<NetAddress>;

    /// Forget every host and ban.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// In-memory host manager
// ---------------------------------------------------------------------------

/// Default upper bound on tracked hosts.
pub const DEFAULT_MAX_HOSTS: usize = 2000;

/// In-memory [`HostList`].
pub struct HostManager {
    /// All known hosts keyed by hostname.
    hosts: HashMap<String, HostEntry>,
    /// Banned IPs and the Unix second their ban expires.
    banned: HashMap<IpAddr, u64>,
    max_hosts: usize,
    ban_time_secs: u64,
}

impl HostManager {
    pub fn new(max_hosts: usize, ban_time_secs: u64) -> Self {
        Self {
            hosts: HashMap::new(),
            banned: HashMap::new(),
            max_hosts,
            ban_time_secs,
        }
    }

    pub fn get(&self, hostname: &str) -> Option<&HostEntry> {
        self.hosts.get(hostname)
    }

    /// Find the host with the lowest eviction score.
    fn find_worst_host(&self) -> Option<(String, i64)> {
        self.hosts
            .iter()
            .min_by_key(|(_, h)| h.score())
            .map(|(key, h)| (key.clone(), h.score()))
    }
}

impl Default for HostManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOSTS, 24 * 60 * 60)
    }
}

impl HostList for HostManager {
    fn get_host(&self) -> Option<HostEntry> {
        self.hosts
            .values()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// At capacity, evicts the lowest-scoring host when the new one would
    /// score higher.
    fn add(&mut self, addr: NetAddress) -> bool {
        if let Some(existing) = self.hosts.get_mut(addr.hostname()) {
            existing.addr.services |= addr.services;
            existing.addr.ts = existing.addr.ts.max(addr.ts);
            return false;
        }

        if self.hosts.len() >= self.max_hosts {
            match self.find_worst_host() {
                Some((worst_key, worst_score)) if worst_score < 0 => {
                    tracing::debug!(
                        evicted = %worst_key,
                        score = worst_score,
                        "evicted stale host to make room"
                    );
                    self.hosts.remove(&worst_key);
                }
                _ => return false,
            }
        }

        self.hosts
            .insert(addr.hostname().to_string(), HostEntry::new(addr));
        true
    }

    fn mark_attempt(&mut self, hostname: &str, now: u64) {
        if let Some(host) = self.hosts.get_mut(hostname) {
            host.last_attempt = now;
            host.attempts += 1;
        }
    }

    fn mark_success(&mut self, hostname: &str, now: u64) {
        if let Some(host) = self.hosts.get_mut(hostname) {
            host.last_success = now;
        }
    }

    fn mark_ack(&mut self, hostname: &str, services: u64) {
        if let Some(host) = self.hosts.get_mut(hostname) {
            host.addr.services |= services;
            host.attempts = 0;
            host.acked = true;
        }
    }

    fn ban(&mut self, host: IpAddr, now: u64) {
        self.banned.insert(host, now + self.ban_time_secs);
    }

    fn unban(&mut self, host: IpAddr) {
        self.banned.remove(&host);
    }

    fn is_banned(&mut self, host: IpAddr, now: u64) -> bool {
        match self.banned.get(&host) {
            Some(&until) if now < until => true,
            Some(_) => {
                self.banned.remove(&host);
                false
            }
            None => false,
        }
    }

    fn remove(&mut self, hostname: &str) -> bool {
        self.hosts.remove(hostname).is_some()
    }

    fn size(&self) -> usize {
        self.hosts.len()
    }

    fn addresses(&self, limit: usize) -> Vec<NetAddress> {
        self.hosts
            .values()
            .map(|h| h.addr.clone())
            .choose_multiple(&mut rand::thread_rng(), limit)
    }

    fn reset(&mut self) {
        self.hosts.clear();
        self.banned.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_types::services;

    fn addr(ip: &str, port: u16) -> NetAddress {
        NetAddress::new(ip.parse().unwrap(), port, services::NETWORK, 0)
    }

    fn key(ip: &str, port: u16) -> String {
        format!("{ip}:{port}")
    }

    #[test]
    fn add_and_get_host() {
        let mut hosts = HostManager::default();
        assert!(hosts.get_host().is_none());
        assert!(hosts.add(addr("1.2.3.4", 8333)));
        assert!(!hosts.add(addr("1.2.3.4", 8333)));
        assert_eq!(hosts.size(), 1);
        let entry = hosts.get_host().unwrap();
        assert_eq!(entry.addr.hostname(), key("1.2.3.4", 8333));
    }

    #[test]
    fn re_adding_merges_services() {
        let mut hosts = HostManager::default();
        hosts.add(addr("1.2.3.4", 8333));
        let mut again = addr("1.2.3.4", 8333);
        again.services = services::WITNESS;
        hosts.add(again);
        let entry = hosts.get(&key("1.2.3.4", 8333)).unwrap();
        assert!(entry.addr.has_services(services::NETWORK | services::WITNESS));
    }

    #[test]
    fn attempts_reset_on_ack() {
        let mut hosts = HostManager::default();
        hosts.add(addr("1.2.3.4", 8333));
        let k = key("1.2.3.4", 8333);
        hosts.mark_attempt(&k, 100);
        hosts.mark_attempt(&k, 200);
        assert_eq!(hosts.get(&k).unwrap().attempts, 2);
        assert_eq!(hosts.get(&k).unwrap().last_attempt, 200);

        hosts.mark_success(&k, 201);
        hosts.mark_ack(&k, services::BLOOM);
        let entry = hosts.get(&k).unwrap();
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.last_success, 201);
        assert!(entry.acked);
        assert!(entry.addr.has_services(services::BLOOM));
    }

    #[test]
    fn full_list_evicts_failing_host() {
        let mut hosts = HostManager::new(2, 60);
        hosts.add(addr("1.0.0.1", 1));
        hosts.add(addr("1.0.0.2", 2));

        // Nobody worse than a fresh host: refuse.
        assert!(!hosts.add(addr("1.0.0.3", 3)));

        hosts.mark_attempt(&key("1.0.0.1", 1), 10);
        assert!(hosts.add(addr("1.0.0.3", 3)));
        assert_eq!(hosts.size(), 2);
        assert!(hosts.get(&key("1.0.0.1", 1)).is_none());
    }

    #[test]
    fn bans_expire() {
        let mut hosts = HostManager::new(10, 60);
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        hosts.ban(ip, 1000);
        assert!(hosts.is_banned(ip, 1000));
        assert!(hosts.is_banned(ip, 1059));
        assert!(!hosts.is_banned(ip, 1060));
        // Expired bans are dropped.
        assert!(!hosts.is_banned(ip, 1000));
    }

    #[test]
    fn unban_lifts_ban() {
        let mut hosts = HostManager::default();
        let ip: IpAddr = "::1".parse().unwrap();
        hosts.ban(ip, 0);
        hosts.unban(ip);
        assert!(!hosts.is_banned(ip, 0));
    }

    #[test]
    fn remove_and_reset() {
        let mut hosts = HostManager::default();
        hosts.add(addr("1.0.0.1", 1));
        hosts.add(addr("1.0.0.2", 2));
        assert_eq!(hosts.addresses(1).len(), 1);
        assert_eq!(hosts.addresses(10).len(), 2);
        assert!(hosts.remove(&key("1.0.0.1", 1)));
        assert!(!hosts.remove(&key("1.0.0.1", 1)));
        hosts.ban("1.0.0.2".parse().unwrap(), 0);
        hosts.reset();
        assert_eq!(hosts.size(), 0);
        assert!(!hosts.is_banned("1.0.0.2".parse().unwrap(), 0));
    }
}
