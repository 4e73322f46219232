//! Rolling hash set for inventory deduplication.
//!
//! Remembers which hashes a peer already knows about (or which transactions
//! the pool has already seen) so the same item is neither announced nor
//! requested twice.

use std::collections::HashSet;
use std::collections::VecDeque;

use relaynet_types::Hash256;

/// Default capacity: track the last 50 000 hashes.
pub const DEFAULT_FILTER_CAPACITY: usize = 50_000;

/// Keeps the last `capacity` hashes in insertion order. Oldest entries are
/// evicted when capacity is reached.
#[derive(Debug)]
pub struct RollingFilter {
    capacity: usize,
    hashes: HashSet<Hash256>,
    order: VecDeque<Hash256>,
}

impl RollingFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            hashes: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `hash`. Returns `false` if it was already present.
    pub fn insert(&mut self, hash: Hash256) -> bool {
        if self.hashes.contains(&hash) {
            return false;
        }
        if self.hashes.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.hashes.remove(&old);
            }
        }
        self.hashes.insert(hash);
        self.order.push_back(hash);
        true
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
        self.order.clear();
    }
}

impl Default for RollingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> Hash256 {
        Hash256::new([n; 32])
    }

    #[test]
    fn new_hash_is_inserted() {
        let mut filter = RollingFilter::new(10);
        assert!(filter.insert(hash(1)));
        assert!(filter.contains(&hash(1)));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn repeated_hash_is_rejected() {
        let mut filter = RollingFilter::new(10);
        assert!(filter.insert(hash(1)));
        assert!(!filter.insert(hash(1)));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn oldest_is_evicted_at_capacity() {
        let mut filter = RollingFilter::new(3);
        for n in 0..3 {
            filter.insert(hash(n));
        }
        filter.insert(hash(3));
        assert_eq!(filter.len(), 3);
        assert!(!filter.contains(&hash(0)));
        assert!(filter.contains(&hash(1)));
        assert!(filter.contains(&hash(3)));

        // An evicted hash is new again.
        assert!(filter.insert(hash(0)));
        assert!(!filter.contains(&hash(1)));
    }

    #[test]
    fn clear_empties_the_filter() {
        let mut filter = RollingFilter::default();
        filter.insert(hash(7));
        filter.clear();
        assert!(filter.is_empty());
        assert!(!filter.contains(&hash(7)));
    }
}
