//! Reliable propagation of locally originated blocks and transactions.
//!
//! A broadcast item is announced with `inv` and kept until a peer asks for
//! it with `getdata` (ack), a peer rejects it, or the inventory timeout
//! fires. Callers hold a [`BroadcastJob`] that resolves with the outcome.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use relaynet_protocol::packets::{BlockPacket, TxPacket};
use relaynet_protocol::Packet;
use relaynet_types::{Block, Hash256, InvItem, Tx};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{NetworkError, NetworkResult};

/// Delay between the first `getdata` for an item and its ack.
pub const ACK_DELAY: Duration = Duration::from_secs(1);

/// Something the pool can broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Broadcastable {
    Block(Block),
    Tx(Tx),
}

impl Broadcastable {
    pub fn hash(&self) -> Hash256 {
        match self {
            Self::Block(block) => block.hash(),
            Self::Tx(tx) => tx.txid(),
        }
    }

    pub fn inv(&self) -> InvItem {
        match self {
            Self::Block(block) => InvItem::block(block.hash()),
            Self::Tx(tx) => InvItem::tx(tx.txid()),
        }
    }

    /// The packet answering a `getdata` for this item.
    pub fn to_packet(&self, witness: bool) -> Packet {
        match self {
            Self::Block(block) => Packet::Block(BlockPacket::new(block.clone(), witness)),
            Self::Tx(tx) => Packet::Tx(TxPacket::new(tx.clone(), witness)),
        }
    }
}

/// Resolves when the broadcast item terminates.
///
/// `Ok(true)` means a peer requested the item, `Ok(false)` that a peer
/// rejected it.
#[derive(Debug)]
pub struct BroadcastJob {
    rx: oneshot::Receiver<NetworkResult<bool>>,
}

impl Future for BroadcastJob {
    type Output = NetworkResult<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(NetworkError::PoolClosed)))
    }
}

struct BroadcastItem {
    msg: Broadcastable,
    jobs: Vec<oneshot::Sender<NetworkResult<bool>>>,
    /// Bumped on every refresh; a timeout only fires for its own generation.
    generation: u64,
    timeout: JoinHandle<()>,
    ack: Option<JoinHandle<()>>,
}

impl BroadcastItem {
    fn finish(self, result: impl Fn() -> NetworkResult<bool>) {
        self.timeout.abort();
        if let Some(ack) = self.ack {
            ack.abort();
        }
        for job in self.jobs {
            let _ = job.send(result());
        }
    }
}

type Items = Arc<Mutex<HashMap<Hash256, BroadcastItem>>>;

/// Table of in-flight broadcast items, at most one per hash.
#[derive(Clone)]
pub struct BroadcastManager {
    items: Items,
    timeout: Duration,
}

impl BroadcastManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Track `msg` and attach a new job to it. A repeated broadcast of a
    /// live item restarts its timeout. Returns the job and whether the item
    /// is new.
    pub fn add(&self, msg: Broadcastable) -> (BroadcastJob, bool) {
        let hash = msg.hash();
        let (tx, rx) = oneshot::channel();
        let mut items = self.items.lock();
        let fresh = match items.get_mut(&hash) {
            Some(item) => {
                item.timeout.abort();
                item.generation += 1;
                item.timeout = self.spawn_timeout(hash, item.generation);
                item.jobs.push(tx);
                false
            }
            None => {
                let item = BroadcastItem {
                    msg,
                    jobs: vec![tx],
                    generation: 0,
                    timeout: self.spawn_timeout(hash, 0),
                    ack: None,
                };
                items.insert(hash, item);
                true
            }
        };
        (BroadcastJob { rx }, fresh)
    }

    fn spawn_timeout(&self, hash: Hash256, generation: u64) -> JoinHandle<()> {
        let items = self.items.clone();
        let after = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            expire(&items, &hash, generation);
        })
    }

    /// A peer asked for `hash`. Returns the item so the caller can send it;
    /// the jobs succeed after [`ACK_DELAY`].
    pub fn ack(&self, hash: &Hash256) -> Option<Broadcastable> {
        let mut items = self.items.lock();
        let item = items.get_mut(hash)?;
        if item.ack.is_none() {
            let table = self.items.clone();
            let hash = *hash;
            item.ack = Some(tokio::spawn(async move {
                tokio::time::sleep(ACK_DELAY).await;
                resolve(&table, &hash, || Ok(true));
            }));
        }
        Some(item.msg.clone())
    }

    /// A peer rejected `hash`. Returns `true` if it was tracked.
    pub fn reject(&self, hash: &Hash256) -> bool {
        resolve(&self.items, hash, || Ok(false))
    }

    /// Fail every item with [`NetworkError::PoolClosed`].
    pub fn close(&self) {
        let drained: Vec<BroadcastItem> = self.items.lock().drain().map(|(_, v)| v).collect();
        for item in drained {
            item.finish(|| Err(NetworkError::PoolClosed));
        }
    }

    pub fn get(&self, hash: &Hash256) -> Option<Broadcastable> {
        self.items.lock().get(hash).map(|item| item.msg.clone())
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.items.lock().contains_key(hash)
    }

    /// Every tracked item, for re-announcing to a newly opened peer.
    pub fn items(&self) -> Vec<Broadcastable> {
        self.items.lock().values().map(|item| item.msg.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

fn resolve(items: &Items, hash: &Hash256, result: impl Fn() -> NetworkResult<bool>) -> bool {
    let item = items.lock().remove(hash);
    match item {
        Some(item) => {
            item.finish(result);
            true
        }
        None => false,
    }
}

/// Time out `hash` unless it was refreshed since `generation` was armed.
fn expire(items: &Items, hash: &Hash256, generation: u64) -> bool {
    let item = {
        let mut items = items.lock();
        if !items.get(hash).is_some_and(|item| item.generation == generation) {
            return false;
        }
        items.remove(hash)
    };
    match item {
        Some(item) => {
            item.finish(|| Err(NetworkError::Timeout));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_types::{Outpoint, TxIn, TxOut};

    fn tx(n: u8) -> Broadcastable {
        Broadcastable::Tx(Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: Outpoint::new(Hash256::new([n; 32]), 0),
                script: Vec::new(),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut {
                value: 1,
                script: Vec::new(),
            }],
            locktime: 0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ack_resolves_true_after_delay() {
        let manager = BroadcastManager::new(Duration::from_secs(60));
        let msg = tx(1);
        let hash = msg.hash();
        let (mut job, fresh) = manager.add(msg.clone());
        assert!(fresh);

        assert_eq!(manager.ack(&hash), Some(msg));
        // Not yet: the ack lands after the delay.
        assert!(futures_util::poll!(&mut job).is_pending());
        tokio::time::sleep(ACK_DELAY + Duration::from_millis(10)).await;
        assert!(job.await.unwrap());
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reject_resolves_false_immediately() {
        let manager = BroadcastManager::new(Duration::from_secs(60));
        let msg = tx(2);
        let hash = msg.hash();
        let (job, _) = manager.add(msg);
        assert!(manager.reject(&hash));
        assert!(!job.await.unwrap());
        assert!(!manager.contains(&hash));
        assert!(!manager.reject(&hash));
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_item_times_out() {
        let manager = BroadcastManager::new(Duration::from_secs(60));
        let (job, _) = manager.add(tx(3));
        let res = job.await;
        assert!(matches!(res, Err(NetworkError::Timeout)));
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rebroadcast_refreshes_timer_and_attaches_job() {
        let manager = BroadcastManager::new(Duration::from_secs(60));
        let msg = tx(4);
        let (first, fresh) = manager.add(msg.clone());
        assert!(fresh);

        tokio::time::sleep(Duration::from_secs(50)).await;
        let (second, fresh) = manager.add(msg.clone());
        assert!(!fresh);
        assert_eq!(manager.len(), 1);

        // The original deadline has passed but the item is still live.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(manager.contains(&msg.hash()));

        manager.reject(&msg.hash());
        assert!(!first.await.unwrap());
        assert!(!second.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timeout_does_not_expire_refreshed_item() {
        let manager = BroadcastManager::new(Duration::from_secs(60));
        let msg = tx(7);
        let hash = msg.hash();
        let (job, _) = manager.add(msg.clone());
        manager.add(msg);

        // A timer armed before the refresh lost the race for the lock.
        assert!(!expire(&manager.items, &hash, 0));
        assert!(manager.contains(&hash));

        assert!(expire(&manager.items, &hash, 1));
        assert!(matches!(job.await, Err(NetworkError::Timeout)));
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_every_job() {
        let manager = BroadcastManager::new(Duration::from_secs(60));
        let (a, _) = manager.add(tx(5));
        let (b, _) = manager.add(tx(6));
        manager.close();
        assert!(matches!(a.await, Err(NetworkError::PoolClosed)));
        assert!(matches!(b.await, Err(NetworkError::PoolClosed)));
        assert!(manager.is_empty());
    }
}
