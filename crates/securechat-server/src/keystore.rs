//! In-memory shared-key store, one record per canonical principal pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use securechat_crypto::SymmetricKey;
use securechat_protocol::types::{unix_millis, KeyEpoch, PairKey, SharedKeyInfo};

/// An established AES key for one pair. Immutable once stored.
#[derive(Debug)]
pub struct SharedKey {
    pub pair: PairKey,
    pub key: SymmetricKey,
    pub epoch: KeyEpoch,
    pub established_at: SystemTime,
}

impl SharedKey {
    pub fn info(&self) -> SharedKeyInfo {
        let (low, high) = self.pair.members();
        SharedKeyInfo {
            users: [low.to_string(), high.to_string()],
            epoch: self.epoch,
            established_at_ms: unix_millis(self.established_at),
        }
    }
}

/// Result of a [`SharedKeyStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// First key for the pair.
    Established,
    /// Replaced the key with the given epoch.
    Superseded { previous_epoch: KeyEpoch },
    /// Identical to the current key; nothing changed.
    Unchanged,
}

struct PairRecord {
    current: Arc<SharedKey>,
    /// Superseded keys, oldest first. Only filled when history is retained.
    retired: Vec<Arc<SharedKey>>,
}

pub struct SharedKeyStore {
    keys: DashMap<PairKey, PairRecord>,
    next_epoch: AtomicU64,
    retain_history: bool,
}

impl SharedKeyStore {
    pub fn new(retain_history: bool) -> Self {
        Self {
            keys: DashMap::new(),
            next_epoch: AtomicU64::new(1),
            retain_history,
        }
    }

    fn allocate_epoch(&self) -> KeyEpoch {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// Current key for the pair, in either argument order.
    pub fn get(&self, a: &str, b: &str) -> Option<Arc<SharedKey>> {
        self.keys
            .get(&PairKey::new(a, b))
            .map(|record| Arc::clone(&record.current))
    }

    /// The key with `epoch`, whether current or retained.
    pub fn get_epoch(&self, a: &str, b: &str, epoch: KeyEpoch) -> Option<Arc<SharedKey>> {
        let record = self.keys.get(&PairKey::new(a, b))?;
        if record.current.epoch == epoch {
            return Some(Arc::clone(&record.current));
        }
        record
            .retired
            .iter()
            .find(|k| k.epoch == epoch)
            .map(Arc::clone)
    }

    /// Store `key` for the pair, superseding whatever was there.
    ///
    /// Swaps happen under the pair's entry lock, so readers always see
    /// either the old or the new `Arc`.
    pub fn put(&self, a: &str, b: &str, key: SymmetricKey) -> (Arc<SharedKey>, PutOutcome) {
        let pair = PairKey::new(a, b);
        match self.keys.entry(pair.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.current.key == key {
                    return (Arc::clone(&record.current), PutOutcome::Unchanged);
                }
                let fresh = Arc::new(SharedKey {
                    pair,
                    key,
                    epoch: self.allocate_epoch(),
                    established_at: SystemTime::now(),
                });
                let previous = std::mem::replace(&mut record.current, Arc::clone(&fresh));
                let previous_epoch = previous.epoch;
                if self.retain_history {
                    record.retired.push(previous);
                }
                debug!(pair = %fresh.pair, previous_epoch, epoch = fresh.epoch, "shared key superseded");
                (fresh, PutOutcome::Superseded { previous_epoch })
            }
            Entry::Vacant(entry) => {
                let fresh = Arc::new(SharedKey {
                    pair,
                    key,
                    epoch: self.allocate_epoch(),
                    established_at: SystemTime::now(),
                });
                debug!(pair = %fresh.pair, epoch = fresh.epoch, "shared key established");
                entry.insert(PairRecord {
                    current: Arc::clone(&fresh),
                    retired: Vec::new(),
                });
                (fresh, PutOutcome::Established)
            }
        }
    }

    /// Current keys of every pair `principal` belongs to, sorted by pair.
    pub fn pairs_for(&self, principal: &str) -> Vec<Arc<SharedKey>> {
        let mut keys: Vec<_> = self
            .keys
            .iter()
            .filter(|entry| entry.key().contains(principal))
            .map(|entry| Arc::clone(&entry.current))
            .collect();
        keys.sort_by(|a, b| a.pair.cmp(&b.pair));
        keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}
