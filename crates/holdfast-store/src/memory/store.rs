use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use imbl::OrdMap;

use crate::error::StoreError;
use crate::store::Store;

use super::transaction::MemoryTransaction;

pub(crate) type Data = OrdMap<Vec<u8>, Vec<u8>>;

/// Commits between sweeps of `Version::written`.
const PRUNE_INTERVAL: u64 = 64;

/// One committed state of the store.
#[derive(Clone, Default)]
pub(crate) struct Version {
    pub(crate) data: Data,
    /// Commit sequence that last wrote each key, deletes included. Entries no
    /// open write transaction can conflict with are pruned.
    pub(crate) written: OrdMap<Vec<u8>, u64>,
    pub(crate) seq: u64,
}

/// In-memory ordered key-value store with snapshot isolation and optimistic
/// conflict detection.
///
/// Readers never block: a transaction pins the current `Version` (cheap due to
/// imbl structural sharing) and works against it. Commits are serialized by a
/// short lock that validates the read set and swaps in the next version.
pub struct MemoryStore {
    current: ArcSwap<Version>,
    commit_lock: Mutex<()>,
    /// Snapshot sequences held by open write transactions, with counts.
    pinned: Mutex<BTreeMap<u64, usize>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Version::default()),
            commit_lock: Mutex::new(()),
            pinned: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.current.load().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys whose last commit sequence is still kept for conflict checks.
    pub fn tracked_writes(&self) -> usize {
        self.current.load().written.len()
    }

    pub(crate) fn snapshot(&self) -> Arc<Version> {
        self.current.load_full()
    }

    /// Takes a snapshot and counts it as live until `unpin`. Loading under the
    /// lock keeps a sweep from missing a snapshot that is being taken.
    pub(crate) fn pin(&self) -> Result<Arc<Version>, StoreError> {
        let mut pinned = self.pinned.lock().map_err(poisoned)?;
        let snapshot = self.current.load_full();
        *pinned.entry(snapshot.seq).or_insert(0) += 1;
        Ok(snapshot)
    }

    pub(crate) fn unpin(&self, seq: u64) {
        let Ok(mut pinned) = self.pinned.lock() else {
            return;
        };
        if let Some(count) = pinned.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&seq);
            }
        }
    }

    pub(crate) fn apply(
        &self,
        read_seq: u64,
        reads: &HashSet<Vec<u8>>,
        writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock().map_err(poisoned)?;

        let current = self.current.load_full();
        let stale = reads.iter().find(|key| {
            current
                .written
                .get(key.as_slice())
                .is_some_and(|seq| *seq > read_seq)
        });
        if let Some(key) = stale {
            tracing::debug!(key = ?String::from_utf8_lossy(key), read_seq, "commit conflict");
            return Err(StoreError::Conflict);
        }

        let mut next = (*current).clone();
        next.seq += 1;
        for (key, value) in writes {
            match value {
                Some(value) => {
                    next.data.insert(key.clone(), value);
                }
                None => {
                    next.data.remove(&key);
                }
            }
            next.written.insert(key, next.seq);
        }
        if next.seq % PRUNE_INTERVAL == 0 {
            self.prune(&mut next)?;
        }
        self.current.store(Arc::new(next));
        Ok(())
    }
}

impl MemoryStore {
    /// Drops write records at or below the oldest pinned snapshot. No open
    /// transaction can conflict with them, and new ones start later still.
    fn prune(&self, next: &mut Version) -> Result<(), StoreError> {
        let oldest = {
            let pinned = self.pinned.lock().map_err(poisoned)?;
            pinned.keys().next().copied().unwrap_or(next.seq)
        };
        let stale: Vec<Vec<u8>> = next
            .written
            .iter()
            .filter(|(_, seq)| **seq <= oldest)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            next.written.remove(key);
        }
        tracing::trace!(oldest, pruned = stale.len(), "pruned write records");
        Ok(())
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Storage(format!("memory store lock poisoned: {e}"))
}

impl Store for MemoryStore {
    type Txn<'a> = MemoryTransaction<'a>;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError> {
        MemoryTransaction::begin(self, read_only)
    }
}
