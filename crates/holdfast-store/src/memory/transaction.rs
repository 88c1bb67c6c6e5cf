use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{KvPair, Transaction};

use super::store::{Data, MemoryStore, Version};

struct State {
    /// Snapshot with this transaction's own writes applied.
    view: Data,
    read_seq: u64,
    /// `None` marks a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    reads: HashSet<Vec<u8>>,
}

/// Holds a write transaction's snapshot as live for conflict bookkeeping.
struct Pin<'a> {
    store: &'a MemoryStore,
    seq: u64,
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.store.unpin(self.seq);
    }
}

pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    state: RefCell<Option<State>>,
    read_only: bool,
    _pin: Option<Pin<'a>>,
}

impl<'a> MemoryTransaction<'a> {
    pub(crate) fn begin(store: &'a MemoryStore, read_only: bool) -> Result<Self, StoreError> {
        let (snapshot, pin) = if read_only {
            (store.snapshot(), None)
        } else {
            let snapshot = store.pin()?;
            let seq = snapshot.seq;
            (snapshot, Some(Pin { store, seq }))
        };
        Ok(Self::new(store, snapshot, read_only, pin))
    }

    fn new(
        store: &'a MemoryStore,
        snapshot: Arc<Version>,
        read_only: bool,
        pin: Option<Pin<'a>>,
    ) -> Self {
        Self {
            store,
            state: RefCell::new(Some(State {
                view: snapshot.data.clone(),
                read_seq: snapshot.seq,
                writes: BTreeMap::new(),
                reads: HashSet::new(),
            })),
            read_only,
            _pin: pin,
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> Result<R, StoreError> {
        let mut state = self.state.borrow_mut();
        let state = state.as_mut().ok_or(StoreError::TransactionConsumed)?;
        Ok(f(state))
    }

    fn collect_range(
        state: &mut State,
        prefix: &[u8],
        lower: Bound<Vec<u8>>,
        limit: usize,
    ) -> Vec<KvPair> {
        let entries: Vec<KvPair> = state
            .view
            .range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, _) in &entries {
            state.reads.insert(key.clone());
        }
        entries
    }
}

impl<'a> Transaction for MemoryTransaction<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_state(|state| {
            state.reads.insert(key.to_vec());
            state.view.get(key).cloned()
        })
    }

    fn multi_get(&self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.with_state(|state| {
            keys.iter()
                .map(|key| {
                    state.reads.insert(key.to_vec());
                    state.view.get(*key).cloned()
                })
                .collect()
        })
    }

    fn scan_prefix<'b>(
        &'b self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = Result<KvPair, StoreError>> + 'b>, StoreError> {
        let entries = self.with_state(|state| {
            Self::collect_range(state, prefix, Bound::Included(prefix.to_vec()), usize::MAX)
        })?;
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn scan_batch(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<KvPair>, StoreError> {
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_vec()),
            _ => Bound::Included(prefix.to_vec()),
        };
        self.with_state(|state| Self::collect_range(state, prefix, lower, limit))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.with_state(|state| {
            state.view.insert(key.to_vec(), value.to_vec());
            state.writes.insert(key.to_vec(), Some(value.to_vec()));
        })
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.with_state(|state| {
            state.view.remove(key);
            state.writes.insert(key.to_vec(), None);
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn commit(self) -> Result<(), StoreError> {
        let state = self
            .state
            .into_inner()
            .ok_or(StoreError::TransactionConsumed)?;

        if self.read_only || state.writes.is_empty() {
            return Ok(());
        }

        self.store.apply(state.read_seq, &state.reads, state.writes)
    }

    fn rollback(self) -> Result<(), StoreError> {
        if self.state.into_inner().is_none() {
            return Err(StoreError::TransactionConsumed);
        }
        Ok(())
    }
}
