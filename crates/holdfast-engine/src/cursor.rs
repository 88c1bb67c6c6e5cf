use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bson::Bson;
use holdfast_store::{KvPair, Transaction};

use crate::codec::Codec;
use crate::error::EngineError;
use crate::key::{KeyPrefix, decode_key_list};

/// Where a cursor draws candidates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSource {
    /// Primary records of a type, in key order.
    Records { type_name: String },
    /// Entries of one index in encoded-value order. Each entry's primary keys
    /// are resolved to their records.
    Index { type_name: String, index: String },
}

impl ScanSource {
    fn type_name(&self) -> &str {
        match self {
            ScanSource::Records { type_name } | ScanSource::Index { type_name, .. } => type_name,
        }
    }
}

/// A primary key (codec-encoded, without the record prefix) and its raw
/// record bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct CursorState {
    batch: VecDeque<Candidate>,
    /// Last store key fetched; the next page starts strictly after it.
    seek: Option<Vec<u8>>,
    exhausted: bool,
}

/// Shared checkpoint of cursor progress within one transaction.
///
/// The cursor that owns a bookmark keeps its prefetched batch and seek
/// position in it. A nested cursor opened on the same bookmark parks the
/// enclosing position, runs from a fresh state, and puts the enclosing
/// position back when it is dropped, so the outer scan resumes exactly where
/// it left off.
#[derive(Debug, Clone, Default)]
pub struct Bookmark {
    slot: Rc<RefCell<CursorState>>,
}

impl Bookmark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store key the current holder will resume after, if it has fetched any.
    pub fn position(&self) -> Option<Vec<u8>> {
        self.slot.borrow().seek.clone()
    }

    /// Candidates prefetched but not yet handed out.
    pub fn pending(&self) -> usize {
        self.slot.borrow().batch.len()
    }
}

enum Slot<'a> {
    Owned(CursorState),
    Shared {
        bookmark: &'a Bookmark,
        parent: Option<CursorState>,
    },
}

type IndexFilter<'a, E> = Box<dyn FnMut(&Bson) -> Result<bool, E> + 'a>;

/// Pages candidates out of the store in bounded batches.
pub struct Cursor<'a, E> {
    source: ScanSource,
    prefix: Vec<u8>,
    records: Vec<u8>,
    batch_size: usize,
    codec: &'a dyn Codec,
    filter: Option<IndexFilter<'a, E>>,
    state: Slot<'a>,
}

impl<'a, E: From<EngineError>> Cursor<'a, E> {
    pub fn new(
        source: ScanSource,
        codec: &'a dyn Codec,
        batch_size: usize,
        bookmark: Option<&'a Bookmark>,
    ) -> Self {
        let records = KeyPrefix::Record(Cow::Borrowed(source.type_name())).encode();
        let prefix = match &source {
            ScanSource::Records { .. } => records.clone(),
            ScanSource::Index { type_name, index } => {
                KeyPrefix::Index(Cow::Borrowed(type_name), Cow::Borrowed(index)).encode()
            }
        };
        let state = match bookmark {
            None => Slot::Owned(CursorState::default()),
            Some(bookmark) => {
                let parent = std::mem::take(&mut *bookmark.slot.borrow_mut());
                Slot::Shared {
                    bookmark,
                    parent: Some(parent),
                }
            }
        };
        Self {
            source,
            prefix,
            records,
            batch_size: batch_size.max(1),
            codec,
            filter: None,
            state,
        }
    }

    /// Only index entries whose decoded value passes `filter` yield records.
    /// Ignored for record scans.
    pub fn with_filter(mut self, filter: impl FnMut(&Bson) -> Result<bool, E> + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn source(&self) -> &ScanSource {
        &self.source
    }

    pub fn next<T: Transaction>(&mut self, txn: &T) -> Result<Option<Candidate>, E> {
        loop {
            if let Some(candidate) = self.with_state(|s| s.batch.pop_front()) {
                return Ok(Some(candidate));
            }
            if self.with_state(|s| s.exhausted) {
                return Ok(None);
            }
            self.fill(txn)?;
        }
    }

    fn with_state<R>(&mut self, f: impl FnOnce(&mut CursorState) -> R) -> R {
        match &mut self.state {
            Slot::Owned(state) => f(state),
            Slot::Shared { bookmark, .. } => f(&mut bookmark.slot.borrow_mut()),
        }
    }

    fn fill<T: Transaction>(&mut self, txn: &T) -> Result<(), E> {
        let seek = self.with_state(|s| s.seek.clone());
        let page = txn
            .scan_batch(&self.prefix, seek.as_deref(), self.batch_size)
            .map_err(EngineError::from)?;
        let exhausted = page.len() < self.batch_size;
        let last = page.last().map(|(k, _)| k.clone());

        let candidates = if matches!(self.source, ScanSource::Index { .. }) {
            self.resolve(txn, page)?
        } else {
            let skip = self.prefix.len();
            page.into_iter()
                .map(|(key, value)| Candidate {
                    key: key[skip..].to_vec(),
                    value,
                })
                .collect()
        };

        self.with_state(|s| {
            s.batch.extend(candidates);
            if last.is_some() {
                s.seek = last;
            }
            s.exhausted = exhausted;
        });
        Ok(())
    }

    fn resolve<T: Transaction>(&mut self, txn: &T, page: Vec<KvPair>) -> Result<Vec<Candidate>, E> {
        let mut keys = Vec::new();
        for (entry, list) in page {
            if let Some(filter) = self.filter.as_mut() {
                let value = self
                    .codec
                    .decode_key(&entry[self.prefix.len()..])
                    .map_err(EngineError::from)?;
                if !filter(&value)? {
                    continue;
                }
            }
            let list = decode_key_list(&list).ok_or_else(|| self.corrupt("truncated key list"))?;
            keys.extend(list);
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<Vec<u8>> = keys
            .iter()
            .map(|k| [self.records.as_slice(), k].concat())
            .collect();
        let refs: Vec<&[u8]> = record_keys.iter().map(Vec::as_slice).collect();
        let rows = txn.multi_get(&refs).map_err(EngineError::from)?;

        keys.into_iter()
            .zip(rows)
            .map(|(key, row)| match row {
                Some(value) => Ok(Candidate { key, value }),
                None => Err(self.corrupt("entry points at a missing record").into()),
            })
            .collect()
    }

    fn corrupt(&self, reason: &str) -> EngineError {
        let index = match &self.source {
            ScanSource::Index { index, .. } => index.clone(),
            ScanSource::Records { .. } => String::new(),
        };
        EngineError::CorruptIndex {
            type_name: self.source.type_name().to_string(),
            index,
            reason: reason.to_string(),
        }
    }
}

impl<E> Drop for Cursor<'_, E> {
    fn drop(&mut self) {
        if let Slot::Shared { bookmark, parent } = &mut self.state {
            *bookmark.slot.borrow_mut() = parent.take().unwrap_or_default();
        }
    }
}
