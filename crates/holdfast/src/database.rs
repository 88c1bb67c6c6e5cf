use std::sync::Arc;

use bson::{Bson, Document};
use holdfast_engine::{
    Codec, Entity, EntitySchema, IndexManager, Key, SchemaRegistry, lookup, next_sequence,
};
use holdfast_store::{Store, StoreError, Transaction};
use serde::Serialize;

use crate::aggregate::AggregateResult;
use crate::error::HoldError;
use crate::eval::Evaluator;
use crate::executor::Executor;
use crate::options::DatabaseOptions;
use crate::query::Query;

/// Typed entity storage with secondary indexes over a transactional
/// key-value store.
pub struct Database<S: Store> {
    store: S,
    options: DatabaseOptions,
    registry: SchemaRegistry,
}

impl<S: Store> Database<S> {
    pub fn open(store: S) -> Self {
        Self::with_options(store, DatabaseOptions::default())
    }

    pub fn with_options(store: S, options: DatabaseOptions) -> Self {
        Self {
            store,
            options,
            registry: SchemaRegistry::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Opens an explicit transaction. A conflict on its commit is returned to
    /// the caller without retrying.
    pub fn begin(&self, read_only: bool) -> Result<DatabaseTransaction<'_, S>, HoldError> {
        let txn = self.store.begin(read_only)?;
        Ok(DatabaseTransaction {
            txn,
            codec: self.options.codec.as_ref(),
            registry: &self.registry,
            batch_size: self.options.batch_size,
        })
    }

    /// Runs `f` in a read-only transaction.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&DatabaseTransaction<'_, S>) -> Result<R, HoldError>,
    ) -> Result<R, HoldError> {
        let tx = self.begin(true)?;
        let result = f(&tx);
        tx.rollback()?;
        result
    }

    /// Runs `f` in a write transaction and commits it, rerunning the whole
    /// closure when the commit loses a conflict.
    pub fn write<R>(
        &self,
        mut f: impl FnMut(&DatabaseTransaction<'_, S>) -> Result<R, HoldError>,
    ) -> Result<R, HoldError> {
        let policy = &self.options.retry;
        let attempts = policy.max_attempts.max(1);
        for attempt in 0..attempts {
            let tx = self.begin(false)?;
            let err = match f(&tx) {
                Ok(value) => match tx.commit() {
                    Ok(()) => return Ok(value),
                    Err(err) => err,
                },
                Err(err) => {
                    if let Err(rollback) = tx.rollback() {
                        tracing::debug!(error = %rollback, "rollback after failed write");
                    }
                    err
                }
            };
            if !err.is_conflict() {
                return Err(err);
            }
            if attempt + 1 < attempts {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_us = delay.as_micros() as u64,
                    "write conflict, retrying"
                );
                std::thread::sleep(delay);
            }
        }
        tracing::warn!(attempts, "write conflict persisted, giving up");
        Err(HoldError::Conflict { attempts })
    }

    pub fn get<T: Entity, K: Serialize + ?Sized>(&self, key: &K) -> Result<T, HoldError> {
        self.read(|tx| tx.get(key))
    }

    pub fn find<T: Entity>(&self, query: &Query) -> Result<Vec<T>, HoldError> {
        self.read(|tx| tx.find(query))
    }

    pub fn find_one<T: Entity>(&self, query: &Query) -> Result<T, HoldError> {
        self.read(|tx| tx.find_one(query))
    }

    pub fn count<T: Entity>(&self, query: &Query) -> Result<usize, HoldError> {
        self.read(|tx| tx.count::<T>(query))
    }

    pub fn for_each<T: Entity>(
        &self,
        query: &Query,
        f: impl FnMut(T) -> Result<(), HoldError>,
    ) -> Result<(), HoldError> {
        self.read(|tx| tx.for_each(query, f))
    }

    pub fn aggregate<T: Entity>(
        &self,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<AggregateResult<T>>, HoldError> {
        self.read(|tx| tx.aggregate(query, group_by))
    }

    pub fn matches<T: Entity>(&self, query: &Query, record: &T) -> Result<bool, HoldError> {
        self.read(|tx| tx.matches(query, record))
    }

    pub fn insert<T: Entity, K: Serialize + ?Sized>(&self, key: &K, value: &T) -> Result<(), HoldError> {
        self.write(|tx| tx.insert(key, value))
    }

    /// Inserts under the next value of `T`'s sequence and returns it.
    pub fn insert_next<T: Entity>(&self, value: &mut T) -> Result<u64, HoldError> {
        self.write(|tx| tx.insert_next(&mut *value))
    }

    pub fn update<T: Entity, K: Serialize + ?Sized>(&self, key: &K, value: &T) -> Result<(), HoldError> {
        self.write(|tx| tx.update(key, value))
    }

    pub fn upsert<T: Entity, K: Serialize + ?Sized>(&self, key: &K, value: &T) -> Result<(), HoldError> {
        self.write(|tx| tx.upsert(key, value))
    }

    pub fn delete<T: Entity, K: Serialize + ?Sized>(&self, key: &K) -> Result<(), HoldError> {
        self.write(|tx| tx.delete::<T, K>(key))
    }

    pub fn update_matching<T: Entity>(
        &self,
        query: &Query,
        mut f: impl FnMut(&mut T) -> Result<(), HoldError>,
    ) -> Result<usize, HoldError> {
        self.write(|tx| tx.update_matching(query, &mut f))
    }

    pub fn delete_matching<T: Entity>(&self, query: &Query) -> Result<usize, HoldError> {
        self.write(|tx| tx.delete_matching::<T>(query))
    }

    pub fn remove_index<T: Entity>(&self, name: &str) -> Result<usize, HoldError> {
        self.write(|tx| tx.remove_index::<T>(name))
    }
}

/// One store transaction with typed access to entities and queries.
///
/// Reads see the transaction's own writes, including from sub-queries run
/// inside predicates.
pub struct DatabaseTransaction<'db, S: Store + 'db> {
    txn: S::Txn<'db>,
    codec: &'db dyn Codec,
    registry: &'db SchemaRegistry,
    batch_size: usize,
}

impl<'db, S: Store + 'db> DatabaseTransaction<'db, S> {
    /// Applies the transaction. Losing to a concurrent writer is reported as
    /// `HoldError::Conflict` after this single attempt.
    pub fn commit(self) -> Result<(), HoldError> {
        self.txn.commit().map_err(|err| match err {
            StoreError::Conflict => HoldError::Conflict { attempts: 1 },
            other => other.into(),
        })
    }

    pub fn rollback(self) -> Result<(), HoldError> {
        Ok(self.txn.rollback()?)
    }

    pub fn is_read_only(&self) -> bool {
        self.txn.is_read_only()
    }

    fn executor(&self) -> Executor<'_, S::Txn<'db>> {
        Executor::new(&self.txn, self.codec, self.registry, self.batch_size)
    }

    fn schema<T: Entity>(&self) -> Result<Arc<EntitySchema>, HoldError> {
        Ok(self.registry.get::<T>()?)
    }

    fn indexes(&self) -> IndexManager<'_> {
        IndexManager::new(self.codec)
    }

    fn encode_key<K: Serialize + ?Sized>(&self, key: &K) -> Result<Vec<u8>, HoldError> {
        let value = bson::serialize_to_bson(key)?;
        Ok(self.codec.encode_key(&value)?)
    }

    fn encode_record<T: Entity>(&self, value: &T) -> Result<(Document, Vec<u8>), HoldError> {
        let doc = bson::serialize_to_document(value)?;
        let bytes = self.codec.encode(&Bson::Document(doc.clone()))?;
        Ok((doc, bytes))
    }

    /// Stored document under `pk`, if any.
    fn load(&self, schema: &EntitySchema, pk: &[u8]) -> Result<Option<Document>, HoldError> {
        let record_key = Key::record(schema.type_name(), pk).encode();
        match self.txn.get(&record_key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(self.executor().decode(schema, pk, &bytes)?)),
        }
    }

    /// Writes `value` under `pk`, moving index entries off `old` when given.
    /// Unique indexes are checked first, so a collision leaves the
    /// transaction untouched.
    fn write_record(
        &self,
        schema: &EntitySchema,
        pk: &[u8],
        old: Option<&Document>,
        value: &Document,
        bytes: &[u8],
    ) -> Result<(), HoldError> {
        self.indexes().check_unique(&self.txn, schema, pk, value)?;
        if let Some(old) = old {
            self.indexes().delete(&self.txn, schema, pk, old)?;
        }
        self.txn.put(&Key::record(schema.type_name(), pk).encode(), bytes)?;
        self.indexes().add(&self.txn, schema, pk, value)?;
        Ok(())
    }

    fn remove_record(&self, schema: &EntitySchema, pk: &[u8], old: &Document) -> Result<(), HoldError> {
        self.txn.delete(&Key::record(schema.type_name(), pk).encode())?;
        self.indexes().delete(&self.txn, schema, pk, old)?;
        Ok(())
    }

    pub fn get<T: Entity, K: Serialize + ?Sized>(&self, key: &K) -> Result<T, HoldError> {
        let schema = self.schema::<T>()?;
        let pk = self.encode_key(key)?;
        let doc = self.load(&schema, &pk)?.ok_or(HoldError::NotFound)?;
        Ok(bson::deserialize_from_document(doc)?)
    }

    pub fn find<T: Entity>(&self, query: &Query) -> Result<Vec<T>, HoldError> {
        let schema = self.schema::<T>()?;
        self.executor()
            .find_rows(&schema, query)?
            .into_iter()
            .map(|row| Ok(bson::deserialize_from_document(row.doc)?))
            .collect()
    }

    /// First match in query order; `NotFound` when nothing matches.
    pub fn find_one<T: Entity>(&self, query: &Query) -> Result<T, HoldError> {
        let schema = self.schema::<T>()?;
        let row = self
            .executor()
            .find_rows(&schema, &query.first_only())?
            .into_iter()
            .next()
            .ok_or(HoldError::NotFound)?;
        Ok(bson::deserialize_from_document(row.doc)?)
    }

    pub fn count<T: Entity>(&self, query: &Query) -> Result<usize, HoldError> {
        let schema = self.schema::<T>()?;
        self.executor().count(&schema, query)
    }

    /// Calls `f` per match; the first error stops iteration and is returned.
    pub fn for_each<T: Entity>(
        &self,
        query: &Query,
        mut f: impl FnMut(T) -> Result<(), HoldError>,
    ) -> Result<(), HoldError> {
        let schema = self.schema::<T>()?;
        self.executor().walk(&schema, query, &mut |row| {
            f(bson::deserialize_from_document(row.doc)?)
        })
    }

    pub fn aggregate<T: Entity>(
        &self,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<AggregateResult<T>>, HoldError> {
        let schema = self.schema::<T>()?;
        let groups = self.executor().aggregate(&schema, query, group_by)?;
        Ok(groups.into_iter().map(AggregateResult::from_group).collect())
    }

    /// Tests `record` against `query` without reading it from the store.
    pub fn matches<T: Entity>(&self, query: &Query, record: &T) -> Result<bool, HoldError> {
        query.validate()?;
        let schema = self.schema::<T>()?;
        let doc = bson::serialize_to_document(record)?;
        let key = match schema.key_field().and_then(|field| lookup(&doc, field)) {
            Some(value) => self.codec.encode_key(value)?,
            None => self.codec.encode_key(&Bson::Null)?,
        };
        let executor = self.executor();
        Evaluator::new(&schema, self.codec, &executor).matches(query, &key, &doc)
    }

    pub fn insert<T: Entity, K: Serialize + ?Sized>(&self, key: &K, value: &T) -> Result<(), HoldError> {
        let schema = self.schema::<T>()?;
        let pk = self.encode_key(key)?;
        if self.load(&schema, &pk)?.is_some() {
            return Err(HoldError::KeyExists);
        }
        let (doc, bytes) = self.encode_record(value)?;
        self.write_record(&schema, &pk, None, &doc, &bytes)
    }

    /// Inserts under the next sequence value of `T`, writes that value into
    /// the key field when the schema declares one, and returns it.
    pub fn insert_next<T: Entity>(&self, value: &mut T) -> Result<u64, HoldError> {
        let schema = self.schema::<T>()?;
        let seq = next_sequence(&self.txn, schema.type_name())?;
        if let Some(field) = schema.key_field() {
            let mut doc = bson::serialize_to_document(&*value)?;
            doc.insert(field, bson::serialize_to_bson(&seq)?);
            *value = bson::deserialize_from_document(doc)?;
        }
        self.insert(&seq, &*value)?;
        Ok(seq)
    }

    pub fn update<T: Entity, K: Serialize + ?Sized>(&self, key: &K, value: &T) -> Result<(), HoldError> {
        let schema = self.schema::<T>()?;
        let pk = self.encode_key(key)?;
        let old = self.load(&schema, &pk)?.ok_or(HoldError::NotFound)?;
        let (doc, bytes) = self.encode_record(value)?;
        self.write_record(&schema, &pk, Some(&old), &doc, &bytes)
    }

    pub fn upsert<T: Entity, K: Serialize + ?Sized>(&self, key: &K, value: &T) -> Result<(), HoldError> {
        let schema = self.schema::<T>()?;
        let pk = self.encode_key(key)?;
        let old = self.load(&schema, &pk)?;
        let (doc, bytes) = self.encode_record(value)?;
        self.write_record(&schema, &pk, old.as_ref(), &doc, &bytes)
    }

    pub fn delete<T: Entity, K: Serialize + ?Sized>(&self, key: &K) -> Result<(), HoldError> {
        let schema = self.schema::<T>()?;
        let pk = self.encode_key(key)?;
        let old = self.load(&schema, &pk)?.ok_or(HoldError::NotFound)?;
        self.remove_record(&schema, &pk, &old)
    }

    /// Applies `f` to every match and stores the results. Matches are
    /// collected before the first write. Returns how many records changed.
    pub fn update_matching<T: Entity>(
        &self,
        query: &Query,
        mut f: impl FnMut(&mut T) -> Result<(), HoldError>,
    ) -> Result<usize, HoldError> {
        let schema = self.schema::<T>()?;
        let rows = self.executor().find_rows(&schema, query)?;
        let count = rows.len();
        for row in rows {
            let mut value: T = bson::deserialize_from_document(row.doc.clone())?;
            f(&mut value)?;
            let (doc, bytes) = self.encode_record(&value)?;
            self.write_record(&schema, &row.key, Some(&row.doc), &doc, &bytes)?;
        }
        Ok(count)
    }

    pub fn delete_matching<T: Entity>(&self, query: &Query) -> Result<usize, HoldError> {
        let schema = self.schema::<T>()?;
        let rows = self.executor().find_rows(&schema, query)?;
        for row in &rows {
            self.remove_record(&schema, &row.key, &row.doc)?;
        }
        Ok(rows.len())
    }

    /// Drops every entry of index `name` on `T`. Returns the number removed.
    pub fn remove_index<T: Entity>(&self, name: &str) -> Result<usize, HoldError> {
        let schema = self.schema::<T>()?;
        Ok(self.indexes().remove_index(&self.txn, &schema, name)?)
    }
}
