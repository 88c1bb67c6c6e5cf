use std::borrow::Cow;
use std::collections::HashSet;

use bson::{Bson, Document};
use holdfast_store::Transaction;

use crate::codec::Codec;
use crate::document::lookup_or_null;
use crate::error::EngineError;
use crate::key::{Key, KeyPrefix, decode_key_list, encode_key_list};
use crate::schema::{EntitySchema, IndexSpec};

/// Keeps secondary index entries in step with primary records.
///
/// Every method works inside the caller's transaction; callers pair
/// `delete` of the old value with `add` of the new one around each write so
/// the pair commits or rolls back together.
pub struct IndexManager<'c> {
    codec: &'c dyn Codec,
}

impl<'c> IndexManager<'c> {
    pub fn new(codec: &'c dyn Codec) -> Self {
        Self { codec }
    }

    pub fn entry_key(
        &self,
        schema: &EntitySchema,
        index: &IndexSpec,
        value: &Bson,
    ) -> Result<Vec<u8>, EngineError> {
        let encoded = self.codec.encode_key(value)?;
        Ok(Key::Index(
            Cow::Borrowed(schema.type_name()),
            Cow::Borrowed(&index.name),
            Cow::Owned(encoded),
        )
        .encode())
    }

    /// Fails with `UniqueExists` if `record` would take a unique index value
    /// already held by another key. Writes nothing, so callers run it before
    /// touching the record or any index.
    pub fn check_unique<T: Transaction>(
        &self,
        txn: &T,
        schema: &EntitySchema,
        key: &[u8],
        record: &Document,
    ) -> Result<(), EngineError> {
        for index in schema.indexes().iter().filter(|index| index.unique) {
            let value = lookup_or_null(record, &index.field);
            let entry = self.entry_key(schema, index, &value)?;
            if self
                .read_entry(txn, schema, index, &entry)?
                .iter()
                .any(|k| k != key)
            {
                return Err(EngineError::UniqueExists {
                    type_name: schema.type_name().to_string(),
                    index: index.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Registers `key` under every declared index of `schema`.
    pub fn add<T: Transaction>(
        &self,
        txn: &T,
        schema: &EntitySchema,
        key: &[u8],
        record: &Document,
    ) -> Result<(), EngineError> {
        for index in schema.indexes() {
            let value = lookup_or_null(record, &index.field);
            let entry = self.entry_key(schema, index, &value)?;
            let mut keys = self.read_entry(txn, schema, index, &entry)?;

            if index.unique {
                if keys.iter().any(|k| k != key) {
                    return Err(EngineError::UniqueExists {
                        type_name: schema.type_name().to_string(),
                        index: index.name.clone(),
                    });
                }
                keys = vec![key.to_vec()];
            } else if !keys.iter().any(|k| k == key) {
                keys.push(key.to_vec());
            }

            txn.put(&entry, &encode_key_list(&keys))?;
        }
        Ok(())
    }

    /// Removes `key` from the entries implied by `record`. Entries left empty
    /// are deleted.
    pub fn delete<T: Transaction>(
        &self,
        txn: &T,
        schema: &EntitySchema,
        key: &[u8],
        record: &Document,
    ) -> Result<(), EngineError> {
        for index in schema.indexes() {
            let value = lookup_or_null(record, &index.field);
            let entry = self.entry_key(schema, index, &value)?;
            let mut keys = self.read_entry(txn, schema, index, &entry)?;
            keys.retain(|k| k != key);

            if keys.is_empty() {
                txn.delete(&entry)?;
            } else {
                txn.put(&entry, &encode_key_list(&keys))?;
            }
        }
        Ok(())
    }

    /// Deletes every entry of one index. Primary records are untouched.
    pub fn remove_index<T: Transaction>(
        &self,
        txn: &T,
        schema: &EntitySchema,
        name: &str,
    ) -> Result<usize, EngineError> {
        let index = schema
            .find_index(name)
            .ok_or_else(|| EngineError::IndexNotFound {
                type_name: schema.type_name().to_string(),
                index: name.to_string(),
            })?;

        let prefix =
            KeyPrefix::Index(Cow::Borrowed(schema.type_name()), Cow::Borrowed(&index.name))
                .encode();
        let keys = txn
            .scan_prefix(&prefix)?
            .map(|entry| entry.map(|(k, _)| k))
            .collect::<Result<Vec<_>, _>>()?;
        for key in &keys {
            txn.delete(key)?;
        }

        tracing::debug!(
            type_name = schema.type_name(),
            index = name,
            entries = keys.len(),
            "removed index"
        );
        Ok(keys.len())
    }

    /// Primary keys stored under any of `values`, deduplicated and in key
    /// order.
    ///
    /// Integral numbers are looked up under both their integer and floating
    /// encodings so `5` finds records indexed as `5.0` and vice versa.
    pub fn lookup<T: Transaction>(
        &self,
        txn: &T,
        schema: &EntitySchema,
        index: &IndexSpec,
        values: &[Bson],
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for value in values {
            for variant in numeric_variants(value) {
                let entry = self.entry_key(schema, index, &variant)?;
                for key in self.read_entry(txn, schema, index, &entry)? {
                    if seen.insert(key.clone()) {
                        found.push(key);
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn read_entry<T: Transaction>(
        &self,
        txn: &T,
        schema: &EntitySchema,
        index: &IndexSpec,
        entry: &[u8],
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        match txn.get(entry)? {
            None => Ok(Vec::new()),
            Some(bytes) => decode_key_list(&bytes).ok_or_else(|| EngineError::CorruptIndex {
                type_name: schema.type_name().to_string(),
                index: index.name.clone(),
                reason: "truncated key list".into(),
            }),
        }
    }
}

fn numeric_variants(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Int32(n) => vec![Bson::Int64(i64::from(*n)), Bson::Double(f64::from(*n))],
        Bson::Int64(n) => vec![Bson::Int64(*n), Bson::Double(*n as f64)],
        Bson::Double(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
            vec![Bson::Double(*f), Bson::Int64(*f as i64)]
        }
        other => vec![other.clone()],
    }
}
