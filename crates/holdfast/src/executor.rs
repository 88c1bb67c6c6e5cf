use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use bson::{Bson, Document};
use holdfast_engine::{
    Bookmark, Candidate, Codec, CodecError, Cursor, EngineError, EntitySchema, IndexManager,
    IndexSpec, Key, ScanSource, SchemaRegistry, lookup,
};
use holdfast_store::Transaction;

use crate::access::{QueryRunner, Row};
use crate::aggregate::{Group, Grouper};
use crate::error::{HoldError, QueryError};
use crate::eval::Evaluator;
use crate::query::{KEY, Query};
use crate::value::{compare_or_stringify, kind};

pub(crate) type Sink<'s> = dyn FnMut(Row) -> Result<(), HoldError> + 's;

/// How one pass finds its candidates.
enum Plan<'s> {
    /// Resolve literal values through the index, then fetch those records.
    Lookup { index: &'s IndexSpec, values: Vec<Bson> },
    /// Page through records or index entries. `filter` names the field whose
    /// literal criteria are checked against index values before records load.
    Scan { source: ScanSource, filter: Option<&'s str> },
}

impl Plan<'_> {
    fn describe(&self) -> String {
        match self {
            Plan::Lookup { index, values } => format!("lookup {} x{}", index.name, values.len()),
            Plan::Scan {
                source: ScanSource::Index { index, .. },
                filter,
            } => format!("index scan {index} (filtered: {})", filter.is_some()),
            Plan::Scan { .. } => "record scan".to_string(),
        }
    }
}

/// Skip and limit shared by every pass of one query.
struct Pager {
    skip: usize,
    limit: Option<usize>,
    emitted: usize,
}

impl Pager {
    fn new(query: &Query) -> Self {
        Self {
            skip: query.skip_count(),
            limit: query.limit_count(),
            emitted: 0,
        }
    }

    fn full(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    /// Counts a match; false while it is still being skipped.
    fn admit(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return false;
        }
        self.emitted += 1;
        true
    }
}

/// Runs queries inside one transaction.
///
/// A query runs as a pass over its own AND set followed by one pass per
/// alternative. Keys already emitted are skipped by later passes, and skip
/// and limit count across all of them.
///
/// Every cursor the executor opens shares one bookmark, so a query issued
/// from inside a predicate parks the enclosing scan and hands it back when
/// it finishes.
pub(crate) struct Executor<'x, T: Transaction> {
    txn: &'x T,
    codec: &'x dyn Codec,
    registry: &'x SchemaRegistry,
    batch_size: usize,
    bookmark: Bookmark,
}

impl<'x, T: Transaction> Executor<'x, T> {
    pub fn new(
        txn: &'x T,
        codec: &'x dyn Codec,
        registry: &'x SchemaRegistry,
        batch_size: usize,
    ) -> Self {
        Self {
            txn,
            codec,
            registry,
            batch_size,
            bookmark: Bookmark::new(),
        }
    }

    pub fn find_rows(&self, schema: &Arc<EntitySchema>, query: &Query) -> Result<Vec<Row>, HoldError> {
        let mut rows = Vec::new();
        self.walk(schema, query, &mut |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    pub fn count(&self, schema: &Arc<EntitySchema>, query: &Query) -> Result<usize, HoldError> {
        let mut count = 0;
        self.walk(schema, query, &mut |_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    pub fn aggregate(
        &self,
        schema: &Arc<EntitySchema>,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<Group>, HoldError> {
        for field in group_by {
            if *field == KEY {
                return Err(QueryError::InvalidField(String::new()).into());
            }
        }
        let mut grouper = Grouper::new(schema.type_name(), group_by);
        self.walk(schema, query, &mut |row| grouper.push(row))?;
        Ok(grouper.finish())
    }

    /// Feeds every matching row to `sink`, sorted and paged as the query asks.
    pub fn walk(
        &self,
        schema: &Arc<EntitySchema>,
        query: &Query,
        sink: &mut Sink<'_>,
    ) -> Result<(), HoldError> {
        query.validate()?;

        if !query.sort_fields().is_empty() {
            let mut rows = self.find_rows(schema, &query.unpaged())?;
            sort_rows(schema, query, &mut rows)?;
            let limit = query.limit_count().unwrap_or(usize::MAX);
            for row in rows.into_iter().skip(query.skip_count()).take(limit) {
                sink(row)?;
            }
            return Ok(());
        }

        let mut seen = HashSet::new();
        let mut pager = Pager::new(query);
        self.pass(schema, query, &mut seen, &mut pager, sink)
    }

    fn pass(
        &self,
        schema: &Arc<EntitySchema>,
        query: &Query,
        seen: &mut HashSet<Vec<u8>>,
        pager: &mut Pager,
        sink: &mut Sink<'_>,
    ) -> Result<(), HoldError> {
        let eval = Evaluator::new(schema, self.codec, self);
        let plan = self.plan(schema, query)?;
        tracing::trace!(type_name = schema.type_name(), plan = %plan.describe(), "query pass");

        match plan {
            Plan::Lookup { index, values } => {
                let keys =
                    IndexManager::new(self.codec).lookup(self.txn, schema, index, &values)?;
                let record_keys: Vec<Vec<u8>> = keys
                    .iter()
                    .map(|k| Key::record(schema.type_name(), k).encode())
                    .collect();
                let refs: Vec<&[u8]> = record_keys.iter().map(Vec::as_slice).collect();
                let records = self.txn.multi_get(&refs)?;

                for (key, value) in keys.into_iter().zip(records) {
                    if pager.full() {
                        break;
                    }
                    let value = value.ok_or_else(|| EngineError::CorruptIndex {
                        type_name: schema.type_name().to_string(),
                        index: index.name.clone(),
                        reason: "entry points at a missing record".into(),
                    })?;
                    self.consider(&eval, schema, query, Candidate { key, value }, seen, pager, sink)?;
                }
            }
            Plan::Scan { source, filter } => {
                let mut cursor =
                    Cursor::<HoldError>::new(source, self.codec, self.batch_size, Some(&self.bookmark));
                if let Some(field) = filter {
                    cursor = cursor.with_filter(eval.index_filter(query, field));
                }
                while !pager.full() {
                    let Some(candidate) = cursor.next(self.txn)? else {
                        break;
                    };
                    self.consider(&eval, schema, query, candidate, seen, pager, sink)?;
                }
            }
        }

        for alternative in query.ors() {
            if pager.full() {
                break;
            }
            self.pass(schema, alternative, seen, pager, sink)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn consider(
        &self,
        eval: &Evaluator<'_>,
        schema: &EntitySchema,
        query: &Query,
        candidate: Candidate,
        seen: &mut HashSet<Vec<u8>>,
        pager: &mut Pager,
        sink: &mut Sink<'_>,
    ) -> Result<(), HoldError> {
        let Candidate { key, value } = candidate;
        if seen.contains(&key) {
            return Ok(());
        }
        let doc = self.decode(schema, &key, &value)?;
        if !eval.matches_all(query, &key, &doc)? {
            return Ok(());
        }
        seen.insert(key.clone());
        if pager.admit() {
            sink(Row { key, doc })?;
        }
        Ok(())
    }

    fn plan<'s>(&self, schema: &'s EntitySchema, query: &'s Query) -> Result<Plan<'s>, HoldError> {
        let index = match query.index_name() {
            Some(name) => Some(schema.find_index(name).ok_or_else(|| QueryError::UnknownIndex {
                type_name: schema.type_name().to_string(),
                index: name.to_string(),
            })?),
            None => match query.criteria() {
                [(field, _)] if field != KEY => schema.index_on(field),
                _ => None,
            },
        };
        let Some(index) = index else {
            return Ok(Plan::Scan {
                source: ScanSource::Records {
                    type_name: schema.type_name().to_string(),
                },
                filter: None,
            });
        };

        let criteria = query.criteria_for(&index.field);
        if query.ors().is_empty() {
            if let Some([criterion]) = criteria {
                if let Some(values) = criterion.lookup_values() {
                    return Ok(Plan::Lookup { index, values });
                }
            }
        }

        let filter = (criteria.is_some() && self.codec.ordered_keys()).then_some(index.field.as_str());
        Ok(Plan::Scan {
            source: ScanSource::Index {
                type_name: schema.type_name().to_string(),
                index: index.name.clone(),
            },
            filter,
        })
    }

    /// Decodes a stored record and fills the key field from the primary key.
    pub fn decode(&self, schema: &EntitySchema, key: &[u8], value: &[u8]) -> Result<Document, HoldError> {
        let mut doc = match self.codec.decode(value)? {
            Bson::Document(doc) => doc,
            other => {
                return Err(CodecError::msg(format!(
                    "{} record decoded to {}, not a document",
                    schema.type_name(),
                    kind(&other)
                ))
                .into());
            }
        };
        if let Some(field) = schema.key_field() {
            doc.insert(field, self.codec.decode_key(key)?);
        }
        Ok(doc)
    }
}

impl<T: Transaction> QueryRunner for Executor<'_, T> {
    fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    fn run_nested(&self, schema: &Arc<EntitySchema>, query: &Query) -> Result<Vec<Row>, HoldError> {
        self.find_rows(schema, query)
    }

    fn aggregate_nested(
        &self,
        schema: &Arc<EntitySchema>,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<Group>, HoldError> {
        self.aggregate(schema, query, group_by)
    }
}

fn sort_rows(schema: &EntitySchema, query: &Query, rows: &mut [Row]) -> Result<(), HoldError> {
    let fields = query.sort_fields();
    for row in rows.iter() {
        for field in fields {
            if lookup(&row.doc, field).is_none() {
                return Err(HoldError::UnknownField {
                    type_name: schema.type_name().to_string(),
                    field: field.clone(),
                });
            }
        }
    }

    let reverse = query.is_reversed();
    rows.sort_by(|a, b| {
        for field in fields {
            let ord = match (lookup(&a.doc, field), lookup(&b.doc, field)) {
                (Some(x), Some(y)) => compare_or_stringify(x, y),
                _ => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return if reverse { ord.reverse() } else { ord };
            }
        }
        Ordering::Equal
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::where_field;
    use bson::doc;
    use holdfast_engine::BsonCodec;
    use holdfast_store::{MemoryStore, Store};

    fn schema() -> Arc<EntitySchema> {
        Arc::new(EntitySchema::new("Thing").key("id").index("kind"))
    }

    fn seeded(codec: &dyn Codec) -> MemoryStore {
        let store = MemoryStore::new();
        let schema = schema();
        let txn = store.begin(false).unwrap();
        for n in 0..25i64 {
            let kind = if n % 3 == 0 { "fizz" } else { "plain" };
            let record = doc! { "id": n, "kind": kind, "n": 25 - n };
            let key = codec.encode_key(&Bson::Int64(n)).unwrap();
            txn.put(&Key::record("Thing", &key).encode(), &codec.encode(&Bson::Document(record.clone())).unwrap())
                .unwrap();
            IndexManager::new(codec).add(&txn, &schema, &key, &record).unwrap();
        }
        txn.commit().unwrap();
        store
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r.doc.get_i64("id").unwrap()).collect()
    }

    #[test]
    fn plans_follow_criteria() {
        let codec = BsonCodec;
        let store = MemoryStore::new();
        let txn = store.begin(true).unwrap();
        let registry = SchemaRegistry::new();
        let exec = Executor::new(&txn, &codec, &registry, 4);
        let schema = schema();

        let q = where_field("kind").eq("fizz");
        assert!(matches!(exec.plan(&schema, &q).unwrap(), Plan::Lookup { .. }));
        let q = where_field("kind").gt("a");
        assert!(matches!(exec.plan(&schema, &q).unwrap(), Plan::Scan { filter: Some("kind"), .. }));
        let q = where_field("n").gt(1);
        assert!(matches!(
            exec.plan(&schema, &q).unwrap(),
            Plan::Scan { source: ScanSource::Records { .. }, .. }
        ));
        let q = Query::new().index("missing");
        assert!(matches!(
            exec.plan(&schema, &q),
            Err(HoldError::InvalidQuery(QueryError::UnknownIndex { .. }))
        ));
    }

    #[test]
    fn index_and_scan_agree() {
        let codec = BsonCodec;
        let store = seeded(&codec);
        let txn = store.begin(true).unwrap();
        let registry = SchemaRegistry::new();
        let exec = Executor::new(&txn, &codec, &registry, 4);
        let schema = schema();

        let by_index = exec.find_rows(&schema, &where_field("kind").eq("fizz")).unwrap();
        let by_scan = exec
            .find_rows(&schema, &where_field("kind").eq("fizz").and("n").ge(0))
            .unwrap();
        assert_eq!(ids(&by_index), vec![0, 3, 6, 9, 12, 15, 18, 21, 24]);
        assert_eq!(ids(&by_index), ids(&by_scan));
    }

    #[test]
    fn paging_spans_alternatives() {
        let codec = BsonCodec;
        let store = seeded(&codec);
        let txn = store.begin(true).unwrap();
        let registry = SchemaRegistry::new();
        let exec = Executor::new(&txn, &codec, &registry, 4);

        let q = where_field("id")
            .lt(2)
            .or(where_field("id").gt(22))
            .skip(1)
            .limit(3);
        assert_eq!(ids(&exec.find_rows(&schema(), &q).unwrap()), vec![1, 23, 24]);
    }

    #[test]
    fn sorted_then_paged() {
        let codec = BsonCodec;
        let store = seeded(&codec);
        let txn = store.begin(true).unwrap();
        let registry = SchemaRegistry::new();
        let exec = Executor::new(&txn, &codec, &registry, 4);

        let q = where_field("kind").eq("fizz").sort_by(&["n"]).skip(2).limit(3);
        assert_eq!(ids(&exec.find_rows(&schema(), &q).unwrap()), vec![18, 15, 12]);
        let q = Query::new().sort_by(&["nope"]);
        assert!(matches!(
            exec.find_rows(&schema(), &q),
            Err(HoldError::UnknownField { .. })
        ));
    }

    #[test]
    fn invalid_queries_fail_before_reading() {
        let codec = BsonCodec;
        let store = MemoryStore::new();
        let txn = store.begin(true).unwrap();
        let registry = SchemaRegistry::new();
        let exec = Executor::new(&txn, &codec, &registry, 4);
        let q = Query::new().skip(1).skip(2);
        assert!(matches!(
            exec.count(&schema(), &q),
            Err(HoldError::InvalidQuery(QueryError::SkipAlreadySet))
        ));
    }
}
