use std::sync::Arc;

use bson::{Bson, Document};
use holdfast_engine::{Entity, EntitySchema, SchemaRegistry};
use serde::de::DeserializeOwned;

use crate::aggregate::{AggregateResult, Group};
use crate::error::HoldError;
use crate::query::Query;

/// A matched record: its codec-encoded primary key and decoded document,
/// with the key field (if declared) filled from the key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row {
    pub key: Vec<u8>,
    pub doc: Document,
}

/// Nested execution inside the transaction of the query being evaluated.
pub(crate) trait QueryRunner {
    fn registry(&self) -> &SchemaRegistry;
    fn run_nested(&self, schema: &Arc<EntitySchema>, query: &Query) -> Result<Vec<Row>, HoldError>;
    fn aggregate_nested(
        &self,
        schema: &Arc<EntitySchema>,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<Group>, HoldError>;
}

/// What a predicate criterion sees: the tested field, the whole record, and
/// the ability to run further queries in the same transaction.
pub struct RecordAccess<'r> {
    field: &'r Bson,
    record: &'r Document,
    runner: &'r dyn QueryRunner,
}

impl<'r> RecordAccess<'r> {
    pub(crate) fn new(field: &'r Bson, record: &'r Document, runner: &'r dyn QueryRunner) -> Self {
        Self {
            field,
            record,
            runner,
        }
    }

    pub fn field(&self) -> &Bson {
        self.field
    }

    pub fn record(&self) -> &Document {
        self.record
    }

    pub fn record_as<T: DeserializeOwned>(&self) -> Result<T, HoldError> {
        Ok(bson::deserialize_from_document(self.record.clone())?)
    }

    /// Runs `query` against `T` in the enclosing transaction, seeing any
    /// writes that transaction has made.
    pub fn sub_query<T: Entity>(&self, query: &Query) -> Result<Vec<T>, HoldError> {
        let schema = self.runner.registry().get::<T>()?;
        self.runner
            .run_nested(&schema, query)?
            .into_iter()
            .map(|row| Ok(bson::deserialize_from_document(row.doc)?))
            .collect()
    }

    pub fn sub_aggregate<T: Entity>(
        &self,
        query: &Query,
        group_by: &[&str],
    ) -> Result<Vec<AggregateResult<T>>, HoldError> {
        let schema = self.runner.registry().get::<T>()?;
        let groups = self.runner.aggregate_nested(&schema, query, group_by)?;
        Ok(groups.into_iter().map(AggregateResult::from_group).collect())
    }
}
