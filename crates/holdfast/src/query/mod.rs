mod display;

use std::fmt;
use std::sync::Arc;

use bson::Bson;
use regex::Regex;

use crate::access::RecordAccess;
use crate::error::{HoldError, QueryError};

/// Field name that addresses the primary key instead of a record field.
pub const KEY: &str = "";

/// Caller-supplied test run against a field value.
pub type Predicate = Arc<dyn Fn(&RecordAccess<'_>) -> Result<bool, HoldError> + Send + Sync>;

// ── Operands ─────────────────────────────────────────────────

/// Right-hand side of a comparison: a literal, or another field of the same
/// record resolved per row.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Bson),
    Field(String),
}

/// Compares against another field of the record being tested.
///
/// ```ignore
/// where_field("Color").eq(field_ref("Fruit"))
/// ```
pub fn field_ref(name: impl Into<String>) -> Operand {
    Operand::Field(name.into())
}

macro_rules! operand_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Value(Bson::from(value))
                }
            }
        )*
    };
}

operand_from!(
    Bson,
    &str,
    String,
    i32,
    i64,
    f64,
    bool,
    bson::DateTime,
    bson::Document,
    bson::oid::ObjectId,
    Vec<Bson>,
);

impl From<u32> for Operand {
    fn from(value: u32) -> Self {
        Operand::Value(Bson::Int64(i64::from(value)))
    }
}

/// Keys drawn by `insert_next` are `u64`. Values beyond `i64::MAX` cannot be
/// stored as BSON integers, so they become doubles, which still order above
/// every stored integer.
impl From<u64> for Operand {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(n) => Operand::Value(Bson::Int64(n)),
            Err(_) => Operand::Value(Bson::Double(value as f64)),
        }
    }
}

// ── Criteria ─────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) enum Criterion {
    Eq(Operand),
    Ne(Operand),
    Gt(Operand),
    Lt(Operand),
    Ge(Operand),
    Le(Operand),
    In(Vec<Operand>),
    RegExp(Regex),
    Predicate(Predicate),
    IsNull,
    HasPrefix(String),
    HasSuffix(String),
    HasKey(String),
    Contains(Operand),
    ContainsAny(Vec<Operand>),
    ContainsAll(Vec<Operand>),
}

impl Criterion {
    pub(crate) fn is_predicate(&self) -> bool {
        matches!(self, Criterion::Predicate(_))
    }

    /// True when the criterion can be checked against a bare value, with no
    /// other field of the record and no caller code involved.
    pub(crate) fn is_literal(&self) -> bool {
        let literal = |op: &Operand| matches!(op, Operand::Value(_));
        match self {
            Criterion::Predicate(_) => false,
            Criterion::Eq(op)
            | Criterion::Ne(op)
            | Criterion::Gt(op)
            | Criterion::Lt(op)
            | Criterion::Ge(op)
            | Criterion::Le(op)
            | Criterion::Contains(op) => literal(op),
            Criterion::In(ops) | Criterion::ContainsAny(ops) | Criterion::ContainsAll(ops) => {
                ops.iter().all(literal)
            }
            _ => true,
        }
    }

    /// Literal values an index lookup can resolve directly, for `Eq` and `In`
    /// criteria with no field references.
    pub(crate) fn lookup_values(&self) -> Option<Vec<Bson>> {
        let literal = |op: &Operand| match op {
            Operand::Value(v) => Some(v.clone()),
            Operand::Field(_) => None,
        };
        match self {
            Criterion::Eq(op) => Some(vec![literal(op)?]),
            Criterion::In(ops) => ops.iter().map(literal).collect(),
            _ => None,
        }
    }
}

impl fmt::Debug for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ── Query ────────────────────────────────────────────────────

/// A compiled filter: field criteria joined by AND in insertion order, plus
/// alternative queries tried in order when the AND set fails.
///
/// Built fluently from [`where_field`]. Construction never panics; misuse is
/// recorded and reported as [`HoldError::InvalidQuery`] when the query runs.
#[derive(Clone, Default)]
pub struct Query {
    criteria: Vec<(String, Vec<Criterion>)>,
    ors: Vec<Query>,
    index: Option<String>,
    sort: Vec<String>,
    reverse: bool,
    skip: Option<usize>,
    limit: Option<usize>,
    error: Option<QueryError>,
}

/// Starts a query with a criterion on `field`. Use [`KEY`] for the primary key.
pub fn where_field(field: impl Into<String>) -> FieldBuilder {
    Query::new().and(field)
}

impl Query {
    /// A query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts another criterion; it must hold together with the existing ones.
    pub fn and(mut self, field: impl Into<String>) -> FieldBuilder {
        let field = field.into();
        if field != KEY && !valid_field_path(&field) {
            self.fail(QueryError::InvalidField(field.clone()));
        }
        FieldBuilder { query: self, field }
    }

    /// Adds an alternative: records failing this query's criteria are still
    /// returned when they match `query`.
    pub fn or(mut self, query: Query) -> Self {
        if query.skip.is_some() || query.limit.is_some() {
            self.fail(QueryError::PagingInOr);
        }
        if let Some(err) = query.error.clone() {
            self.fail(err);
        }
        self.ors.push(query);
        self
    }

    /// Names the index to drive iteration with.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.contains('.') {
            self.fail(QueryError::NestedIndex(name.clone()));
        }
        self.index = Some(name);
        self
    }

    /// Orders results by the given fields, earlier fields first. Repeated
    /// fields are ignored.
    pub fn sort_by(mut self, fields: &[&str]) -> Self {
        for field in fields {
            if *field == KEY {
                self.fail(QueryError::SortByKey);
                continue;
            }
            if !valid_field_path(field) {
                self.fail(QueryError::InvalidField(field.to_string()));
                continue;
            }
            if !self.sort.iter().any(|f| f == field) {
                self.sort.push(field.to_string());
            }
        }
        self
    }

    /// Flips the sort direction. Calling it twice restores the original order.
    pub fn reverse(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }

    pub fn skip(mut self, amount: usize) -> Self {
        if self.skip.is_some() {
            self.fail(QueryError::SkipAlreadySet);
        } else {
            self.skip = Some(amount);
        }
        self
    }

    pub fn limit(mut self, amount: usize) -> Self {
        if self.limit.is_some() {
            self.fail(QueryError::LimitAlreadySet);
        } else {
            self.limit = Some(amount);
        }
        self
    }

    /// True when the query has no criteria, no alternatives, and no index, and
    /// therefore matches every record.
    pub fn is_empty(&self) -> bool {
        self.index.is_none() && self.criteria.is_empty() && self.ors.is_empty()
    }

    /// The first construction error, if any.
    pub fn validate(&self) -> Result<(), QueryError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn sort_fields(&self) -> &[String] {
        &self.sort
    }

    pub fn is_reversed(&self) -> bool {
        self.reverse
    }

    pub fn skip_count(&self) -> usize {
        self.skip.unwrap_or(0)
    }

    pub fn limit_count(&self) -> Option<usize> {
        self.limit
    }

    pub(crate) fn criteria(&self) -> &[(String, Vec<Criterion>)] {
        &self.criteria
    }

    pub(crate) fn criteria_for(&self, field: &str) -> Option<&[Criterion]> {
        self.criteria
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, c)| c.as_slice())
    }

    pub(crate) fn ors(&self) -> &[Query] {
        &self.ors
    }

    /// Same filter with sort and paging stripped.
    pub(crate) fn unpaged(&self) -> Query {
        Query {
            sort: Vec::new(),
            reverse: false,
            skip: None,
            limit: None,
            ..self.clone()
        }
    }

    /// Same filter and sort capped to one result.
    pub(crate) fn first_only(&self) -> Query {
        Query {
            limit: Some(1),
            ..self.clone()
        }
    }

    fn push(mut self, field: String, criterion: Criterion) -> Self {
        if field == KEY && criterion.is_predicate() {
            self.fail(QueryError::PredicateOnKey);
        }
        match self.criteria.iter_mut().find(|(f, _)| *f == field) {
            Some((_, list)) => list.push(criterion),
            None => self.criteria.push((field, vec![criterion])),
        }
        self
    }

    fn fail(&mut self, err: QueryError) {
        self.error.get_or_insert(err);
    }
}

fn valid_field_path(path: &str) -> bool {
    path.split('.').all(|segment| {
        segment
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
    })
}

// ── Field builder ────────────────────────────────────────────

/// A query waiting for the operator that applies to `field`.
#[must_use = "a field builder does nothing until an operator is applied"]
pub struct FieldBuilder {
    query: Query,
    field: String,
}

impl FieldBuilder {
    fn apply(self, criterion: Criterion) -> Query {
        self.query.push(self.field, criterion)
    }

    pub fn eq(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Eq(value.into()))
    }

    pub fn ne(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Ne(value.into()))
    }

    pub fn gt(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Gt(value.into()))
    }

    pub fn lt(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Lt(value.into()))
    }

    pub fn ge(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Ge(value.into()))
    }

    pub fn le(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Le(value.into()))
    }

    /// Matches when the field equals any of `values`.
    pub fn is_in<I, V>(self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        self.apply(Criterion::In(values.into_iter().map(Into::into).collect()))
    }

    /// Matches the text form of the field against `pattern`.
    pub fn reg_exp(self, pattern: Regex) -> Query {
        self.apply(Criterion::RegExp(pattern))
    }

    /// Runs `predicate` against each candidate. Not allowed on [`KEY`].
    pub fn match_fn<F>(self, predicate: F) -> Query
    where
        F: Fn(&RecordAccess<'_>) -> Result<bool, HoldError> + Send + Sync + 'static,
    {
        self.apply(Criterion::Predicate(Arc::new(predicate)))
    }

    pub fn is_null(self) -> Query {
        self.apply(Criterion::IsNull)
    }

    pub fn has_prefix(self, prefix: impl Into<String>) -> Query {
        self.apply(Criterion::HasPrefix(prefix.into()))
    }

    pub fn has_suffix(self, suffix: impl Into<String>) -> Query {
        self.apply(Criterion::HasSuffix(suffix.into()))
    }

    /// Matches document-shaped fields holding `key`.
    pub fn has_key(self, key: impl Into<String>) -> Query {
        self.apply(Criterion::HasKey(key.into()))
    }

    /// Matches array fields holding `value`. A scalar field is treated as a
    /// one-element array.
    pub fn contains(self, value: impl Into<Operand>) -> Query {
        self.apply(Criterion::Contains(value.into()))
    }

    pub fn contains_any<I, V>(self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        self.apply(Criterion::ContainsAny(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn contains_all<I, V>(self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        self.apply(Criterion::ContainsAll(
            values.into_iter().map(Into::into).collect(),
        ))
    }
}
