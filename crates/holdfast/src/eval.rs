use std::borrow::Cow;
use std::cmp::Ordering;

use bson::{Bson, Document};
use holdfast_engine::{Codec, EntitySchema, lookup};

use crate::access::{QueryRunner, RecordAccess};
use crate::error::HoldError;
use crate::query::{Criterion, KEY, Operand, Query};
use crate::value::{compare, kind, stringify, values_equal};

/// The record a criterion is tested against.
#[derive(Clone, Copy)]
struct Subject<'s> {
    key: &'s [u8],
    doc: &'s Document,
}

/// Tests decoded records against a query's criteria.
#[derive(Clone, Copy)]
pub(crate) struct Evaluator<'e> {
    schema: &'e EntitySchema,
    codec: &'e dyn Codec,
    runner: &'e dyn QueryRunner,
}

impl<'e> Evaluator<'e> {
    pub fn new(schema: &'e EntitySchema, codec: &'e dyn Codec, runner: &'e dyn QueryRunner) -> Self {
        Self {
            schema,
            codec,
            runner,
        }
    }

    /// The AND set of `query` holds, or any of its alternatives matches.
    pub fn matches(&self, query: &Query, key: &[u8], doc: &Document) -> Result<bool, HoldError> {
        if self.matches_all(query, key, doc)? {
            return Ok(true);
        }
        for alternative in query.ors() {
            if self.matches(alternative, key, doc)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The AND set of `query` holds. Alternatives are not consulted.
    pub fn matches_all(&self, query: &Query, key: &[u8], doc: &Document) -> Result<bool, HoldError> {
        let subject = Subject { key, doc };
        for (field, criteria) in query.criteria() {
            let value = self.resolve(field, subject)?;
            for criterion in criteria {
                if !self.test(field, criterion, &value, Some(subject))? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Filter over decoded index values built from the literal criteria on
    /// `field`. Anything needing the full record is left to `matches`.
    pub fn index_filter(
        self,
        query: &Query,
        field: &str,
    ) -> impl FnMut(&Bson) -> Result<bool, HoldError> + 'e {
        let field = field.to_string();
        let criteria: Vec<Criterion> = query
            .criteria_for(&field)
            .unwrap_or_default()
            .iter()
            .filter(|c| c.is_literal())
            .cloned()
            .collect();
        move |value| {
            for criterion in &criteria {
                if !self.test(&field, criterion, value, None)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }

    fn resolve<'s>(&self, field: &str, subject: Subject<'s>) -> Result<Cow<'s, Bson>, HoldError> {
        if field == KEY {
            return Ok(Cow::Owned(self.codec.decode_key(subject.key)?));
        }
        lookup(subject.doc, field)
            .map(Cow::Borrowed)
            .ok_or_else(|| HoldError::UnknownField {
                type_name: self.schema.type_name().to_string(),
                field: field.to_string(),
            })
    }

    fn operand<'s>(
        &self,
        op: &'s Operand,
        subject: Option<Subject<'s>>,
    ) -> Result<Cow<'s, Bson>, HoldError> {
        match (op, subject) {
            (Operand::Value(v), _) => Ok(Cow::Borrowed(v)),
            (Operand::Field(name), Some(subject)) => self.resolve(name, subject),
            (Operand::Field(name), None) => Err(HoldError::InvalidOperation {
                field: name.clone(),
                reason: "field reference outside a record".into(),
            }),
        }
    }

    fn test(
        &self,
        field: &str,
        criterion: &Criterion,
        value: &Bson,
        subject: Option<Subject<'_>>,
    ) -> Result<bool, HoldError> {
        match criterion {
            Criterion::Eq(op) => Ok(values_equal(value, &*self.operand(op, subject)?)),
            Criterion::Ne(op) => Ok(!values_equal(value, &*self.operand(op, subject)?)),
            Criterion::Gt(op) => {
                Ok(ordered(field, value, &*self.operand(op, subject)?)? == Ordering::Greater)
            }
            Criterion::Lt(op) => {
                Ok(ordered(field, value, &*self.operand(op, subject)?)? == Ordering::Less)
            }
            Criterion::Ge(op) => {
                Ok(ordered(field, value, &*self.operand(op, subject)?)? != Ordering::Less)
            }
            Criterion::Le(op) => {
                Ok(ordered(field, value, &*self.operand(op, subject)?)? != Ordering::Greater)
            }
            Criterion::In(ops) => {
                for op in ops {
                    if values_equal(value, &*self.operand(op, subject)?) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Criterion::RegExp(re) => Ok(re.is_match(&stringify(value))),
            Criterion::HasPrefix(prefix) => Ok(stringify(value).starts_with(prefix.as_str())),
            Criterion::HasSuffix(suffix) => Ok(stringify(value).ends_with(suffix.as_str())),
            Criterion::IsNull => self.is_null(field, value),
            Criterion::HasKey(key) => match value {
                Bson::Document(doc) => Ok(doc.contains_key(key)),
                other => Err(HoldError::InvalidOperation {
                    field: field.to_string(),
                    reason: format!("has_key needs a document, found {}", kind(other)),
                }),
            },
            Criterion::Contains(op) => {
                let needle = self.operand(op, subject)?;
                Ok(elements(value).iter().any(|e| values_equal(e, &needle)))
            }
            Criterion::ContainsAny(ops) => {
                let items = elements(value);
                for op in ops {
                    let needle = self.operand(op, subject)?;
                    if items.iter().any(|e| values_equal(e, &needle)) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Criterion::ContainsAll(ops) => {
                let items = elements(value);
                for op in ops {
                    let needle = self.operand(op, subject)?;
                    if !items.iter().any(|e| values_equal(e, &needle)) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Criterion::Predicate(predicate) => match subject {
                Some(subject) => predicate(&RecordAccess::new(value, subject.doc, self.runner)),
                None => Ok(true),
            },
        }
    }

    fn is_null(&self, field: &str, value: &Bson) -> Result<bool, HoldError> {
        match value {
            Bson::Null => Ok(true),
            Bson::Array(_) | Bson::Document(_) | Bson::Binary(_) => Ok(false),
            _ if self.schema.is_nullable(field) => Ok(false),
            other => Err(HoldError::InvalidOperation {
                field: field.to_string(),
                reason: format!("{} values are never null", kind(other)),
            }),
        }
    }
}

fn ordered(field: &str, left: &Bson, right: &Bson) -> Result<Ordering, HoldError> {
    compare(left, right).ok_or_else(|| HoldError::TypeMismatch {
        field: field.to_string(),
        left: kind(left),
        right: kind(right),
    })
}

/// Array members of a field. A lone scalar counts as a one-element array and
/// null as an empty one.
fn elements(value: &Bson) -> Cow<'_, [Bson]> {
    match value {
        Bson::Array(items) => Cow::Borrowed(items.as_slice()),
        Bson::Null => Cow::Owned(Vec::new()),
        other => Cow::Owned(vec![other.clone()]),
    }
}
