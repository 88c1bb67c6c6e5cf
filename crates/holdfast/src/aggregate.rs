use std::cmp::Ordering;
use std::marker::PhantomData;

use bson::{Bson, Document};
use holdfast_engine::{Entity, lookup};
use serde::de::DeserializeOwned;

use crate::access::Row;
use crate::error::HoldError;
use crate::value::{as_float, compare, compare_or_stringify, kind};

/// One group of matched rows sharing the same group-by values.
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub type_name: String,
    pub key: Vec<Bson>,
    pub rows: Vec<Row>,
}

/// Streams rows into groups kept in group-key order, inserting new groups at
/// their binary-search position so the data is walked once.
pub(crate) struct Grouper<'g> {
    type_name: &'g str,
    fields: &'g [&'g str],
    groups: Vec<Group>,
}

impl<'g> Grouper<'g> {
    pub fn new(type_name: &'g str, fields: &'g [&'g str]) -> Self {
        let groups = if fields.is_empty() {
            vec![Group {
                type_name: type_name.to_string(),
                key: Vec::new(),
                rows: Vec::new(),
            }]
        } else {
            Vec::new()
        };
        Self {
            type_name,
            fields,
            groups,
        }
    }

    pub fn push(&mut self, row: Row) -> Result<(), HoldError> {
        if self.fields.is_empty() {
            if let Some(all) = self.groups.first_mut() {
                all.rows.push(row);
            }
            return Ok(());
        }

        let key = self
            .fields
            .iter()
            .map(|field| {
                lookup(&row.doc, field)
                    .cloned()
                    .ok_or_else(|| HoldError::UnknownField {
                        type_name: self.type_name.to_string(),
                        field: field.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut failure = None;
        let position = self.groups.binary_search_by(|group| {
            compare_keys(self.fields, &group.key, &key).unwrap_or_else(|err| {
                failure.get_or_insert(err);
                Ordering::Less
            })
        });
        if let Some(err) = failure {
            return Err(err);
        }

        match position {
            Ok(i) => self.groups[i].rows.push(row),
            Err(i) => self.groups.insert(
                i,
                Group {
                    type_name: self.type_name.to_string(),
                    key,
                    rows: vec![row],
                },
            ),
        }
        Ok(())
    }

    pub fn finish(self) -> Vec<Group> {
        self.groups
    }
}

fn compare_keys(fields: &[&str], left: &[Bson], right: &[Bson]) -> Result<Ordering, HoldError> {
    for ((field, a), b) in fields.iter().zip(left).zip(right) {
        match compare(a, b) {
            Some(Ordering::Equal) => continue,
            Some(ord) => return Ok(ord),
            None => {
                return Err(HoldError::TypeMismatch {
                    field: field.to_string(),
                    left: kind(a),
                    right: kind(b),
                });
            }
        }
    }
    Ok(Ordering::Equal)
}

/// A group produced by an aggregate query, with reductions over its members.
#[derive(Debug, Clone)]
pub struct AggregateResult<T> {
    type_name: String,
    group: Vec<Bson>,
    rows: Vec<Document>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> AggregateResult<T> {
    pub(crate) fn from_group(group: Group) -> Self {
        Self {
            type_name: group.type_name,
            group: group.key,
            rows: group.rows.into_iter().map(|row| row.doc).collect(),
            _entity: PhantomData,
        }
    }

    /// Group-by values in the order the fields were given. Empty for the
    /// implicit all-records group.
    pub fn group(&self) -> &[Bson] {
        &self.group
    }

    /// Decodes one group-by value.
    pub fn group_as<V: DeserializeOwned>(&self, position: usize) -> Result<V, HoldError> {
        let value = self
            .group
            .get(position)
            .cloned()
            .ok_or_else(|| HoldError::InvalidOperation {
                field: position.to_string(),
                reason: format!("group has {} value(s)", self.group.len()),
            })?;
        Ok(bson::deserialize_from_bson(value)?)
    }

    /// Every member of the group.
    pub fn reduction(&self) -> Result<Vec<T>, HoldError> {
        self.rows
            .iter()
            .map(|doc| Ok(bson::deserialize_from_document(doc.clone())?))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Orders members by `field`, ascending.
    pub fn sort(&mut self, field: &str) -> Result<(), HoldError> {
        for doc in &self.rows {
            self.value(doc, field)?;
        }
        self.rows.sort_by(|a, b| match (lookup(a, field), lookup(b, field)) {
            (Some(x), Some(y)) => compare_or_stringify(x, y),
            _ => Ordering::Equal,
        });
        Ok(())
    }

    pub fn min(&self, field: &str) -> Result<Option<T>, HoldError> {
        self.extreme(field, Ordering::Less)
    }

    pub fn max(&self, field: &str) -> Result<Option<T>, HoldError> {
        self.extreme(field, Ordering::Greater)
    }

    pub fn sum(&self, field: &str) -> Result<f64, HoldError> {
        let mut total = 0.0;
        for doc in &self.rows {
            let value = self.value(doc, field)?;
            total += as_float(value).ok_or_else(|| HoldError::TypeMismatch {
                field: field.to_string(),
                left: kind(value),
                right: "double",
            })?;
        }
        Ok(total)
    }

    /// Mean of a numeric field; 0 for an empty group.
    pub fn avg(&self, field: &str) -> Result<f64, HoldError> {
        if self.rows.is_empty() {
            return Ok(0.0);
        }
        Ok(self.sum(field)? / self.rows.len() as f64)
    }

    fn extreme(&self, field: &str, wanted: Ordering) -> Result<Option<T>, HoldError> {
        let mut best: Option<(&Document, &Bson)> = None;
        for doc in &self.rows {
            let value = self.value(doc, field)?;
            let replace = match best {
                None => true,
                Some((_, current)) => {
                    let ord = compare(value, current).ok_or_else(|| HoldError::TypeMismatch {
                        field: field.to_string(),
                        left: kind(value),
                        right: kind(current),
                    })?;
                    ord == wanted
                }
            };
            if replace {
                best = Some((doc, value));
            }
        }
        best.map(|(doc, _)| Ok(bson::deserialize_from_document(doc.clone())?))
            .transpose()
    }

    fn value<'d>(&self, doc: &'d Document, field: &str) -> Result<&'d Bson, HoldError> {
        lookup(doc, field).ok_or_else(|| HoldError::UnknownField {
            type_name: self.type_name.clone(),
            field: field.to_string(),
        })
    }
}
