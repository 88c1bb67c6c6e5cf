use std::cmp::Ordering;

use bson::Bson;

/// Orders two values of compatible kinds.
///
/// Integers and doubles promote to a common width. Strings compare by code
/// point, datetimes and timestamps chronologically, binary and object ids
/// byte-wise, arrays element by element. `None` means the kinds cannot be
/// ordered against each other.
pub(crate) fn compare(left: &Bson, right: &Bson) -> Option<Ordering> {
    match (left, right) {
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (Bson::String(a), Bson::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => {
            Some(a.timestamp_millis().cmp(&b.timestamp_millis()))
        }
        (Bson::Timestamp(a), Bson::Timestamp(b)) => {
            Some((a.time, a.increment).cmp(&(b.time, b.increment)))
        }
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.bytes().cmp(&b.bytes())),
        (Bson::Binary(a), Bson::Binary(b)) => Some(a.bytes.cmp(&b.bytes)),
        (Bson::Array(a), Bson::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => compare_numbers(left, right),
    }
}

fn compare_numbers(left: &Bson, right: &Bson) -> Option<Ordering> {
    match (as_int(left), as_int(right)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => {
            let a = as_float(left)?;
            let b = as_float(right)?;
            Some(a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b)))
        }
    }
}

fn as_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

pub(crate) fn as_float(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Equality with numeric promotion, falling back to structural equality when
/// the kinds cannot be ordered.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    match compare(left, right) {
        Some(ord) => ord == Ordering::Equal,
        None => left == right,
    }
}

/// Ordering used where a failure is not an option (sorting): kinds that
/// cannot be compared fall back to comparing their string forms.
pub(crate) fn compare_or_stringify(left: &Bson, right: &Bson) -> Ordering {
    compare(left, right).unwrap_or_else(|| stringify(left).cmp(&stringify(right)))
}

/// Text form used by regular-expression, prefix and suffix criteria.
/// Strings are used as-is, everything else in its display form.
pub(crate) fn stringify(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        Bson::Null => "null".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn kind(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Decimal128(_) => "decimal",
        _ => "other",
    }
}
