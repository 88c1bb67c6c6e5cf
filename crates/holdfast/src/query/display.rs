use std::fmt;

use super::{Criterion, KEY, Operand, Query};

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(value) => write!(f, "{value}"),
            Operand::Field(name) => write!(f, "field {name}"),
        }
    }
}

struct List<'a>(&'a [Operand]);

impl fmt::Display for List<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, op) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{op}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Eq(v) => write!(f, "== {v}"),
            Criterion::Ne(v) => write!(f, "!= {v}"),
            Criterion::Gt(v) => write!(f, "> {v}"),
            Criterion::Lt(v) => write!(f, "< {v}"),
            Criterion::Ge(v) => write!(f, ">= {v}"),
            Criterion::Le(v) => write!(f, "<= {v}"),
            Criterion::In(vs) => write!(f, "in {}", List(vs)),
            Criterion::RegExp(re) => write!(f, "matches the regular expression {re}"),
            Criterion::Predicate(_) => f.write_str("matches the function"),
            Criterion::IsNull => f.write_str("is nil"),
            Criterion::HasPrefix(s) => write!(f, "starts with {s}"),
            Criterion::HasSuffix(s) => write!(f, "ends with {s}"),
            Criterion::HasKey(k) => write!(f, "has key {k}"),
            Criterion::Contains(v) => write!(f, "contains {v}"),
            Criterion::ContainsAny(vs) => write!(f, "contains any of {}", List(vs)),
            Criterion::ContainsAll(vs) => write!(f, "contains all of {}", List(vs)),
        }
    }
}

/// Renders the query in a readable form, e.g.
/// `Using Index [Category] Where Category == "animal"`.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = &self.index {
            write!(f, "Using Index [{index}] ")?;
        }
        f.write_str("Where")?;
        if self.criteria.is_empty() {
            f.write_str(" all")?;
        }
        let mut first = true;
        for (field, criteria) in &self.criteria {
            let name = if field == KEY { "Key" } else { field.as_str() };
            for criterion in criteria {
                if !first {
                    f.write_str("\n\tAND")?;
                }
                first = false;
                write!(f, " {name} {criterion}")?;
            }
        }
        for or in &self.ors {
            write!(f, "\nOr {or}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
