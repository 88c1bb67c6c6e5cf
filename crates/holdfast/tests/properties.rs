mod common;

use common::open;
use holdfast::{Entity, EntitySchema, Query, where_field};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

macro_rules! row_type {
    ($name:ident, $schema:expr) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct $name {
            #[serde(rename = "Id")]
            id: i64,
            #[serde(rename = "Group")]
            group: i64,
            #[serde(rename = "Value")]
            value: i64,
        }

        impl Entity for $name {
            fn schema() -> EntitySchema {
                $schema
            }
        }
    };
}

row_type!(Indexed, EntitySchema::new("Indexed").index("Group").index("Value"));
row_type!(Scanned, EntitySchema::new("Scanned"));

#[derive(Debug, Clone)]
enum Op {
    Eq(i64),
    Ne(i64),
    Gt(i64),
    Lt(i64),
    Ge(i64),
    Le(i64),
    In(Vec<i64>),
}

impl Op {
    fn query(&self, field: &str) -> Query {
        let f = where_field(field);
        match self {
            Op::Eq(v) => f.eq(*v),
            Op::Ne(v) => f.ne(*v),
            Op::Gt(v) => f.gt(*v),
            Op::Lt(v) => f.lt(*v),
            Op::Ge(v) => f.ge(*v),
            Op::Le(v) => f.le(*v),
            Op::In(vs) => f.is_in(vs.iter().copied()),
        }
    }

    fn holds(&self, x: i64) -> bool {
        match self {
            Op::Eq(v) => x == *v,
            Op::Ne(v) => x != *v,
            Op::Gt(v) => x > *v,
            Op::Lt(v) => x < *v,
            Op::Ge(v) => x >= *v,
            Op::Le(v) => x <= *v,
            Op::In(vs) => vs.contains(&x),
        }
    }
}

fn op() -> impl Strategy<Value = Op> {
    let v = -20i64..20;
    prop_oneof![
        v.clone().prop_map(Op::Eq),
        v.clone().prop_map(Op::Ne),
        v.clone().prop_map(Op::Gt),
        v.clone().prop_map(Op::Lt),
        v.clone().prop_map(Op::Ge),
        v.clone().prop_map(Op::Le),
        prop::collection::vec(v, 0..4).prop_map(Op::In),
    ]
}

fn rows() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..4, -20i64..20), 0..60)
}

fn ids<T>(rows: &[T], id: impl Fn(&T) -> i64) -> Vec<i64> {
    let mut ids: Vec<i64> = rows.iter().map(id).collect();
    ids.sort_unstable();
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn index_and_scan_paths_agree(data in rows(), op in op(), on_group in any::<bool>()) {
        let db = open();
        db.write(|tx| {
            for (id, (group, value)) in data.iter().enumerate() {
                let id = id as i64;
                tx.insert(&id, &Indexed { id, group: *group, value: *value })?;
                tx.insert(&id, &Scanned { id, group: *group, value: *value })?;
            }
            Ok(())
        }).unwrap();

        let field = if on_group { "Group" } else { "Value" };
        let query = op.query(field);
        let indexed: Vec<Indexed> = db.find(&query).unwrap();
        let scanned: Vec<Scanned> = db.find(&query).unwrap();

        let expected: Vec<i64> = data
            .iter()
            .enumerate()
            .filter(|(_, (group, value))| op.holds(if on_group { *group } else { *value }))
            .map(|(id, _)| id as i64)
            .collect();
        prop_assert_eq!(ids(&indexed, |r| r.id), expected.clone());
        prop_assert_eq!(ids(&scanned, |r| r.id), expected);
    }

    #[test]
    fn skip_and_limit_slice_the_sorted_result(
        data in rows(),
        skip in 0usize..20,
        limit in 0usize..20,
    ) {
        let db = open();
        db.write(|tx| {
            for (id, (group, value)) in data.iter().enumerate() {
                let id = id as i64;
                tx.insert(&id, &Indexed { id, group: *group, value: *value })?;
            }
            Ok(())
        }).unwrap();

        let sorted = || Query::new().sort_by(&["Value", "Id"]);
        let all: Vec<Indexed> = db.find(&sorted()).unwrap();
        let page: Vec<Indexed> = db.find(&sorted().skip(skip).limit(limit)).unwrap();

        let want: Vec<i64> = all.iter().skip(skip).take(limit).map(|r| r.id).collect();
        let got: Vec<i64> = page.iter().map(|r| r.id).collect();
        prop_assert_eq!(got, want);

        let unsorted: Vec<Indexed> = db.find(&where_field("Group").ge(0).skip(skip).limit(limit)).unwrap();
        prop_assert_eq!(unsorted.len(), data.len().saturating_sub(skip).min(limit));
    }
}
