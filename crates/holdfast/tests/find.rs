mod common;

use common::{
    Item, ItemTest, Keyed, PlainItem, insert_test_data, keys, now, open, ordered_keys, sorted,
};
use holdfast::{Entity, HoldError, KEY, Query, QueryError, Regex, field_ref, where_field};

struct Case {
    name: &'static str,
    query: Query,
    expected: Vec<i32>,
}

fn case(name: &'static str, query: Query, expected: &[i32]) -> Case {
    Case {
        name,
        query,
        expected: expected.to_vec(),
    }
}

const VEHICLES: [i32; 5] = [0, 1, 3, 6, 11];
const ANIMALS: [i32; 7] = [2, 5, 8, 9, 13, 14, 16];
const FOOD: [i32; 5] = [4, 7, 10, 12, 15];

fn union(parts: &[&[i32]]) -> Vec<i32> {
    sorted(parts.iter().flat_map(|p| p.iter().copied()).collect())
}

fn all_but(key: i32) -> Vec<i32> {
    (0..17).filter(|k| *k != key).collect()
}

/// Cases that hold whether or not `Category` is indexed.
fn shared_cases<T: Entity + Keyed>() -> Vec<Case> {
    let now = now();
    vec![
        case("equal key", where_field(KEY).eq(4), &[4]),
        case("equal field", where_field("Name").eq("truck"), &[1]),
        case("equal category", where_field("Category").eq("vehicle"), &VEHICLES),
        case("not equal key", where_field(KEY).ne(4), &all_but(4)),
        case("not equal field", where_field("Name").ne("truck"), &all_but(1)),
        case(
            "not equal category",
            where_field("Category").ne("vehicle"),
            &union(&[&ANIMALS, &FOOD]),
        ),
        case("greater than key", where_field(KEY).gt(10), &[11, 12, 13, 14, 15, 16]),
        case("greater than field", where_field("ID").gt(10), &[12, 14, 15]),
        case("greater than category", where_field("Category").gt("food"), &VEHICLES),
        case("less than key", where_field(KEY).lt(0), &[]),
        case("less than field", where_field("ID").lt(5), &[0, 1, 2, 3, 5]),
        case("less than category", where_field("Category").lt("food"), &ANIMALS),
        case("less or equal key", where_field(KEY).le(0), &[0]),
        case("less or equal field", where_field("ID").le(5), &[0, 1, 2, 3, 5, 6, 7]),
        case(
            "less or equal category",
            where_field("Category").le("food"),
            &union(&[&ANIMALS, &FOOD]),
        ),
        case("greater or equal key", where_field(KEY).ge(10), &[10, 11, 12, 13, 14, 15, 16]),
        case("greater or equal field", where_field("ID").ge(10), &[11, 12, 14, 15]),
        case(
            "greater or equal category",
            where_field("Category").ge("food"),
            &union(&[&VEHICLES, &FOOD]),
        ),
        case("in", where_field("ID").is_in([5, 8, 3]), &[3, 4, 6, 7, 13]),
        case(
            "in on category",
            where_field("Category").is_in(["animal", "vehicle"]),
            &union(&[&ANIMALS, &VEHICLES]),
        ),
        case(
            "regular expression",
            where_field("Name").reg_exp(Regex::new("ea").unwrap()),
            &[2, 9, 12],
        ),
        case(
            "predicate on field",
            where_field("Name").match_fn(|access| {
                Ok(access.field().as_str().is_some_and(|name| name.starts_with("oat")))
            }),
            &[12],
        ),
        case(
            "predicate on record",
            where_field("ID").match_fn(|access| {
                let name = access.record().get_str("Name").unwrap_or_default();
                Ok(name.starts_with("oat"))
            }),
            &[12],
        ),
        case(
            "predicate with sub-query",
            where_field("Name").match_fn(|access| {
                let record = access.record();
                let name = record.get_str("Name").unwrap_or_default();
                let category = record.get_str("Category").unwrap_or_default();
                let others: Vec<T> = access.sub_query(
                    &where_field("Name").eq(name).and("Category").ne(category),
                )?;
                Ok(!others.is_empty())
            }),
            &[14, 15],
        ),
        case(
            "predicate with sub-aggregate",
            where_field("ID").match_fn(|access| {
                let category = access.record().get_str("Category").unwrap_or_default();
                let groups = access
                    .sub_aggregate::<T>(&where_field("Category").eq(category), &["Category"])?;
                let max = groups[0].max("ID")?;
                Ok(max.is_some_and(|max| access.field().as_i32() == Some(max.id())))
            }),
            &[11, 14, 15],
        ),
        case("time comparison", where_field("Created").gt(now), &[1, 3, 8, 9, 11]),
        case(
            "time at the fixture clock",
            where_field("Created").ge(now),
            &[1, 3, 4, 5, 6, 7, 8, 9, 11, 13, 15, 16],
        ),
        case("time before the fixture clock", where_field("Created").lt(now), &[0, 2, 10, 12, 14]),
        case(
            "chained and with unindexed lead",
            where_field("Created").gt(now).and("Category").eq("vehicle"),
            &[1, 3, 11],
        ),
        case(
            "several chained ands",
            where_field("Created")
                .gt(now)
                .and("Category")
                .eq("vehicle")
                .and("ID")
                .ge(10),
            &[11],
        ),
        case(
            "chained and with category lead",
            where_field("Category")
                .eq("vehicle")
                .and("ID")
                .ge(10)
                .and("Created")
                .gt(now),
            &[11],
        ),
        case(
            "or across categories",
            where_field("Category")
                .eq("vehicle")
                .or(where_field("Category").eq("animal")),
            &union(&[&VEHICLES, &ANIMALS]),
        ),
        case(
            "or with overlapping data",
            where_field("Category")
                .eq("animal")
                .or(where_field("Name").eq("fish")),
            &union(&[&ANIMALS, &[15]]),
        ),
        case(
            "and with or",
            where_field("Category")
                .eq("animal")
                .and("Created")
                .gt(now)
                .or(where_field("Name").eq("fish").and("ID").ge(13)),
            &[8, 9, 15],
        ),
        case("empty query", Query::new(), &(0..17).collect::<Vec<_>>()),
        case(
            "is null",
            where_field("Tags").is_null(),
            &[0, 1, 2, 3, 5, 6, 8, 9, 11, 13, 14, 16],
        ),
        case("has prefix", where_field("Name").has_prefix("golf"), &[11]),
        case("has suffix", where_field("Name").has_suffix("cart"), &[11]),
        case(
            "field reference",
            where_field("Color").eq(field_ref("Fruit")).and("Fruit").ne(""),
            &[6],
        ),
        case(
            "key after category",
            where_field("Category").eq("food").and(KEY).eq(4),
            &[4],
        ),
        case(
            "key range after category",
            where_field("Category").eq("food").and(KEY).gt(10),
            &[12, 15],
        ),
        case("skip", where_field(KEY).gt(10).skip(3), &[14, 15, 16]),
        case("skip past the end", where_field(KEY).gt(10).skip(9), &[]),
        case("limit", where_field(KEY).gt(10).limit(5), &[11, 12, 13, 14, 15]),
        case(
            "predicate on category",
            where_field("Category").match_fn(|access| {
                Ok(!access.field().as_str().is_some_and(|c| c.starts_with("veh")))
            }),
            &union(&[&ANIMALS, &FOOD]),
        ),
        case("equal nil", where_field("Name").eq(bson::Bson::Null), &[]),
    ]
}

fn index_cases() -> Vec<Case> {
    vec![
        case(
            "in on data from another index",
            where_field("ID").is_in([5, 8, 3]).index("Category"),
            &[3, 4, 6, 7, 13],
        ),
        case(
            "in on the named index",
            where_field("Category").is_in(["food", "animal"]).index("Category"),
            &union(&[&ANIMALS, &FOOD]),
        ),
        case(
            "equal on the named index",
            where_field("Category").eq("vehicle").index("Category"),
            &VEHICLES,
        ),
        case(
            "key after the named index",
            where_field("Category").eq("food").index("Category").and(KEY).gt(10),
            &[12, 15],
        ),
        case(
            "predicate on the named index",
            where_field("Category")
                .match_fn(|access| Ok(access.field().as_str() != Some("vehicle")))
                .index("Category"),
            &union(&[&ANIMALS, &FOOD]),
        ),
    ]
}

fn run<T: Entity + Keyed + for<'a> From<&'a Item>>(cases: Vec<Case>) {
    let db = open();
    insert_test_data::<T>(&db);
    for case in cases {
        let found: Vec<T> = db
            .find(&case.query)
            .unwrap_or_else(|err| panic!("{}: {err}", case.name));
        assert_eq!(keys(&found), sorted(case.expected), "{}", case.name);
    }
}

#[test]
fn find_with_indexes() {
    common::init_tracing();
    run::<ItemTest>(shared_cases::<ItemTest>());
    run::<ItemTest>(index_cases());
}

#[test]
fn find_without_indexes() {
    run::<PlainItem>(shared_cases::<PlainItem>());
}

fn skip_across_alternatives<T: Entity + Keyed + for<'a> From<&'a Item>>() {
    let db = open();
    insert_test_data::<T>(&db);
    let both = || {
        where_field("Category")
            .eq("vehicle")
            .or(where_field("Category").eq("animal"))
    };

    let found: Vec<T> = db.find(&both().skip(4)).unwrap();
    assert_eq!(ordered_keys(&found), vec![11, 2, 5, 8, 9, 13, 14, 16]);

    let found: Vec<T> = db.find(&both().skip(8)).unwrap();
    assert_eq!(ordered_keys(&found), vec![9, 13, 14, 16]);
}

#[test]
fn skip_counts_across_alternatives() {
    skip_across_alternatives::<ItemTest>();
    skip_across_alternatives::<PlainItem>();
}

#[test]
fn alternatives_never_repeat_a_record() {
    let db = open();
    insert_test_data::<ItemTest>(&db);
    let query = where_field("Category")
        .eq("animal")
        .or(where_field("Name").eq("fish"))
        .or(where_field("Category").eq("animal"));
    let found: Vec<ItemTest> = db.find(&query).unwrap();
    let mut unique = keys(&found);
    unique.dedup();
    assert_eq!(unique.len(), found.len());
}

#[test]
fn unknown_field_is_an_error() {
    let db = open();
    insert_test_data::<ItemTest>(&db);
    let err = db
        .find::<ItemTest>(&where_field("BadFieldName").eq("test"))
        .unwrap_err();
    assert!(matches!(err, HoldError::UnknownField { ref field, .. } if field == "BadFieldName"));
}

#[test]
fn unknown_index_is_an_error() {
    let db = open();
    insert_test_data::<ItemTest>(&db);
    let err = db
        .find::<ItemTest>(&where_field("Name").eq("test").index("BadIndex"))
        .unwrap_err();
    assert!(matches!(
        err,
        HoldError::InvalidQuery(QueryError::UnknownIndex { .. })
    ));
}

#[test]
fn empty_type_with_index() {
    let db = open();
    let found: Vec<ItemTest> = db
        .find(&where_field("Category").eq("animal").index("Category"))
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn ordering_across_kinds_fails() {
    let db = open();
    insert_test_data::<ItemTest>(&db);
    let err = db.find::<ItemTest>(&where_field("Name").gt(5)).unwrap_err();
    assert!(matches!(
        err,
        HoldError::TypeMismatch { ref field, left: "string", .. } if field == "Name"
    ));
}

#[test]
fn construction_errors_surface_before_reading() {
    let db = open();
    insert_test_data::<ItemTest>(&db);
    let cases = [
        (where_field("1st").eq(1), QueryError::InvalidField("1st".into())),
        (where_field("Name").eq("x").and("a..b").eq(1), QueryError::InvalidField("a..b".into())),
        (Query::new().skip(1).skip(2), QueryError::SkipAlreadySet),
        (Query::new().limit(1).limit(2), QueryError::LimitAlreadySet),
        (Query::new().or(Query::new().skip(1)), QueryError::PagingInOr),
        (Query::new().or(Query::new().limit(1)), QueryError::PagingInOr),
        (Query::new().index("Nested.Field"), QueryError::NestedIndex("Nested.Field".into())),
        (where_field(KEY).match_fn(|_| Ok(true)), QueryError::PredicateOnKey),
        (Query::new().sort_by(&[KEY]), QueryError::SortByKey),
    ];
    for (query, expected) in cases {
        match db.find::<ItemTest>(&query) {
            Err(HoldError::InvalidQuery(err)) => assert_eq!(err, expected),
            other => panic!("expected {expected:?}, got {:?}", other.map(|v| v.len())),
        }
    }
}

#[test]
fn type_names_do_not_collide() {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Sample {
        #[serde(rename = "Value")]
        value: i32,
    }
    impl Entity for Sample {
        fn schema() -> holdfast::EntitySchema {
            holdfast::EntitySchema::new("Sample")
        }
    }

    #[derive(Serialize, Deserialize)]
    struct SampleCollision {
        #[serde(rename = "Value")]
        value: i32,
    }
    impl Entity for SampleCollision {
        fn schema() -> holdfast::EntitySchema {
            holdfast::EntitySchema::new("SampleCollision")
        }
    }

    let db = open();
    for i in 0..5 {
        db.insert(&i, &Sample { value: i }).unwrap();
        db.insert(&i, &SampleCollision { value: i }).unwrap();
    }
    let found: Vec<Sample> = db.find(&where_field(KEY).is_in([0, 1, 2, 3, 4])).unwrap();
    assert_eq!(found.len(), 5);
}

#[test]
fn paging_beyond_one_batch() {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct KeyCache {
        #[serde(rename = "Key")]
        key: i64,
        #[serde(rename = "IndexKey")]
        index_key: i64,
    }
    impl Entity for KeyCache {
        fn schema() -> holdfast::EntitySchema {
            holdfast::EntitySchema::new("KeyCache")
                .key("Key")
                .index("IndexKey")
        }
    }

    let db = open();
    db.write(|tx| {
        for i in 0..250i64 {
            tx.insert(&i, &KeyCache { key: i, index_key: i })?;
        }
        Ok(())
    })
    .unwrap();

    let stop = 10i64;
    let queries = [
        where_field(KEY).gt(stop),
        where_field("Key").gt(stop),
        where_field("IndexKey").gt(stop).index("IndexKey"),
        where_field("IndexKey")
            .match_fn(move |access| Ok(access.field().as_i64().is_some_and(|v| v > stop)))
            .index("IndexKey"),
        where_field("IndexKey").match_fn(move |access| {
            // Nested scans over the same type must not disturb the outer one.
            let below: Vec<KeyCache> =
                access.sub_query(&where_field("IndexKey").le(stop))?;
            Ok(below.len() == 11 && access.field().as_i64().is_some_and(|v| v > stop))
        }),
    ];
    for (n, query) in queries.iter().enumerate() {
        let found: Vec<KeyCache> = db.find(query).unwrap();
        let got: Vec<i64> = found.iter().map(|r| r.key).collect();
        let want: Vec<i64> = (stop + 1..250).collect();
        assert_eq!(got, want, "query {n}");
    }
}

#[test]
fn find_one_and_count() {
    let db = open();
    insert_test_data::<ItemTest>(&db);

    let first: ItemTest = db.find_one(&where_field("Category").eq("food")).unwrap();
    assert_eq!(first.key, 4);
    assert!(matches!(
        db.find_one::<ItemTest>(&where_field("Name").eq("nothing")),
        Err(HoldError::NotFound)
    ));

    assert_eq!(db.count::<ItemTest>(&Query::new()).unwrap(), 17);
    assert_eq!(db.count::<ItemTest>(&where_field("Category").eq("animal")).unwrap(), 7);
    assert_eq!(db.count::<ItemTest>(&where_field(KEY).gt(10).limit(2)).unwrap(), 2);
}

#[test]
fn sorted_results() {
    let db = open();
    insert_test_data::<ItemTest>(&db);

    let found: Vec<ItemTest> = db
        .find(&where_field("Category").eq("vehicle").sort_by(&["Name", "ID"]))
        .unwrap();
    let names: Vec<(&str, i32)> = found.iter().map(|i| (i.name.as_str(), i.id)).collect();
    assert_eq!(
        names,
        vec![("car", 0), ("golf cart", 10), ("truck", 1), ("van", 3), ("van", 5)]
    );

    let found: Vec<ItemTest> = db
        .find(&Query::new().sort_by(&["ID"]).reverse().skip(1).limit(3))
        .unwrap();
    let ids: Vec<i32> = found.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![12, 11, 10]);

    assert!(matches!(
        db.find::<ItemTest>(&Query::new().sort_by(&["Missing"])),
        Err(HoldError::UnknownField { .. })
    ));
}

#[test]
fn for_each_streams_and_stops_on_error() {
    let db = open();
    insert_test_data::<ItemTest>(&db);

    let mut seen = Vec::new();
    db.for_each(&where_field("Category").eq("food"), |item: ItemTest| {
        seen.push(item.key);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, FOOD.to_vec());

    let mut calls = 0;
    let err = db
        .for_each(&Query::new(), |_: ItemTest| {
            calls += 1;
            if calls == 3 {
                return Err(HoldError::callback(std::io::Error::other("stop")));
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, HoldError::Callback(_)));
    assert_eq!(calls, 3);
}

#[test]
fn key_field_is_restored() {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Tagged {
        #[serde(rename = "Key", default, skip_serializing)]
        key: String,
        #[serde(rename = "Name")]
        name: String,
    }
    impl Entity for Tagged {
        fn schema() -> holdfast::EntitySchema {
            holdfast::EntitySchema::new("Tagged").key("Key")
        }
    }

    let db = open();
    db.insert("alpha", &Tagged { key: String::new(), name: "a".into() }).unwrap();

    let found: Vec<Tagged> = db.find(&where_field("Name").eq("a")).unwrap();
    assert_eq!(found[0].key, "alpha");
    let got: Tagged = db.get("alpha").unwrap();
    assert_eq!(got.key, "alpha");
}

#[test]
fn matches_without_storage() {
    let db = open();
    let data = common::test_data();
    let item = PlainItem::from(&data[11]);
    assert!(db.matches(&where_field("Name").has_prefix("golf"), &item).unwrap());
    assert!(db.matches(&where_field(KEY).eq(11), &item).unwrap());
    assert!(!db.matches(&where_field("Category").eq("food"), &item).unwrap());
    assert!(db
        .matches(&where_field("Category").eq("food").or(where_field("ID").eq(10)), &item)
        .unwrap());
}
