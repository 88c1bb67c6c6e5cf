#![allow(dead_code)]

use bson::DateTime;
use holdfast::{Database, DatabaseOptions, Entity, EntitySchema, MemoryStore};
use serde::{Deserialize, Serialize};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Fixture clock. Item dates are offsets from it, so time comparisons
/// against it never depend on when the test runs.
pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn now() -> DateTime {
    DateTime::from_millis(NOW_MS)
}

macro_rules! item_type {
    ($name:ident, $schema:expr) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(rename = "Key")]
            pub key: i32,
            #[serde(rename = "ID")]
            pub id: i32,
            #[serde(rename = "Name")]
            pub name: String,
            #[serde(rename = "Category")]
            pub category: String,
            #[serde(rename = "Created")]
            pub created: DateTime,
            #[serde(rename = "Tags")]
            pub tags: Option<Vec<String>>,
            #[serde(rename = "Color")]
            pub color: String,
            #[serde(rename = "Fruit")]
            pub fruit: String,
            #[serde(rename = "UpdateField")]
            pub update_field: String,
            #[serde(rename = "UpdateIndex")]
            pub update_index: String,
        }

        impl Entity for $name {
            fn schema() -> EntitySchema {
                $schema
            }
        }

        impl From<&Item> for $name {
            fn from(item: &Item) -> Self {
                Self {
                    key: item.key,
                    id: item.id,
                    name: item.name.clone(),
                    category: item.category.clone(),
                    created: item.created,
                    tags: item.tags.clone(),
                    color: item.color.clone(),
                    fruit: item.fruit.clone(),
                    update_field: item.update_field.clone(),
                    update_index: item.update_index.clone(),
                }
            }
        }
    };
}

item_type!(
    ItemTest,
    EntitySchema::new("ItemTest")
        .index("Category")
        .index("UpdateIndex")
);

// Same records without secondary indexes, so every query takes the scan path.
// Its key field is filled from the primary key on reads.
item_type!(PlainItem, EntitySchema::new("PlainItem").key("Key"));

/// Source rows shared by both item types.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: i32,
    pub id: i32,
    pub name: String,
    pub category: String,
    pub created: DateTime,
    pub tags: Option<Vec<String>>,
    pub color: String,
    pub fruit: String,
    pub update_field: String,
    pub update_index: String,
}

fn item(key: i32, id: i32, name: &str, category: &str, created_offset_days: i64) -> Item {
    Item {
        key,
        id,
        name: name.to_string(),
        category: category.to_string(),
        created: DateTime::from_millis(NOW_MS + created_offset_days * DAY_MS),
        tags: None,
        color: String::new(),
        fruit: String::new(),
        update_field: String::new(),
        update_index: String::new(),
    }
}

fn cooked(mut item: Item) -> Item {
    item.tags = Some(vec!["cooked".to_string()]);
    item
}

fn colored(mut item: Item, color: &str, fruit: &str) -> Item {
    item.color = color.to_string();
    item.fruit = fruit.to_string();
    item
}

/// Seventeen items across three categories. Offsets put items 1, 3, 8, 9
/// and 11 after [`now`].
pub fn test_data() -> Vec<Item> {
    vec![
        item(0, 0, "car", "vehicle", -365),
        item(1, 1, "truck", "vehicle", 900),
        item(2, 0, "seal", "animal", -365),
        item(3, 3, "van", "vehicle", 900),
        cooked(item(4, 8, "pizza", "food", 0)),
        colored(item(5, 1, "crow", "animal", 0), "blue", "orange"),
        colored(item(6, 5, "van", "vehicle", 0), "orange", "orange"),
        cooked(item(7, 5, "pizza", "food", 0)),
        item(8, 6, "lion", "animal", 3 * 365),
        item(9, 7, "bear", "animal", 3 * 365),
        colored(cooked(item(10, 9, "tacos", "food", -3 * 365)), "orange", ""),
        colored(item(11, 10, "golf cart", "vehicle", 30), "pink", "apple"),
        cooked(item(12, 11, "oatmeal", "food", -30)),
        item(13, 8, "mouse", "animal", 0),
        item(14, 12, "fish", "animal", -1),
        cooked(item(15, 13, "fish", "food", 0)),
        item(16, 9, "zebra", "animal", 0),
    ]
}

pub fn open() -> Database<MemoryStore> {
    Database::open(MemoryStore::new())
}

pub fn open_with(options: DatabaseOptions) -> Database<MemoryStore> {
    Database::with_options(MemoryStore::new(), options)
}

pub fn insert_test_data<T>(db: &Database<MemoryStore>) -> Vec<Item>
where
    T: Entity + for<'a> From<&'a Item>,
{
    let data = test_data();
    for item in &data {
        db.insert(&item.key, &T::from(item)).unwrap();
    }
    data
}

pub trait Keyed {
    fn key(&self) -> i32;
    fn id(&self) -> i32;
}

impl Keyed for ItemTest {
    fn key(&self) -> i32 {
        self.key
    }
    fn id(&self) -> i32 {
        self.id
    }
}

impl Keyed for PlainItem {
    fn key(&self) -> i32 {
        self.key
    }
    fn id(&self) -> i32 {
        self.id
    }
}

/// Keys of `rows`, sorted.
pub fn keys<T: Keyed>(rows: &[T]) -> Vec<i32> {
    let mut keys: Vec<i32> = rows.iter().map(Keyed::key).collect();
    keys.sort_unstable();
    keys
}

/// Keys in result order.
pub fn ordered_keys<T: Keyed>(rows: &[T]) -> Vec<i32> {
    rows.iter().map(Keyed::key).collect()
}

pub fn sorted(mut keys: Vec<i32>) -> Vec<i32> {
    keys.sort_unstable();
    keys
}

/// Routes `tracing` output to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
