use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;

/// A declared secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// Dotted field path the index is built from.
    pub field: String,
    pub unique: bool,
}

/// Storage metadata for one entity type: its type name, optional key field,
/// secondary indexes, and the fields that may legally hold null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    type_name: String,
    key_field: Option<String>,
    indexes: Vec<IndexSpec>,
    nullable: Vec<String>,
}

impl EntitySchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key_field: None,
            indexes: Vec::new(),
            nullable: Vec::new(),
        }
    }

    /// Field that mirrors the primary key. Reads fill it from the stored key.
    pub fn key(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    pub fn index(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.index_named(field.clone(), field, false)
    }

    pub fn unique_index(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.index_named(field.clone(), field, true)
    }

    pub fn index_named(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        unique: bool,
    ) -> Self {
        self.indexes.push(IndexSpec {
            name: name.into(),
            field: field.into(),
            unique,
        });
        self
    }

    /// Marks a scalar field as optional so `IsNull` may be asked of it.
    pub fn nullable(mut self, field: impl Into<String>) -> Self {
        self.nullable.push(field.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn key_field(&self) -> Option<&str> {
        self.key_field.as_deref()
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    /// First index built on `field`, if any.
    pub fn index_on(&self, field: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|idx| idx.field == field)
    }

    pub fn is_nullable(&self, field: &str) -> bool {
        self.nullable.iter().any(|f| f == field)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: String| EngineError::InvalidSchema {
            type_name: self.type_name.clone(),
            reason,
        };
        if self.type_name.is_empty() || self.type_name.contains('\0') {
            return Err(invalid("type name must be non-empty and free of NUL".into()));
        }
        if let Some(key) = &self.key_field {
            if key.is_empty() || key.contains('.') {
                return Err(invalid(format!("key field {key:?} must be a top-level field")));
            }
        }
        let mut seen = HashSet::new();
        for idx in &self.indexes {
            if idx.name.is_empty() || idx.name.contains('.') || idx.name.contains('\0') {
                return Err(invalid(format!("index name {:?} is not allowed", idx.name)));
            }
            if idx.field.is_empty() {
                return Err(invalid(format!("index {} has no field", idx.name)));
            }
            if !seen.insert(idx.name.as_str()) {
                return Err(invalid(format!("index {} declared twice", idx.name)));
            }
        }
        Ok(())
    }
}

/// A storable type. Values cross into storage as BSON through serde.
pub trait Entity: Serialize + DeserializeOwned + 'static {
    fn schema() -> EntitySchema;
}

/// Cache of validated schemas, one per Rust type.
#[derive(Default)]
pub struct SchemaRegistry {
    cache: RwLock<HashMap<TypeId, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Entity>(&self) -> Result<Arc<EntitySchema>, EngineError> {
        let id = TypeId::of::<T>();
        if let Some(schema) = self
            .cache
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
        {
            return Ok(Arc::clone(schema));
        }

        let schema = T::schema();
        schema.validate()?;
        let schema = Arc::new(schema);
        let mut cache = self.cache.write().map_err(|_| poisoned())?;
        Ok(Arc::clone(cache.entry(id).or_insert(schema)))
    }
}

fn poisoned() -> EngineError {
    EngineError::LockPoisoned("schema registry")
}
