mod access;
mod aggregate;
mod database;
mod error;
mod eval;
mod executor;
mod options;
mod query;
mod value;

pub use access::RecordAccess;
pub use aggregate::AggregateResult;
pub use bson::{Bson, Document};
pub use database::{Database, DatabaseTransaction};
pub use error::{HoldError, QueryError};
pub use holdfast_engine::{BsonCodec, Codec, CodecError, Entity, EntitySchema, MsgPackCodec};
pub use options::{DatabaseOptions, RetryPolicy};
pub use query::{FieldBuilder, KEY, Operand, Predicate, Query, field_ref, where_field};
pub use holdfast_store::{Store, StoreError, Transaction};
#[cfg(feature = "memory")]
pub use holdfast_store::MemoryStore;
pub use regex::Regex;
