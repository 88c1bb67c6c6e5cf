use holdfast_engine::{CodecError, EngineError};
use holdfast_store::StoreError;
use thiserror::Error;

/// Misuse detected while building a query. Carried inside the query and
/// returned before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid field name {0:?}: every path segment must start with a letter or underscore")]
    InvalidField(String),
    #[error("skip has already been set")]
    SkipAlreadySet,
    #[error("limit has already been set")]
    LimitAlreadySet,
    #[error("or-queries cannot contain skip or limit")]
    PagingInOr,
    #[error("index {0:?} is a nested path; only top-level indexes can be named")]
    NestedIndex(String),
    #[error("predicate criteria cannot be applied to the key field")]
    PredicateOnKey,
    #[error("cannot sort by the key field")]
    SortByKey,
    #[error("no index named {index} on {type_name}")]
    UnknownIndex { type_name: String, index: String },
}

#[derive(Debug, Error)]
pub enum HoldError {
    #[error("no data found for this key")]
    NotFound,
    #[error("this key already exists")]
    KeyExists,
    #[error("unique index {index} on {type_name} already holds this value")]
    UniqueExists { type_name: String, index: String },
    #[error("cannot compare {left} with {right} on field {field:?}")]
    TypeMismatch {
        field: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("invalid operation on field {field:?}: {reason}")]
    InvalidOperation { field: String, reason: String },
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),
    #[error("field {field:?} does not exist in {type_name}")]
    UnknownField { type_name: String, field: String },
    #[error("transaction conflict persisted after {attempts} attempt(s)")]
    Conflict { attempts: u32 },
    #[error("callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("engine error: {0}")]
    Engine(EngineError),
}

impl HoldError {
    /// Whether retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            HoldError::Conflict { .. } | HoldError::Store(StoreError::Conflict)
        )
    }

    /// Wraps a caller error raised from a `for_each` callback or predicate.
    pub fn callback(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HoldError::Callback(Box::new(err))
    }
}

impl From<StoreError> for HoldError {
    fn from(e: StoreError) -> Self {
        HoldError::Store(e)
    }
}

impl From<EngineError> for HoldError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Store(e) => HoldError::Store(e),
            EngineError::Codec(e) => HoldError::Codec(e),
            EngineError::UniqueExists { type_name, index } => {
                HoldError::UniqueExists { type_name, index }
            }
            EngineError::IndexNotFound { type_name, index } => {
                HoldError::InvalidQuery(QueryError::UnknownIndex { type_name, index })
            }
            other => HoldError::Engine(other),
        }
    }
}

impl From<bson::error::Error> for HoldError {
    fn from(e: bson::error::Error) -> Self {
        HoldError::Codec(CodecError::new(e))
    }
}
