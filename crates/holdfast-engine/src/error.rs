use holdfast_store::StoreError;
use thiserror::Error;

// ── CodecError ───────────────────────────────────────────────

/// Opaque failure raised by a [`Codec`](crate::Codec) implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl CodecError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self(msg.into())
    }
}

impl From<bson::error::Error> for CodecError {
    fn from(e: bson::error::Error) -> Self {
        Self::new(e)
    }
}

// ── EngineError ──────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("unique index {index} on {type_name} already holds this value")]
    UniqueExists { type_name: String, index: String },
    #[error("index {index} on {type_name} is corrupt: {reason}")]
    CorruptIndex {
        type_name: String,
        index: String,
        reason: String,
    },
    #[error("invalid schema for {type_name}: {reason}")]
    InvalidSchema { type_name: String, reason: String },
    #[error("sequence for {0} is corrupt")]
    CorruptSequence(String),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("no index named {index} on {type_name}")]
    IndexNotFound { type_name: String, index: String },
}
