use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transaction already consumed")]
    TransactionConsumed,
    #[error("cannot write in a read-only transaction")]
    ReadOnly,
    #[error("transaction conflict: a key read by this transaction was committed concurrently")]
    Conflict,
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether retrying the whole transaction from scratch may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}
