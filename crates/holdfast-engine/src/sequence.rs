use std::borrow::Cow;

use holdfast_store::Transaction;

use crate::error::EngineError;
use crate::key::Key;

/// Draws the next value of a type's auto-increment sequence.
///
/// The first value is 0. The counter lives in the store, so two transactions
/// drawing concurrently both read the same counter key and the later commit
/// fails with a conflict instead of handing out a duplicate.
pub fn next_sequence<T: Transaction>(txn: &T, type_name: &str) -> Result<u64, EngineError> {
    let key = Key::Sequence(Cow::Borrowed(type_name)).encode();
    let next = match txn.get(&key)? {
        None => 0,
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| EngineError::CorruptSequence(type_name.to_string()))?;
            u64::from_be_bytes(raw) + 1
        }
    };
    txn.put(&key, &next.to_be_bytes())?;
    Ok(next)
}
