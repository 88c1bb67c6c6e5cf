mod error;
mod store;

pub use error::StoreError;
pub use store::{KvPair, Store, Transaction};

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryStore, MemoryTransaction};
