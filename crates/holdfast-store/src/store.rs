use crate::error::StoreError;

pub type KvPair = (Vec<u8>, Vec<u8>);

pub trait Store {
    type Txn<'a>: Transaction
    where
        Self: 'a;

    /// Opens a snapshot-isolated transaction. Writes stay private until `commit`.
    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError>;
}

pub trait Transaction {
    // Reads
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn multi_get(&self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;
    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = Result<KvPair, StoreError>> + 'a>, StoreError>;
    /// Returns up to `limit` pairs under `prefix` in key order, strictly after `after`
    /// when given. Cursors page through large key spaces with this.
    fn scan_batch(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<KvPair>, StoreError>;

    // Writes
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    fn is_read_only(&self) -> bool;

    // Lifecycle
    /// Fails with `StoreError::Conflict` when another transaction committed a key
    /// this one read after this one's snapshot was taken.
    fn commit(self) -> Result<(), StoreError>;
    fn rollback(self) -> Result<(), StoreError>;
}
