use crate::error::StoreResult;
use crate::key::StorageKey;

/// Durable key-to-bytes blob store.
///
/// All implementations must satisfy these invariants:
/// - Reading an absent key is `Ok(None)`, never an error; absence is an
///   expected state, not a failure.
/// - Writes replace the whole blob atomically from the caller's point of
///   view; there are no partial updates.
/// - Keys are validated before any storage access; a malformed key fails
///   with `StoreError::InvalidKey` and leaves the store untouched.
/// - The store never interprets blob contents; it is a pure key-value store.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Write a blob under the given key, replacing any existing blob.
    fn write(&self, key: &StorageKey, bytes: &[u8]) -> StoreResult<()>;

    /// Read the blob stored under the given key.
    ///
    /// Returns `Ok(None)` if no blob exists for the key.
    fn read(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>>;

    /// Check whether a blob exists for the given key.
    fn exists(&self, key: &StorageKey) -> StoreResult<bool>;

    /// Delete the blob under the given key. Returns `true` if a blob existed.
    ///
    /// Deleting an absent key is not an error.
    fn delete(&self, key: &StorageKey) -> StoreResult<bool>;

    /// Return a sorted list of all keys starting with the given prefix.
    ///
    /// Pass `""` to list every key in the store.
    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<StorageKey>>;
}
