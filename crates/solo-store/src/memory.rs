use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreResult;
use crate::key::StorageKey;
use crate::traits::BlobStore;

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. All blobs are held in memory behind a
/// `RwLock` for safe concurrent access. Blobs are cloned on read.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<StorageKey, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum()
    }

    /// Remove all blobs from the store.
    pub fn clear(&self) {
        self.blobs.write().expect("lock poisoned").clear();
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, key: &StorageKey, bytes: &[u8]) -> StoreResult<()> {
        key.validate()?;
        let mut map = self.blobs.write().expect("lock poisoned");
        map.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        key.validate()?;
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn exists(&self, key: &StorageKey) -> StoreResult<bool> {
        key.validate()?;
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn delete(&self, key: &StorageKey) -> StoreResult<bool> {
        key.validate()?;
        let mut map = self.blobs.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<StorageKey>> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut keys: Vec<StorageKey> = map
            .keys()
            .filter(|key| key.as_str().starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("MemoryBlobStore")
            .field("blob_count", &count)
            .finish()
    }
}
