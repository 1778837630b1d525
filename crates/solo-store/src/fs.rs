use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StoreResult;
use crate::key::StorageKey;
use crate::traits::BlobStore;

/// Directory-backed durable blob store.
///
/// Each key maps to a file under the store root, with the `/` separators in
/// the key becoming directory levels (so instance blobs land in a
/// `singleton/` subdirectory). Parent directories are created on demand;
/// absent files read as `Ok(None)`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (or create) a store rooted at the given directory.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "blob store opened");
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a key. Callers validate the key first.
    fn blob_path(&self, key: &StorageKey) -> PathBuf {
        let mut path = self.root.clone();
        for component in key.as_str().split('/') {
            path.push(component);
        }
        path
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, key: &StorageKey, bytes: &[u8]) -> StoreResult<()> {
        key.validate()?;
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn read(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        key.validate()?;
        match fs::read(self.blob_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &StorageKey) -> StoreResult<bool> {
        key.validate()?;
        Ok(self.blob_path(key).is_file())
    }

    fn delete(&self, key: &StorageKey) -> StoreResult<bool> {
        key.validate()?;
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<StorageKey>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, String::new(), &mut keys)?;
        keys.retain(|key| key.as_str().starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for FsBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBlobStore")
            .field("root", &self.root)
            .finish()
    }
}

/// Walk a directory tree, pushing one key per regular file.
fn collect_keys(dir: &Path, rel: String, keys: &mut Vec<StorageKey>) -> StoreResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_rel = if rel.is_empty() {
            name
        } else {
            format!("{rel}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            collect_keys(&path, child_rel, keys)?;
        } else {
            keys.push(StorageKey::new(child_rel));
        }
    }
    Ok(())
}
