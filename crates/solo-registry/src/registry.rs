//! The keyed instance table.
//!
//! A [`Registry`] owns the map from [`InstanceKey`] to [`Holder`] and is the
//! only place holders are created or removed. That single ownership point is
//! what makes the at-most-one-holder-per-key guarantee enforceable: every
//! handle for a key resolves through the same table entry.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use solo_store::{BlobStore, FsBlobStore, MemoryBlobStore};

use crate::codec::Codec;
use crate::error::Result;
use crate::holder::{ErasedValue, Factory, Holder, PersistOps};
use crate::key::InstanceKey;

/// Configuration for a [`Registry`].
#[derive(Clone, Debug, Default)]
pub struct RegistryConfig {
    /// Codec used for every persisted instance.
    pub codec: Codec,
}

/// One failed entry in a bulk sweep.
#[derive(Clone, Debug)]
pub struct BulkFailure {
    pub type_name: String,
    pub tag: String,
    pub error: String,
}

/// Outcome of a bulk save or delete sweep.
///
/// Sweeps visit every entry and never abort on a single failure; callers
/// inspect the report to find out what went wrong where.
#[derive(Clone, Debug, Default)]
pub struct BulkReport {
    /// Entries visited by the sweep.
    pub attempted: usize,
    /// Entries whose operation completed.
    pub succeeded: usize,
    /// Entries the sweep did not apply to, such as non-persistent entries in
    /// a save sweep.
    pub skipped: usize,
    /// Entries whose operation failed.
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    /// Returns `true` if no entry failed.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keyed table of shared instances.
///
/// A registry is an explicitly constructed value: build one at startup,
/// share it as `Arc<Registry>`, and resolve [`Singleton`](crate::Singleton)
/// handles against it. Embedders that want isolation, in tests or between
/// subsystems, simply build more than one.
pub struct Registry {
    store: Arc<dyn BlobStore>,
    codec: Codec,
    table: RwLock<HashMap<InstanceKey, Arc<Holder>>>,
}

impl Registry {
    /// Create a registry over the given store with the default configuration.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_config(store, RegistryConfig::default())
    }

    /// Create a registry over the given store.
    pub fn with_config(store: Arc<dyn BlobStore>, config: RegistryConfig) -> Self {
        info!(codec = ?config.codec, "registry created");
        Self {
            store,
            codec: config.codec,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry backed by an in-memory store.
    ///
    /// Nothing survives the process; intended for tests and ephemeral use.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// Create a registry persisting under the given directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = FsBlobStore::open(root)?;
        Ok(Self::new(Arc::new(store)))
    }

    /// The blob store this registry persists into.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Adopt an externally-constructed value as the instance for `(T, tag)`,
    /// replacing any existing registration for that key.
    pub fn register_instance<T: Send + Sync + 'static>(
        &self,
        tag: impl Into<String>,
        value: T,
    ) -> Arc<Holder> {
        self.insert_value(InstanceKey::tagged::<T>(tag), Arc::new(value), None, None)
    }

    /// Adopt an externally-constructed value and persist it immediately.
    ///
    /// The value is written through before the registration is published, so
    /// a failed write registers nothing.
    pub fn register_instance_persistent<T>(
        &self,
        tag: impl Into<String>,
        value: T,
    ) -> Result<Arc<Holder>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.insert_value_persistent(
            InstanceKey::tagged::<T>(tag),
            Arc::new(value),
            None,
            Some(PersistOps::for_type::<T>()),
        )
    }

    /// Remove the registration for `(T, tag)` and return its holder.
    ///
    /// Storage is untouched; clearing a persisted blob is the handle's
    /// delete operation.
    pub fn remove<T: 'static>(&self, tag: impl Into<String>) -> Option<Arc<Holder>> {
        self.remove_key(&InstanceKey::tagged::<T>(tag))
    }

    /// Whether `(T, tag)` is registered.
    pub fn contains<T: 'static>(&self, tag: &str) -> bool {
        self.table
            .read()
            .expect("lock poisoned")
            .contains_key(&InstanceKey::tagged::<T>(tag))
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.table.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.table.read().expect("lock poisoned").is_empty()
    }

    /// Every registered key, sorted by type name then tag.
    pub fn keys(&self) -> Vec<InstanceKey> {
        let table = self.table.read().expect("lock poisoned");
        let mut keys: Vec<InstanceKey> = table.keys().cloned().collect();
        keys.sort_by(|a, b| {
            a.type_name()
                .cmp(b.type_name())
                .then_with(|| a.tag().cmp(b.tag()))
        });
        keys
    }

    /// Write every persistent entry's value to storage.
    ///
    /// Non-persistent entries are counted as skipped rather than forced to
    /// persist. One entry's failure never aborts the sweep.
    pub fn save_all(&self) -> BulkReport {
        let holders = self.snapshot();
        let mut report = BulkReport {
            attempted: holders.len(),
            ..BulkReport::default()
        };
        for holder in holders {
            if !holder.persists() {
                report.skipped += 1;
                continue;
            }
            match holder.save() {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    warn!(
                        type_name = holder.key().type_name(),
                        tag = holder.key().tag(),
                        error = %err,
                        "save failed; continuing sweep"
                    );
                    report.failures.push(BulkFailure {
                        type_name: holder.key().type_name().to_string(),
                        tag: holder.key().tag().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failures.len(),
            "save sweep finished"
        );
        report
    }

    /// Release every entry's value and remove persisted blobs.
    ///
    /// Entries stay registered and re-create on next access; use
    /// [`Registry::remove`] to drop a registration.
    pub fn delete_all(&self) -> BulkReport {
        let holders = self.snapshot();
        let mut report = BulkReport {
            attempted: holders.len(),
            ..BulkReport::default()
        };
        for holder in holders {
            match holder.delete() {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    warn!(
                        type_name = holder.key().type_name(),
                        tag = holder.key().tag(),
                        error = %err,
                        "delete failed; continuing sweep"
                    );
                    report.failures.push(BulkFailure {
                        type_name: holder.key().type_name().to_string(),
                        tag: holder.key().tag().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "delete sweep finished"
        );
        report
    }

    /// Resolve the holder for a key, creating an empty one if absent.
    ///
    /// The persistence flag applies only when the holder is created; an
    /// existing holder keeps its current flag. Capabilities the existing
    /// holder is missing are backfilled from the caller.
    pub(crate) fn holder_for(
        &self,
        key: InstanceKey,
        persists: bool,
        factory: Option<Factory>,
        persist_ops: Option<Arc<PersistOps>>,
    ) -> Arc<Holder> {
        {
            let table = self.table.read().expect("lock poisoned");
            if let Some(holder) = table.get(&key) {
                holder.backfill(factory, persist_ops);
                return Arc::clone(holder);
            }
        }

        let mut table = self.table.write().expect("lock poisoned");
        // Re-check: another thread may have inserted while we waited.
        if let Some(holder) = table.get(&key) {
            holder.backfill(factory, persist_ops);
            return Arc::clone(holder);
        }
        let holder = Arc::new(Holder::new(
            key.clone(),
            Arc::clone(&self.store),
            self.codec,
            persists,
            None,
            factory,
            persist_ops,
        ));
        debug!(
            type_name = key.type_name(),
            tag = key.tag(),
            persists,
            "holder registered"
        );
        table.insert(key, Arc::clone(&holder));
        holder
    }

    /// Publish a holder pre-populated with a caller-supplied value,
    /// replacing any existing holder for the key.
    pub(crate) fn insert_value(
        &self,
        key: InstanceKey,
        value: ErasedValue,
        factory: Option<Factory>,
        persist_ops: Option<Arc<PersistOps>>,
    ) -> Arc<Holder> {
        let holder = Arc::new(Holder::new(
            key.clone(),
            Arc::clone(&self.store),
            self.codec,
            false,
            Some(value),
            factory,
            persist_ops,
        ));
        self.publish(key, holder)
    }

    /// Publish a pre-populated persistent holder, writing the value through
    /// first. A failed write publishes nothing.
    pub(crate) fn insert_value_persistent(
        &self,
        key: InstanceKey,
        value: ErasedValue,
        factory: Option<Factory>,
        persist_ops: Option<Arc<PersistOps>>,
    ) -> Result<Arc<Holder>> {
        let holder = Arc::new(Holder::new(
            key.clone(),
            Arc::clone(&self.store),
            self.codec,
            true,
            Some(value),
            factory,
            persist_ops,
        ));
        holder.save()?;
        Ok(self.publish(key, holder))
    }

    /// Drop the registration for a key and return its holder.
    pub(crate) fn remove_key(&self, key: &InstanceKey) -> Option<Arc<Holder>> {
        let removed = self.table.write().expect("lock poisoned").remove(key);
        if removed.is_some() {
            debug!(
                type_name = key.type_name(),
                tag = key.tag(),
                "holder unregistered"
            );
        }
        removed
    }

    fn publish(&self, key: InstanceKey, holder: Arc<Holder>) -> Arc<Holder> {
        let previous = self
            .table
            .write()
            .expect("lock poisoned")
            .insert(key, Arc::clone(&holder));
        debug!(
            type_name = holder.key().type_name(),
            tag = holder.key().tag(),
            replaced = previous.is_some(),
            "instance adopted"
        );
        holder
    }

    /// Snapshot of every registered holder.
    ///
    /// Sweeps operate on the snapshot so the table lock is never held
    /// during storage I/O.
    fn snapshot(&self) -> Vec<Arc<Holder>> {
        self.table
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.len())
            .field("codec", &self.codec)
            .finish()
    }
}
