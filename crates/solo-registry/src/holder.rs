//! Per-key instance holders.
//!
//! A [`Holder`] is the registry-owned record for one (type, tag) binding. It
//! owns the lazily-created value, the persistence flag, and the protocol that
//! keeps the in-memory value consistent with the on-disk blob. Holders work
//! over type-erased values; the typed surface lives in
//! [`Singleton`](crate::Singleton).

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use solo_store::{BlobStore, StorageKey};

use crate::codec::Codec;
use crate::error::{RegistryError, Result};
use crate::key::InstanceKey;

/// A type-erased shared instance value.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Fallible constructor producing a fresh erased value for a key.
pub(crate) type Factory = Box<dyn Fn() -> std::result::Result<ErasedValue, String> + Send + Sync>;

/// Factory backed by a type's `Default` implementation.
pub(crate) fn default_factory<T: Default + Send + Sync + 'static>() -> Factory {
    Box::new(|| Ok(Arc::new(T::default()) as ErasedValue))
}

/// Erased encode/decode capability for one concrete type.
///
/// Captured at the typed entry points whose bounds prove the type
/// serializable, then carried by the holder so save and load can run on the
/// erased value without restating those bounds. A holder without persist ops
/// rejects every persistence request with
/// [`RegistryError::NotSerializable`].
pub(crate) struct PersistOps {
    encode: Box<dyn Fn(&(dyn Any + Send + Sync), Codec) -> Result<Vec<u8>> + Send + Sync>,
    decode: Box<dyn Fn(&[u8], Codec) -> Result<ErasedValue> + Send + Sync>,
}

impl PersistOps {
    pub(crate) fn for_type<T>() -> Arc<Self>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Arc::new(Self {
            encode: Box::new(|value, codec| match value.downcast_ref::<T>() {
                Some(typed) => codec.encode(typed),
                None => Err(RegistryError::TypeMismatch {
                    expected: std::any::type_name::<T>().to_string(),
                    actual: "<erased>".to_string(),
                }),
            }),
            decode: Box::new(|bytes, codec| {
                let typed: T = codec.decode(bytes)?;
                Ok(Arc::new(typed) as ErasedValue)
            }),
        })
    }
}

/// Mutable state guarded by the holder's lock.
struct HolderState {
    value: Option<ErasedValue>,
    persists: bool,
    factory: Option<Factory>,
    persist_ops: Option<Arc<PersistOps>>,
}

/// The owning record of one (type, tag) binding.
///
/// All materialization and persistence runs under the holder's write lock,
/// so two threads racing on first access observe exactly one constructed
/// value, and a persistent key's first touch produces exactly one stored
/// blob.
pub struct Holder {
    key: InstanceKey,
    store: Arc<dyn BlobStore>,
    codec: Codec,
    state: RwLock<HolderState>,
}

impl Holder {
    pub(crate) fn new(
        key: InstanceKey,
        store: Arc<dyn BlobStore>,
        codec: Codec,
        persists: bool,
        value: Option<ErasedValue>,
        factory: Option<Factory>,
        persist_ops: Option<Arc<PersistOps>>,
    ) -> Self {
        Self {
            key,
            store,
            codec,
            state: RwLock::new(HolderState {
                value,
                persists,
                factory,
                persist_ops,
            }),
        }
    }

    /// The (type, tag) identity this holder owns.
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// The blob key this holder's value persists under.
    pub fn storage_key(&self) -> StorageKey {
        self.key.storage_key()
    }

    /// Whether a value is currently held in memory.
    pub fn has_instance(&self) -> bool {
        self.state.read().expect("lock poisoned").value.is_some()
    }

    /// Whether this holder mirrors its value to durable storage.
    pub fn persists(&self) -> bool {
        self.state.read().expect("lock poisoned").persists
    }

    /// Whether a blob exists in storage for this holder's key.
    ///
    /// Non-persistent holders report `Ok(false)` without consulting the
    /// store.
    pub fn is_on_disk(&self) -> Result<bool> {
        if !self.persists() {
            return Ok(false);
        }
        Ok(self.store.exists(&self.key.storage_key())?)
    }

    /// Write the current value to storage and mark the holder persistent.
    ///
    /// An absent value is materialized first. The flag flips only after the
    /// write succeeds; a failed save leaves both the in-memory value and the
    /// previous flag intact.
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.persist_ops.is_none() {
            return Err(self.not_serializable());
        }
        let value = match &state.value {
            Some(value) => Arc::clone(value),
            None => {
                // Load or construct without the first-touch write; the write
                // below covers it.
                let value = if state.persists {
                    match self.load(&state)? {
                        Some(value) => value,
                        None => self.construct(&state)?,
                    }
                } else {
                    self.construct(&state)?
                };
                state.value = Some(Arc::clone(&value));
                value
            }
        };
        self.write_blob(&state, &value)?;
        state.persists = true;
        Ok(())
    }

    /// Change whether this holder mirrors its value to storage.
    ///
    /// Enabling persistence behaves exactly like [`Holder::save`]. Disabling
    /// it removes the stored blob but keeps the in-memory value.
    pub fn set_persists(&self, persists: bool) -> Result<()> {
        if persists {
            return self.save();
        }
        let mut state = self.state.write().expect("lock poisoned");
        if state.persists {
            let key = self.key.storage_key();
            let removed = self.store.delete(&key)?;
            state.persists = false;
            debug!(key = %key, removed, "persistence disabled");
        }
        Ok(())
    }

    /// Drop the in-memory value reference.
    ///
    /// Storage is untouched; the next access reconstructs the value, or for
    /// a persistent holder reloads the stored blob.
    pub fn release(&self) {
        let mut state = self.state.write().expect("lock poisoned");
        if state.value.take().is_some() {
            debug!(
                type_name = self.key.type_name(),
                tag = self.key.tag(),
                "instance released"
            );
        }
    }

    /// Capture and release the current value, removing the stored blob if
    /// this holder is persistent. Returns the previously-held value.
    ///
    /// The blob is removed before the value reference is taken; a storage
    /// failure leaves the in-memory value intact.
    ///
    /// The persistence flag survives, so the next access of a persistent key
    /// runs the first-touch protocol again.
    pub(crate) fn delete(&self) -> Result<Option<ErasedValue>> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.persists {
            let key = self.key.storage_key();
            let removed = self.store.delete(&key)?;
            debug!(key = %key, removed, "stored blob removed");
        }
        let previous = state.value.take();
        if previous.is_some() {
            debug!(
                type_name = self.key.type_name(),
                tag = self.key.tag(),
                "instance deleted"
            );
        }
        Ok(previous)
    }

    /// The current value without materializing an absent one.
    pub(crate) fn peek(&self) -> Option<ErasedValue> {
        self.state.read().expect("lock poisoned").value.clone()
    }

    /// The held value, materialized on first access.
    ///
    /// Non-persistent holders construct a fresh value. Persistent holders
    /// load the stored blob; on first touch they construct a fresh value and
    /// write it in the same call, so a persistent key is on disk from the
    /// moment it exists.
    pub(crate) fn instance(&self) -> Result<ErasedValue> {
        if let Some(value) = self.peek() {
            return Ok(value);
        }

        let mut state = self.state.write().expect("lock poisoned");
        // Re-check: another thread may have materialized while we waited.
        if let Some(value) = &state.value {
            return Ok(Arc::clone(value));
        }
        let value = self.materialize(&state)?;
        state.value = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Replace the in-memory value. Storage is not touched.
    pub(crate) fn set_value(&self, value: ErasedValue) {
        let mut state = self.state.write().expect("lock poisoned");
        state.value = Some(value);
    }

    /// Run a closure over the held value under the write lock, materializing
    /// an absent value first.
    ///
    /// The closure returns the value to keep plus the operation outcome, so
    /// a failed downcast can hand the original value back unchanged.
    pub(crate) fn update_value<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(ErasedValue) -> (ErasedValue, Result<()>),
    {
        let mut state = self.state.write().expect("lock poisoned");
        let current = match state.value.take() {
            Some(value) => value,
            None => self.materialize(&state)?,
        };
        let (value, outcome) = f(current);
        state.value = Some(value);
        outcome
    }

    /// Install capabilities an earlier creation path did not carry. Existing
    /// capabilities are never replaced.
    pub(crate) fn backfill(&self, factory: Option<Factory>, persist_ops: Option<Arc<PersistOps>>) {
        if factory.is_none() && persist_ops.is_none() {
            return;
        }
        let mut state = self.state.write().expect("lock poisoned");
        if state.factory.is_none() {
            state.factory = factory;
        }
        if state.persist_ops.is_none() {
            state.persist_ops = persist_ops;
        }
    }

    /// Produce a value for this key according to its persistence mode.
    fn materialize(&self, state: &HolderState) -> Result<ErasedValue> {
        if !state.persists {
            return self.construct(state);
        }
        match self.load(state)? {
            Some(value) => Ok(value),
            None => {
                let value = self.construct(state)?;
                self.write_blob(state, &value)?;
                debug!(key = %self.storage_key(), "first touch persisted");
                Ok(value)
            }
        }
    }

    /// Run the registered constructor.
    fn construct(&self, state: &HolderState) -> Result<ErasedValue> {
        let factory = state
            .factory
            .as_ref()
            .ok_or_else(|| RegistryError::Construction {
                type_name: self.key.type_name().to_string(),
                reason: "no constructor registered for this key".to_string(),
            })?;
        let value = factory().map_err(|reason| RegistryError::Construction {
            type_name: self.key.type_name().to_string(),
            reason,
        })?;
        debug!(
            type_name = self.key.type_name(),
            tag = self.key.tag(),
            "instance constructed"
        );
        Ok(value)
    }

    /// Decode the stored blob for this key, if one exists.
    fn load(&self, state: &HolderState) -> Result<Option<ErasedValue>> {
        let key = self.key.storage_key();
        let Some(bytes) = self.store.read(&key)? else {
            return Ok(None);
        };
        let ops = state
            .persist_ops
            .as_ref()
            .ok_or_else(|| self.not_serializable())?;
        let value = (ops.decode)(&bytes, self.codec)?;
        debug!(key = %key, bytes = bytes.len(), "instance loaded");
        Ok(Some(value))
    }

    /// Encode a value and write it under this holder's storage key.
    fn write_blob(&self, state: &HolderState, value: &ErasedValue) -> Result<()> {
        let ops = state
            .persist_ops
            .as_ref()
            .ok_or_else(|| self.not_serializable())?;
        let bytes = (ops.encode)(value.as_ref(), self.codec)?;
        let key = self.key.storage_key();
        self.store.write(&key, &bytes)?;
        debug!(key = %key, bytes = bytes.len(), "instance saved");
        Ok(())
    }

    fn not_serializable(&self) -> RegistryError {
        RegistryError::NotSerializable {
            type_name: self.key.type_name().to_string(),
        }
    }
}

impl fmt::Debug for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("Holder")
            .field("key", &self.key)
            .field("has_instance", &state.value.is_some())
            .field("persists", &state.persists)
            .finish()
    }
}
