//! Typed handles over registry-owned instances.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use solo_store::StorageKey;

use crate::error::{RegistryError, Result};
use crate::holder::{default_factory, ErasedValue, Factory, Holder, PersistOps};
use crate::key::InstanceKey;
use crate::registry::Registry;

/// Typed handle to one keyed instance.
///
/// A handle is a thin accessor over the registry-owned [`Holder`] for its
/// key. It carries no state of its own, so any number of handles for the
/// same (type, tag) observe each other's mutations. Handles are cheap to
/// construct and clone.
pub struct Singleton<T> {
    registry: Arc<Registry>,
    holder: Arc<Holder>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Singleton<T> {
    /// Start assembling a handle with a custom tag, constructor, or
    /// persistence mode.
    pub fn builder() -> SingletonBuilder<T> {
        SingletonBuilder::new()
    }

    /// Handle for the default-tagged instance of `T`.
    pub fn new(registry: &Arc<Registry>) -> Self
    where
        T: Default,
    {
        Self::resolve(
            registry,
            InstanceKey::of::<T>(),
            false,
            Some(default_factory::<T>()),
            None,
        )
    }

    /// Handle for the instance of `T` under an explicit tag.
    pub fn tagged(registry: &Arc<Registry>, tag: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self::resolve(
            registry,
            InstanceKey::tagged::<T>(tag),
            false,
            Some(default_factory::<T>()),
            None,
        )
    }

    /// Handle for the default-tagged persistent instance of `T`.
    ///
    /// Nothing is loaded or written yet; the first access loads the stored
    /// value or, on first touch, persists a fresh default.
    pub fn persistent(registry: &Arc<Registry>) -> Self
    where
        T: Default + Serialize + DeserializeOwned,
    {
        Self::resolve(
            registry,
            InstanceKey::of::<T>(),
            true,
            Some(default_factory::<T>()),
            Some(PersistOps::for_type::<T>()),
        )
    }

    /// Handle for the persistent instance of `T` under an explicit tag.
    pub fn persistent_tagged(registry: &Arc<Registry>, tag: impl Into<String>) -> Self
    where
        T: Default + Serialize + DeserializeOwned,
    {
        Self::resolve(
            registry,
            InstanceKey::tagged::<T>(tag),
            true,
            Some(default_factory::<T>()),
            Some(PersistOps::for_type::<T>()),
        )
    }

    /// Adopt a pre-built value as the instance for `T`'s default tag,
    /// replacing any existing registration.
    pub fn adopt(registry: &Arc<Registry>, value: T) -> Self {
        let holder = registry.insert_value(InstanceKey::of::<T>(), Arc::new(value), None, None);
        Self::wrap(registry, holder)
    }

    /// Adopt a pre-built value and persist it immediately.
    pub fn adopt_persistent(registry: &Arc<Registry>, value: T) -> Result<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        let holder = registry.insert_value_persistent(
            InstanceKey::of::<T>(),
            Arc::new(value),
            None,
            Some(PersistOps::for_type::<T>()),
        )?;
        Ok(Self::wrap(registry, holder))
    }

    /// The shared instance, created or loaded on first access.
    pub fn get(&self) -> Result<Arc<T>> {
        let value = self.holder.instance()?;
        self.downcast(value)
    }

    /// A clone of the current instance value.
    pub fn get_cloned(&self) -> Result<T>
    where
        T: Clone,
    {
        Ok(self.get()?.as_ref().clone())
    }

    /// The current instance if one is held, without materializing.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.holder
            .peek()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Replace the instance value.
    ///
    /// Storage is not touched; call [`Singleton::save`] to flush a
    /// persistent instance.
    pub fn set(&self, value: T) {
        self.holder.set_value(Arc::new(value));
    }

    /// Mutate the instance in place under the holder's lock, materializing
    /// an absent value first.
    ///
    /// Readers holding an `Arc` from an earlier [`Singleton::get`] keep the
    /// value they saw; the holder switches to the updated copy.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        T: Clone,
        F: FnOnce(&mut T),
    {
        let registered = self.holder.key().type_name();
        self.holder
            .update_value(move |erased| match erased.downcast::<T>() {
                Ok(mut typed) => {
                    f(Arc::make_mut(&mut typed));
                    (typed as ErasedValue, Ok(()))
                }
                Err(original) => {
                    let err = RegistryError::TypeMismatch {
                        expected: std::any::type_name::<T>().to_string(),
                        actual: registered.to_string(),
                    };
                    (original, Err(err))
                }
            })
    }

    /// Write the instance to storage and mark it persistent.
    ///
    /// Also promotes a transient handle: the encode/decode capability is
    /// installed on the holder if its creation path did not carry it, so a
    /// handle created without persistence saves cleanly.
    pub fn save(&self) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        self.holder.backfill(None, Some(PersistOps::for_type::<T>()));
        self.holder.save()
    }

    /// Change whether the instance is mirrored to storage.
    ///
    /// Enabling writes the current value through, exactly like
    /// [`Singleton::save`]; disabling removes the stored blob and keeps the
    /// in-memory value.
    pub fn set_persists(&self, persists: bool) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        self.holder.backfill(None, Some(PersistOps::for_type::<T>()));
        self.holder.set_persists(persists)
    }

    /// Drop the in-memory value; a persisted copy stays on disk.
    pub fn release(&self) {
        self.holder.release();
    }

    /// Clear the value and remove the persisted copy.
    ///
    /// Returns the previously-held value. The key stays registered and
    /// re-creates on the next access.
    pub fn delete(&self) -> Result<Option<Arc<T>>> {
        match self.holder.delete()? {
            Some(value) => Ok(Some(self.downcast(value)?)),
            None => Ok(None),
        }
    }

    /// Delete the instance and unregister its key, consuming the handle.
    pub fn remove(self) -> Result<Option<Arc<T>>> {
        let previous = self.delete()?;
        self.registry.remove_key(self.holder.key());
        Ok(previous)
    }

    /// Whether a value is currently held in memory.
    pub fn has_instance(&self) -> bool {
        self.holder.has_instance()
    }

    /// Whether a blob exists in storage for this handle's key.
    pub fn is_on_disk(&self) -> Result<bool> {
        self.holder.is_on_disk()
    }

    /// Whether the instance is mirrored to durable storage.
    pub fn persists(&self) -> bool {
        self.holder.persists()
    }

    /// The tag naming this instance.
    pub fn tag(&self) -> &str {
        self.holder.key().tag()
    }

    /// The blob key this instance persists under.
    pub fn storage_key(&self) -> StorageKey {
        self.holder.storage_key()
    }

    /// The registry-owned holder backing this handle.
    pub fn holder(&self) -> &Arc<Holder> {
        &self.holder
    }

    fn resolve(
        registry: &Arc<Registry>,
        key: InstanceKey,
        persists: bool,
        factory: Option<Factory>,
        persist_ops: Option<Arc<PersistOps>>,
    ) -> Self {
        let holder = registry.holder_for(key, persists, factory, persist_ops);
        Self::wrap(registry, holder)
    }

    fn wrap(registry: &Arc<Registry>, holder: Arc<Holder>) -> Self {
        Self {
            registry: Arc::clone(registry),
            holder,
            _marker: PhantomData,
        }
    }

    fn downcast(&self, value: ErasedValue) -> Result<Arc<T>> {
        value.downcast::<T>().map_err(|_| RegistryError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: self.holder.key().type_name().to_string(),
        })
    }
}

impl<T> Clone for Singleton<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            holder: Arc::clone(&self.holder),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Singleton<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Singleton")
            .field("key", self.holder.key())
            .finish()
    }
}

/// Incremental assembly of a [`Singleton`] handle.
///
/// ```
/// use std::sync::Arc;
///
/// use solo_registry::{Registry, Singleton};
///
/// #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
/// struct Settings {
///     volume: u8,
/// }
///
/// let registry = Arc::new(Registry::in_memory());
/// let settings: Singleton<Settings> = Singleton::builder()
///     .tag("main")
///     .persist()
///     .default_construct()
///     .build(&registry)?;
/// assert_eq!(settings.get()?.volume, 0);
/// # Ok::<(), solo_registry::RegistryError>(())
/// ```
pub struct SingletonBuilder<T> {
    tag: Option<String>,
    persists: bool,
    value: Option<T>,
    factory: Option<Factory>,
    persist_ops: Option<Arc<PersistOps>>,
}

impl<T: Send + Sync + 'static> SingletonBuilder<T> {
    fn new() -> Self {
        Self {
            tag: None,
            persists: false,
            value: None,
            factory: None,
            persist_ops: None,
        }
    }

    /// Use an explicit tag instead of the type's simple name.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Mirror the instance to durable storage.
    pub fn persist(mut self) -> Self
    where
        T: Serialize + DeserializeOwned,
    {
        self.persists = true;
        self.persist_ops = Some(PersistOps::for_type::<T>());
        self
    }

    /// Construct absent values with `T::default()`.
    pub fn default_construct(mut self) -> Self
    where
        T: Default,
    {
        self.factory = Some(default_factory::<T>());
        self
    }

    /// Construct absent values with a custom constructor.
    pub fn construct_with<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(move || {
            Ok(Arc::new(constructor()) as ErasedValue)
        }));
        self
    }

    /// Construct absent values with a constructor that can fail.
    pub fn try_construct_with<F, E>(mut self, constructor: F) -> Self
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        self.factory = Some(Box::new(move || {
            constructor()
                .map(|value| Arc::new(value) as ErasedValue)
                .map_err(|err| err.to_string())
        }));
        self
    }

    /// Adopt a pre-built value when the handle is built, replacing any
    /// existing registration for the key.
    pub fn adopt(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Resolve the handle against a registry.
    ///
    /// Fails only when adopting with persistence enabled, where the value
    /// is written through immediately.
    pub fn build(self, registry: &Arc<Registry>) -> Result<Singleton<T>> {
        let key = match self.tag {
            Some(tag) => InstanceKey::tagged::<T>(tag),
            None => InstanceKey::of::<T>(),
        };
        let holder = match self.value {
            Some(value) if self.persists => registry.insert_value_persistent(
                key,
                Arc::new(value),
                self.factory,
                self.persist_ops,
            )?,
            Some(value) => {
                registry.insert_value(key, Arc::new(value), self.factory, self.persist_ops)
            }
            None => registry.holder_for(key, self.persists, self.factory, self.persist_ops),
        };
        Ok(Singleton::wrap(registry, holder))
    }
}

impl<T> fmt::Debug for SingletonBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonBuilder")
            .field("tag", &self.tag)
            .field("persists", &self.persists)
            .field("has_value", &self.value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    use solo_store::{BlobStore, MemoryBlobStore};

    use crate::codec::Codec;
    use crate::registry::RegistryConfig;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        score: i64,
    }

    // Deliberately carries no serde implementations.
    #[derive(Clone, Debug, Default, PartialEq)]
    struct Opaque {
        data: Vec<u8>,
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::in_memory())
    }

    fn shared_store_registry() -> (Arc<MemoryBlobStore>, Arc<Registry>) {
        let store = Arc::new(MemoryBlobStore::new());
        let registry = Arc::new(Registry::new(Arc::clone(&store) as Arc<dyn BlobStore>));
        (store, registry)
    }

    // ------------------------------------------------------------------
    // Identity and sharing
    // ------------------------------------------------------------------

    #[test]
    fn handles_share_one_instance() {
        let registry = registry();
        let first = Singleton::<Counter>::new(&registry);
        let second = Singleton::<Counter>::new(&registry);

        assert!(Arc::ptr_eq(first.holder(), second.holder()));
        let a = first.get().unwrap();
        let b = second.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn default_tag_is_the_simple_type_name() {
        let registry = registry();
        let implicit = Singleton::<Counter>::new(&registry);
        let explicit = Singleton::<Counter>::tagged(&registry, "Counter");

        assert_eq!(implicit.tag(), "Counter");
        assert!(Arc::ptr_eq(implicit.holder(), explicit.holder()));
    }

    #[test]
    fn tags_isolate_instances() {
        let registry = registry();
        let red = Singleton::<Counter>::tagged(&registry, "red");
        let blue = Singleton::<Counter>::tagged(&registry, "blue");

        red.update(|c| c.count = 7).unwrap();
        assert_eq!(red.get().unwrap().count, 7);
        assert_eq!(blue.get().unwrap().count, 0);
        assert!(!Arc::ptr_eq(red.holder(), blue.holder()));
    }

    #[test]
    fn release_is_observed_by_every_handle() {
        let registry = registry();
        let first = Singleton::<Counter>::new(&registry);
        let second = first.clone();
        let original = first.get().unwrap();

        first.release();
        assert!(!first.has_instance());
        assert!(!second.has_instance());

        // The next access constructs a fresh value.
        let fresh = second.get().unwrap();
        assert!(!Arc::ptr_eq(&original, &fresh));
    }

    #[test]
    fn storage_key_combines_tag_and_qualified_name() {
        let registry = registry();
        let handle = Singleton::<Counter>::tagged(&registry, "main");

        let expected = format!(
            "singleton/main_{}",
            std::any::type_name::<Counter>().replace("::", "__")
        );
        assert_eq!(handle.storage_key().as_str(), expected);
    }

    // ------------------------------------------------------------------
    // Value access and mutation
    // ------------------------------------------------------------------

    #[test]
    fn peek_does_not_materialize() {
        let registry = registry();
        let handle = Singleton::<Counter>::new(&registry);

        assert!(handle.peek().is_none());
        assert!(!handle.has_instance());

        handle.get().unwrap();
        assert!(handle.peek().is_some());
    }

    #[test]
    fn set_replaces_the_value() {
        let registry = registry();
        let handle = Singleton::<Counter>::new(&registry);
        handle.set(Counter { count: 11 });

        assert_eq!(handle.get().unwrap().count, 11);
        assert_eq!(handle.get_cloned().unwrap(), Counter { count: 11 });
    }

    #[test]
    fn update_keeps_earlier_readers_on_their_snapshot() {
        let registry = registry();
        let handle = Singleton::<Counter>::new(&registry);
        let before = handle.get().unwrap();

        handle.update(|c| c.count = 10).unwrap();
        assert_eq!(before.count, 0);
        assert_eq!(handle.get().unwrap().count, 10);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    #[test]
    fn first_touch_persists_a_fresh_default() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::persistent_tagged(&registry, "main");

        assert!(!handle.is_on_disk().unwrap());
        let value = handle.get().unwrap();
        assert_eq!(*value, Counter::default());
        assert!(handle.is_on_disk().unwrap());
        assert!(store.exists(&handle.storage_key()).unwrap());
    }

    #[test]
    fn mutate_save_restart_reload() {
        let (store, registry) = shared_store_registry();
        let profile = Singleton::<Profile>::persistent_tagged(&registry, "u1");
        profile
            .update(|p| {
                p.name = "maple".to_string();
                p.score = 42;
            })
            .unwrap();
        profile.save().unwrap();

        // A fresh registry over the same store stands in for a restart.
        let restarted = Arc::new(Registry::new(store));
        let reloaded = Singleton::<Profile>::persistent_tagged(&restarted, "u1");
        assert!(!reloaded.has_instance());
        let value = reloaded.get().unwrap();
        assert_eq!(value.name, "maple");
        assert_eq!(value.score, 42);
    }

    #[test]
    fn corrupt_stored_blob_surfaces_a_serialization_error() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Profile>::persistent_tagged(&registry, "u1");
        store
            .write(&handle.storage_key(), b"not a stored profile")
            .unwrap();

        let err = handle.get().unwrap_err();
        assert!(matches!(err, RegistryError::Serialization { .. }));
        assert!(!handle.has_instance());
        // The blob stays in place; a failed load never destroys data.
        assert_eq!(
            store.read(&handle.storage_key()).unwrap().as_deref(),
            Some(b"not a stored profile".as_slice())
        );
    }

    #[test]
    fn save_promotes_a_transient_instance() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::tagged(&registry, "promoted");
        handle.update(|c| c.count = 3).unwrap();

        assert!(!handle.persists());
        assert!(store.is_empty());
        handle.save().unwrap();
        assert!(handle.persists());
        assert!(handle.is_on_disk().unwrap());

        // The promoted blob is a real stored value: a fresh registry over
        // the same store loads it back.
        let restarted = Arc::new(Registry::new(store));
        let reloaded = Singleton::<Counter>::persistent_tagged(&restarted, "promoted");
        assert_eq!(reloaded.get().unwrap().count, 3);
    }

    #[test]
    fn enabling_persistence_writes_the_value_through() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::tagged(&registry, "toggled");
        handle.update(|c| c.count = 12).unwrap();

        handle.set_persists(true).unwrap();
        assert!(handle.persists());
        assert!(handle.is_on_disk().unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn release_keeps_disk_delete_clears_it() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::persistent_tagged(&registry, "main");
        handle.update(|c| c.count = 5).unwrap();
        handle.save().unwrap();

        handle.release();
        assert!(!handle.has_instance());
        assert!(handle.is_on_disk().unwrap());

        // Released values reload from storage on the next access.
        assert_eq!(handle.get().unwrap().count, 5);

        let previous = handle.delete().unwrap();
        assert_eq!(previous.unwrap().count, 5);
        assert!(!handle.has_instance());
        assert!(!handle.is_on_disk().unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn deleted_key_first_touches_again_on_access() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::persistent_tagged(&registry, "main");
        handle.update(|c| c.count = 9).unwrap();
        handle.save().unwrap();
        handle.delete().unwrap();

        assert_eq!(handle.get().unwrap().count, 0);
        assert!(store.exists(&handle.storage_key()).unwrap());
    }

    #[test]
    fn disabling_persistence_keeps_the_value() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::persistent_tagged(&registry, "main");
        handle.update(|c| c.count = 6).unwrap();

        handle.set_persists(false).unwrap();
        assert!(!handle.persists());
        assert!(store.is_empty());
        assert_eq!(handle.get().unwrap().count, 6);
    }

    #[test]
    fn persistence_flag_of_an_existing_entry_is_kept() {
        let registry = registry();
        let transient = Singleton::<Counter>::tagged(&registry, "main");
        assert!(!transient.persists());

        // The key already exists, so the persistent constructor does not
        // flip it.
        let still_transient = Singleton::<Counter>::persistent_tagged(&registry, "main");
        assert!(Arc::ptr_eq(transient.holder(), still_transient.holder()));
        assert!(!still_transient.persists());
    }

    #[test]
    fn non_serializable_instances_are_rejected_up_front() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Opaque>::adopt(&registry, Opaque { data: vec![1, 2] });

        // Opaque never satisfies the typed save bounds, so persistence can
        // only be requested through the holder, which rejects at runtime.
        let err = handle.holder().save().unwrap_err();
        assert!(matches!(err, RegistryError::NotSerializable { .. }));
        let err = handle.holder().set_persists(true).unwrap_err();
        assert!(matches!(err, RegistryError::NotSerializable { .. }));

        // No partial artifact reaches storage and the value stays usable.
        assert!(store.is_empty());
        assert!(!handle.persists());
        assert_eq!(handle.get().unwrap().data, vec![1, 2]);
    }

    #[test]
    fn json_codec_round_trips_readable_blobs() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let config = RegistryConfig { codec: Codec::Json };
        let registry = Arc::new(Registry::with_config(Arc::clone(&store), config.clone()));

        let profile = Singleton::<Profile>::persistent_tagged(&registry, "u1");
        profile.update(|p| p.name = "maple".to_string()).unwrap();
        profile.save().unwrap();

        let bytes = store.read(&profile.storage_key()).unwrap().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("maple"));

        let restarted = Arc::new(Registry::with_config(store, config));
        let reloaded = Singleton::<Profile>::persistent_tagged(&restarted, "u1");
        assert_eq!(reloaded.get().unwrap().name, "maple");
    }

    #[test]
    fn values_survive_process_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = Arc::new(Registry::open(dir.path()).unwrap());
            let profile = Singleton::<Profile>::persistent_tagged(&registry, "u1");
            profile
                .update(|p| {
                    p.name = "maple".to_string();
                    p.score = 42;
                })
                .unwrap();
            profile.save().unwrap();
        }

        let registry = Arc::new(Registry::open(dir.path()).unwrap());
        let profile = Singleton::<Profile>::persistent_tagged(&registry, "u1");
        let value = profile.get().unwrap();
        assert_eq!(value.name, "maple");
        assert_eq!(value.score, 42);
    }

    // ------------------------------------------------------------------
    // Adoption and removal
    // ------------------------------------------------------------------

    #[test]
    fn adopt_replaces_the_registration() {
        let registry = registry();
        let first = Singleton::<Counter>::adopt(&registry, Counter { count: 1 });
        let second = Singleton::<Counter>::adopt(&registry, Counter { count: 2 });

        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(first.holder(), second.holder()));
        assert_eq!(second.get().unwrap().count, 2);

        // Fresh handles resolve to the replacement; the old handle keeps
        // its detached holder.
        let fresh = Singleton::<Counter>::new(&registry);
        assert!(Arc::ptr_eq(second.holder(), fresh.holder()));
        assert_eq!(first.get().unwrap().count, 1);
    }

    #[test]
    fn adopt_persistent_writes_through_immediately() {
        let (store, registry) = shared_store_registry();
        let handle =
            Singleton::<Counter>::adopt_persistent(&registry, Counter { count: 8 }).unwrap();

        assert!(handle.persists());
        assert!(handle.is_on_disk().unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_unregisters_and_clears_storage() {
        let (store, registry) = shared_store_registry();
        let handle = Singleton::<Counter>::persistent_tagged(&registry, "gone");
        handle.update(|c| c.count = 4).unwrap();
        handle.save().unwrap();

        let previous = handle.remove().unwrap();
        assert_eq!(previous.unwrap().count, 4);
        assert!(!registry.contains::<Counter>("gone"));
        assert!(store.is_empty());
    }

    // ------------------------------------------------------------------
    // Builder
    // ------------------------------------------------------------------

    #[test]
    fn builder_wires_tag_persistence_and_constructor() {
        let (store, registry) = shared_store_registry();
        let handle: Singleton<Counter> = Singleton::builder()
            .tag("built")
            .persist()
            .construct_with(|| Counter { count: 21 })
            .build(&registry)
            .unwrap();

        assert_eq!(handle.tag(), "built");
        assert!(handle.persists());
        assert_eq!(handle.get().unwrap().count, 21);
        assert!(store.exists(&handle.storage_key()).unwrap());
    }

    #[test]
    fn builder_adopt_with_persistence_saves_at_build() {
        let (store, registry) = shared_store_registry();
        let handle: Singleton<Counter> = Singleton::builder()
            .tag("adopted")
            .persist()
            .adopt(Counter { count: 2 })
            .build(&registry)
            .unwrap();

        assert!(handle.is_on_disk().unwrap());
        assert!(!store.is_empty());
    }

    #[test]
    fn failing_constructor_surfaces_as_construction_error() {
        let registry = registry();
        let handle: Singleton<Counter> = Singleton::builder()
            .tag("broken")
            .try_construct_with(|| Err::<Counter, _>("backend offline"))
            .build(&registry)
            .unwrap();

        match handle.get().unwrap_err() {
            RegistryError::Construction { reason, .. } => {
                assert_eq!(reason, "backend offline");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn builder_without_constructor_cannot_materialize() {
        let registry = registry();
        let handle: Singleton<Counter> =
            Singleton::builder().tag("empty").build(&registry).unwrap();

        assert!(matches!(
            handle.get().unwrap_err(),
            RegistryError::Construction { .. }
        ));
    }

    // ------------------------------------------------------------------
    // Concurrency
    // ------------------------------------------------------------------

    #[test]
    fn racing_handles_construct_exactly_once() {
        let (store, registry) = shared_store_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let _seed: Singleton<Counter> = Singleton::builder()
            .tag("shared")
            .persist()
            .construct_with(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Counter { count: 7 }
            })
            .build(&registry)
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    Singleton::<Counter>::persistent_tagged(&registry, "shared")
                        .get()
                        .unwrap()
                })
            })
            .collect();
        let values: Vec<Arc<Counter>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for value in &values[1..] {
            assert!(Arc::ptr_eq(&values[0], value));
            assert_eq!(value.count, 7);
        }
        assert_eq!(store.list_keys("singleton/").unwrap().len(), 1);
    }
}
