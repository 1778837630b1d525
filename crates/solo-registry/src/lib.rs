//! Keyed singleton instances with opt-in persistence.
//!
//! `solo-registry` maps a (type, tag) pair to a single lazily-created shared
//! instance. A [`Registry`] owns the table, a [`Holder`] owns one binding,
//! and [`Singleton`] is the typed handle callers work with. Instances opt
//! into durability, in which case the registry mirrors them into a
//! [`BlobStore`] through a [`Codec`].
//!
//! # Design Rules
//!
//! 1. One holder per (type, tag) key; every handle resolves to it.
//! 2. Values materialize lazily, on first access rather than registration.
//! 3. A persistent key is on disk from the moment its value exists.
//! 4. Release keeps the stored copy; delete removes it.
//! 5. Failed persistence never corrupts the in-memory value.

pub mod codec;
pub mod error;
pub mod holder;
pub mod key;
pub mod registry;
pub mod singleton;

pub use codec::Codec;
pub use error::{RegistryError, Result};
pub use holder::Holder;
pub use key::InstanceKey;
pub use registry::{BulkFailure, BulkReport, Registry, RegistryConfig};
pub use singleton::{Singleton, SingletonBuilder};

// Re-export storage types that appear in registry signatures
pub use solo_store::{BlobStore, FsBlobStore, MemoryBlobStore, StorageKey, StoreError};
