//! Blob storage for the solo instance registry.
//!
//! This crate implements the durable half of keyed singleton persistence: a
//! key-to-bytes store that the registry writes serialized instances into and
//! reloads them from after a restart. Keys follow a fixed convention
//! (`singleton/<tag>_<sanitized-type-name>`, see [`StorageKey::for_instance`])
//! so the same (tag, type) pair always resolves to the same blob, on any
//! platform and across reimplementations sharing a store.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`MemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBlobStore`] -- directory-backed durable store
//!
//! # Design Rules
//!
//! 1. Absence is not an error: reading a missing key is `Ok(None)`, deleting
//!    one is `Ok(false)`.
//! 2. Keys are validated at the store boundary; a malformed key never touches
//!    the backend.
//! 3. Writes replace whole blobs; there are no partial updates.
//! 4. The store never interprets blob contents.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod key;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use key::{StorageKey, INSTANCE_PREFIX};
pub use memory::MemoryBlobStore;
pub use traits::BlobStore;
