//! Storage key derivation and validation.
//!
//! Keys are slash-separated relative paths into the store. Instance blobs
//! live under the fixed `singleton/` namespace with a key derived from the
//! tag and the fully-qualified type name:
//!
//! ```text
//! singleton/<tag>_<sanitized-type-name>
//! ```
//!
//! The separator is always the literal `/` and `_`, never the platform path
//! separator, so a key written on one platform resolves to the same blob on
//! any other. The type name is sanitized by mapping every character outside
//! `[A-Za-z0-9_-]` to `_`, which is deterministic and collision-stable for a
//! fixed type.

use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Namespace prefix for persisted instance blobs.
pub const INSTANCE_PREFIX: &str = "singleton/";

/// Characters that are forbidden anywhere in a storage key.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '\\'];

/// A slash-separated key naming one blob in a [`crate::BlobStore`].
///
/// Construction is infallible; backends validate keys with [`StorageKey::validate`]
/// before touching storage, so a malformed key surfaces as
/// [`StoreError::InvalidKey`] at operation time rather than at derivation time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap a raw key string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derive the key a keyed instance persists under.
    ///
    /// The result is `singleton/<tag>_<sanitized-type-name>` with the tag
    /// carried verbatim. Stable across process restarts: the same (tag, type)
    /// pair always derives the same key.
    pub fn for_instance(tag: &str, type_name: &str) -> Self {
        Self(format!(
            "{INSTANCE_PREFIX}{tag}_{}",
            sanitize_type_name(type_name)
        ))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that this key is safe to hand to a storage backend.
    pub fn validate(&self) -> StoreResult<()> {
        let key = &self.0;

        if key.is_empty() {
            return Err(self.invalid("key must not be empty"));
        }
        for ch in FORBIDDEN_CHARS {
            if key.contains(*ch) {
                return Err(self.invalid(format!("contains forbidden character: {ch:?}")));
            }
        }
        // `..` components would escape the store root on path-based backends.
        if key.split('/').any(|component| component == "..") {
            return Err(self.invalid("must not contain '..' components"));
        }
        if key.starts_with('/') || key.ends_with('/') {
            return Err(self.invalid("must not start or end with '/'"));
        }
        if key.split('/').any(str::is_empty) {
            return Err(self.invalid("path components must not be empty"));
        }

        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> StoreError {
        StoreError::InvalidKey {
            key: self.0.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StorageKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Map every character outside `[A-Za-z0-9_-]` to `_`.
fn sanitize_type_name(type_name: &str) -> String {
    type_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
