use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use solo_store::StorageKey;

/// Identity of one keyed instance slot: a Rust type plus a string tag.
///
/// Equality and hashing use the runtime [`TypeId`] and the tag, so two types
/// that happen to share a name can never collide in the registry table. The
/// fully-qualified type name travels alongside for diagnostics and storage
/// key derivation.
#[derive(Clone, Debug)]
pub struct InstanceKey {
    type_id: TypeId,
    type_name: &'static str,
    tag: String,
}

impl InstanceKey {
    /// Key for `T` under the default tag, the type's simple name.
    pub fn of<T: 'static>() -> Self {
        let type_name = std::any::type_name::<T>();
        Self {
            type_id: TypeId::of::<T>(),
            type_name,
            tag: simple_type_name(type_name).to_string(),
        }
    }

    /// Key for `T` under an explicit tag, allowing multiple independent
    /// instances of the same type.
    pub fn tagged<T: 'static>(tag: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            tag: tag.into(),
        }
    }

    /// Runtime identity of the keyed type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully-qualified name of the keyed type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The tag naming this slot.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Blob key this instance persists under.
    ///
    /// Derived deterministically from the tag and the fully-qualified type
    /// name, so it is stable across process restarts.
    pub fn storage_key(&self) -> StorageKey {
        StorageKey::for_instance(&self.tag, self.type_name)
    }
}

impl PartialEq for InstanceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.tag == other.tag
    }
}

impl Eq for InstanceKey {}

impl Hash for InstanceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.tag.hash(state);
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.tag)
    }
}

/// Final path segment of a fully-qualified type name.
///
/// Separators inside generic parameter lists are ignored, so
/// `alloc::vec::Vec<core::option::Option<u8>>` yields
/// `Vec<core::option::Option<u8>>` rather than a fragment of the parameter.
pub(crate) fn simple_type_name(full: &str) -> &str {
    let bytes = full.as_bytes();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' | b'[' => depth += 1,
            b'>' | b')' | b']' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                start = i + 2;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    &full[start..]
}
