//! Error types for registry operations.

use thiserror::Error;

/// Errors produced by the instance registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A default value for the key could not be constructed.
    #[error("cannot construct instance of {type_name}: {reason}")]
    Construction { type_name: String, reason: String },

    /// Persistence was requested for a type with no encode/decode capability.
    #[error("type {type_name} is not serializable; it cannot be persisted")]
    NotSerializable { type_name: String },

    /// The codec failed to encode a value or decode a stored blob.
    #[error("serialization error for {type_name}: {reason}")]
    Serialization { type_name: String, reason: String },

    /// A stored value did not match the type registered for its key.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Failure in the underlying blob store.
    #[error("store error: {0}")]
    Store(#[from] solo_store::StoreError),
}

/// Convenience alias used throughout the registry crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
