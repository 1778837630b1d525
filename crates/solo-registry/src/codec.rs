use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RegistryError, Result};

/// Serialization strategy for persisted instances.
///
/// Every blob a registry writes is the plain codec payload with no framing,
/// so a store written with one registry instance can be reopened by another
/// as long as both use the same codec.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    /// Compact binary encoding. The default.
    #[default]
    Bincode,
    /// Human-readable JSON encoding.
    Json,
}

impl Codec {
    /// Encode a value to bytes.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Bincode => bincode::serialize(value).map_err(|e| serialization::<T>(e)),
            Codec::Json => serde_json::to_vec(value).map_err(|e| serialization::<T>(e)),
        }
    }

    /// Decode a value from bytes.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Bincode => bincode::deserialize(bytes).map_err(|e| serialization::<T>(e)),
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| serialization::<T>(e)),
        }
    }
}

fn serialization<T>(err: impl std::fmt::Display) -> RegistryError {
    RegistryError::Serialization {
        type_name: std::any::type_name::<T>().to_string(),
        reason: err.to_string(),
    }
}
