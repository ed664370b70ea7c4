//! Byte codecs for entities and events.
//!
//! The runtime treats serialized entities and events as opaque bytes; the
//! codec decides how those bytes are produced. Two codecs are shipped and
//! the entity and event sides are configured independently.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors raised when a codec refuses to produce or parse bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("failed to serialize value: {0}")]
    Encode(String),
    /// Bytes could not be deserialized.
    #[error("failed to deserialize value: {0}")]
    Decode(String),
}

/// Opaque bytes⇄value codec.
///
/// JSON is the default on both the entity and event side; MessagePack trades
/// readability for compactness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// `serde_json`, human readable.
    #[default]
    Json,
    /// `rmp-serde` named-field MessagePack.
    MessagePack,
}

impl Codec {
    /// Serialize a value to bytes.
    pub fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string())),
            Codec::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
        }
    }

    /// Deserialize a value from bytes.
    pub fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
            Codec::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
        }
    }
}
