//! Byte serialization capability used to frame queue bodies and blobs.

use crate::error::SerializationError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts typed values to and from byte sequences
///
/// Implementations must be deterministic enough that a value serialized by
/// one manager instance deserializes in another using the same format.
pub trait ByteSerializer: Send + Sync + 'static {
    /// Short identifier of the wire format (for logging)
    fn format_name(&self) -> &'static str;

    /// Serialize a value to bytes
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Deserialize bytes into a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// JSON serializer backed by `serde_json`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonSerializer;

impl ByteSerializer for JsonSerializer {
    fn format_name(&self) -> &'static str {
        "json"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
