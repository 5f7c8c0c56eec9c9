//! Pluggable codec for payloads and metadata.

use serde::Serialize;

use crate::error::DomainError;
use crate::message::{Metadata, Payload};

/// Encodes payloads and metadata to text and back.
///
/// Decoding a payload hands the decoded structure and its persisted type tag
/// to [`Payload::from_tagged`], which picks the concrete reconstruction.
pub trait EventSerializer: Send + Sync {
    /// Encodes a value.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the value cannot be encoded.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, DomainError>;

    /// Decodes a payload stored under `payload_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the data is malformed or the
    /// payload type rejects it.
    fn deserialize<P: Payload>(&self, data: &str, payload_type: &str) -> Result<P, DomainError>;

    /// Decodes a metadata blob.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the data is malformed.
    fn deserialize_metadata(&self, data: &str) -> Result<Metadata, DomainError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl EventSerializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, DomainError> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize<P: Payload>(&self, data: &str, payload_type: &str) -> Result<P, DomainError> {
        let decoded: serde_json::Value = serde_json::from_str(data)?;
        P::from_tagged(payload_type, decoded).map_err(|e| {
            DomainError::Serialization(format!("cannot rebuild {payload_type}: {e}"))
        })
    }

    fn deserialize_metadata(&self, data: &str) -> Result<Metadata, DomainError> {
        // `null` decodes as empty metadata.
        let decoded: Option<Metadata> = serde_json::from_str(data)?;
        Ok(decoded.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::JsonPayload;

    #[test]
    fn test_metadata_round_trip() {
        let serializer = JsonSerializer;
        let metadata = Metadata::new().with("user", "ann").with("attempt", 2);

        let encoded = serializer.serialize(&metadata).unwrap();
        let decoded = serializer.deserialize_metadata(&encoded).unwrap();

        assert_eq!(encoded, r#"{"attempt":2,"user":"ann"}"#);
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_null_metadata_decodes_as_empty() {
        let decoded = JsonSerializer.deserialize_metadata("null").unwrap();

        assert!(decoded.is_empty());
    }

    #[test]
    fn test_deserialize_passes_type_tag_to_payload() {
        let payload: JsonPayload = JsonSerializer
            .deserialize(r#"{"sku":"A-1"}"#, "orders::ItemAddedEvent")
            .unwrap();

        assert_eq!(payload.payload_type(), "orders::ItemAddedEvent");
        assert_eq!(payload.data(), &serde_json::json!({"sku": "A-1"}));
    }

    #[test]
    fn test_malformed_data_is_a_serialization_error() {
        let result: Result<JsonPayload, _> = JsonSerializer.deserialize("{not json", "x");

        assert!(matches!(result, Err(DomainError::Serialization(_))));
    }
}
