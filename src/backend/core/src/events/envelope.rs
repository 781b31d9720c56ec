//! Event envelopes and the type registry used to decode them.
//!
//! On the wire an event travels as two layers: an outer `EventWrapper`
//! (`{type_name, bytes}`, JSON with base64 payload) and the inner payload, the
//! JSON of the concrete event. The registry maps the embedded type name to a
//! decoder producing the follower's event type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::event::Event;
use crate::error::{FollowError, Result};

// =============================================================================
// Wrapper
// =============================================================================

/// Typed-name + payload-bytes wrapper around a serialized event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWrapper {
    /// Registered type name of the payload
    pub type_name: String,

    /// Serialized payload
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl EventWrapper {
    /// Wrap an already-serialized payload.
    pub fn new(type_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            bytes,
        }
    }

    /// Serialize an event and wrap it under its own type name.
    pub fn from_event<T: Event + Serialize>(event: &T) -> Result<Self> {
        Ok(Self::new(event.event_type(), serde_json::to_vec(event)?))
    }

    /// Encode the wrapper itself into envelope bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode envelope bytes into a wrapper.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Type Registry
// =============================================================================

type Decoder<E> = Box<dyn Fn(&[u8]) -> Result<E> + Send + Sync>;

/// Maps envelope type names to decoders for the follower's event type `E`.
///
/// Each registered payload type `T` is deserialized from JSON and converted
/// into `E`, typically an enum with one variant per payload type.
pub struct EventTypeRegistry<E> {
    decoders: HashMap<String, Decoder<E>>,
}

impl<E: Event> EventTypeRegistry<E> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a payload type under `type_name`. Re-registering replaces the decoder.
    pub fn register<T>(&mut self, type_name: impl Into<String>) -> &mut Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        let decoder: Decoder<E> = Box::new(|bytes: &[u8]| {
            let payload: T = serde_json::from_slice(bytes)?;
            Ok(payload.into())
        });
        self.decoders.insert(type_name.into(), decoder);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T>(mut self, type_name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        self.register::<T>(type_name);
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode the payload of an already-unwrapped envelope.
    pub fn decode(&self, wrapper: &EventWrapper) -> Result<E> {
        let decoder = self
            .decoders
            .get(&wrapper.type_name)
            .ok_or_else(|| FollowError::unknown_event_type(&wrapper.type_name))?;
        decoder(&wrapper.bytes)
    }

    /// Decode raw envelope bytes: wrapper first, then the typed payload.
    pub fn decode_envelope(&self, bytes: &[u8]) -> Result<E> {
        let wrapper = EventWrapper::decode(bytes)?;
        self.decode(&wrapper)
    }
}

impl<E: Event> Default for EventTypeRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventTypeRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("EventTypeRegistry")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::EventBase;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        base: EventBase,
        from: String,
    }

    impl Event for Pinged {
        fn version(&self) -> u64 {
            self.base.version
        }

        fn timestamp(&self) -> u64 {
            self.base.timestamp
        }

        fn event_type(&self) -> &'static str {
            "Pinged"
        }
    }

    fn registry() -> EventTypeRegistry<Pinged> {
        EventTypeRegistry::new().with::<Pinged>("Pinged")
    }

    #[test]
    fn test_wrapper_payload_is_base64_text() {
        let wrapper = EventWrapper::new("Pinged", vec![0xde, 0xad, 0xbe, 0xef]);
        let json: serde_json::Value = serde_json::from_slice(&wrapper.encode().unwrap()).unwrap();
        assert_eq!(json["type_name"], "Pinged");
        assert_eq!(json["bytes"], "3q2+7w==");
    }

    #[test]
    fn test_decode_envelope() {
        let event = Pinged {
            base: EventBase::new(3, 1_700_000_000_000),
            from: "billing".to_string(),
        };
        let bytes = EventWrapper::from_event(&event).unwrap().encode().unwrap();

        let decoded = registry().decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.version(), 3);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let bytes = EventWrapper::new("Ponged", b"{}".to_vec()).encode().unwrap();
        let err = registry().decode_envelope(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEventType);
    }

    #[test]
    fn test_malformed_wrapper_is_rejected() {
        let err = registry().decode_envelope(b"not an envelope").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }

    #[test]
    fn test_payload_shape_mismatch_is_rejected() {
        let bytes = EventWrapper::new("Pinged", br#"{"from": 12}"#.to_vec())
            .encode()
            .unwrap();
        let err = registry().decode_envelope(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }

    #[test]
    fn test_registry_debug_lists_types() {
        let registry = registry();
        assert!(registry.contains("Pinged"));
        assert_eq!(registry.len(), 1);
        assert!(format!("{:?}", registry).contains("Pinged"));
    }
}
