//! Codec trait and implementations for turning envelopes into bytes.
//!
//! The broker never cares HOW an envelope is serialized for the wire; it
//! only needs something implementing [`Codec`]. Decoding untrusted input
//! is not part of this trait: inbound bytes go through
//! [`normalize`](crate::normalize), which knows how to say *why* a message
//! is unacceptable.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// - `Send + Sync` → one codec instance is shared by every connection task.
/// - `'static` → it lives as long as the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes into a value. Used by clients and tests that read
    /// what the broker pushes.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedMessage` if the bytes don't match.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`). This is the wire format.
///
/// ## Example
///
/// ```rust
/// use switchboard_protocol::{ClientId, Codec, Envelope, JsonCodec, SequenceId};
///
/// let envelope = Envelope {
///     identity: ClientId::new("alice"),
///     method: "send".into(),
///     params: serde_json::json!({"channel": "broadcast"}),
///     sequence_id: SequenceId::Id(1),
///     version: "1.0".into(),
/// };
///
/// let bytes = JsonCodec.encode(&envelope).unwrap();
/// let decoded: Envelope = JsonCodec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientId, Envelope, SequenceId};

    #[test]
    fn test_json_codec_encodes_sentinel_sequence_as_string() {
        let envelope = Envelope {
            identity: ClientId::server(),
            method: "notify".into(),
            params: serde_json::json!({"code": 400}),
            sequence_id: SequenceId::None,
            version: "1.0".into(),
        };
        let bytes = JsonCodec.encode(&envelope).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""sequence-id":"none""#), "{text}");
    }

    #[test]
    fn test_json_codec_decode_garbage_is_malformed() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"{{{");
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }
}
