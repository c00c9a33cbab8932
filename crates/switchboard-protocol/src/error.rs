//! Error types for the protocol layer.
//!
//! Every way a message can be rejected before it reaches a handler lives
//! here. The variants are values, not panics: the broker drops the
//! offending message, reports the matching notification code to the
//! sender, and keeps the connection open.

use crate::codes;

/// Errors that can occur in the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The raw input could not be decoded into a JSON object.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The message was null, blank, or an empty object.
    #[error("no message given")]
    NoMessageGiven,

    /// The message claimed the reserved server identity.
    #[error("invalid identity '{0}'")]
    InvalidIdentity(String),

    /// The message carried an identity that is not the sender's.
    #[error("identity '{claimed}' does not match sender '{origin}'")]
    AmbiguousIdentity { claimed: String, origin: String },

    /// A field has the wrong shape (e.g. a non-integer sequence-id).
    #[error("invalid format for '{key}': {reason}")]
    InvalidFormat { key: &'static str, reason: String },

    /// One or more of the five mandatory keys is absent.
    #[error("mandatory key(s) missing: {}", .0.join(", "))]
    MandatoryKeyMissing(Vec<&'static str>),

    /// The message carries a key outside the envelope.
    #[error("key '{0}' is not allowed")]
    DisallowedKey(String),

    /// Serialization failed (turning an envelope into bytes).
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// The notification code reported to the sender for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::MalformedMessage(_) | Self::Encode(_) => codes::MALFORMED_MESSAGE,
            Self::NoMessageGiven => codes::NO_MESSAGE_GIVEN,
            Self::InvalidIdentity(_) => codes::INVALID_IDENTITY,
            Self::AmbiguousIdentity { .. } => codes::AMBIGUOUS_IDENTITY,
            Self::InvalidFormat { .. } => codes::INVALID_FORMAT,
            Self::MandatoryKeyMissing(_) => codes::MANDATORY_KEY_MISSING,
            Self::DisallowedKey(_) => codes::DISALLOWED_KEY,
        }
    }
}
