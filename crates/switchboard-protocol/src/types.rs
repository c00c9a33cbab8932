//! Core protocol types for Switchboard's wire format.
//!
//! Every message on the wire is a flat JSON object with exactly five keys:
//!
//! ```text
//! {
//!   "identity":    "alice",          ← who the message is from
//!   "method":      "subscribe",      ← what to do
//!   "params":      {...},            ← arguments (any JSON)
//!   "sequence-id": 17 | "none",      ← correlation token
//!   "version":     "1.0"             ← protocol version for handler lookup
//! }
//! ```

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Reserved names
// ---------------------------------------------------------------------------

/// The protocol version assumed when a message does not carry one.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Identity used for every broker-originated message. Never accepted from
/// a connection.
pub const SERVER_IDENTITY: &str = "server";

/// Plain broadcast channel. Senders do not hear their own messages unless
/// their subscription bounces.
pub const BROADCAST: &str = "broadcast";

/// Broadcast channel every client joins with bounce enabled.
pub const BROADCAST_BOUNCE: &str = "broadcast-bounce";

/// Shortcut meaning "every channel I am subscribed to". Unsubscribe only.
pub const ALL_CHANNELS: &str = "all";

/// Wire spelling of [`SequenceId::None`].
pub const SEQUENCE_NONE: &str = "none";

/// Method tag carried by broker notifications.
pub const NOTIFY_METHOD: &str = "notify";

/// Capability every client implicitly satisfies.
pub const UNIVERSAL_MODULE: &str = "core";

/// The five keys of a canonical envelope, in the order they are checked.
pub const MANDATORY_KEYS: [&str; 5] =
    ["identity", "method", "params", "sequence-id", "version"];

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// A client identity: either picked by the client or allocated by the
/// broker (`anonymous-N`).
///
/// Serialized as a bare string.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps a raw identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved broker identity.
    pub fn server() -> Self {
        Self(SERVER_IDENTITY.to_owned())
    }

    /// Returns `true` for the reserved broker identity.
    pub fn is_server(&self) -> bool {
        self.0 == SERVER_IDENTITY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// SequenceId
// ---------------------------------------------------------------------------

/// Correlation token a client attaches to a request so it can match the
/// broker's replies. Either an integer or the sentinel `"none"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SequenceId {
    Id(i64),
    #[default]
    None,
}

impl Serialize for SequenceId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Id(id) => s.serialize_i64(*id),
            Self::None => s.serialize_str(SEQUENCE_NONE),
        }
    }
}

impl<'de> Deserialize<'de> for SequenceId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct SequenceVisitor;

        impl Visitor<'_> for SequenceVisitor {
            type Value = SequenceId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "an integer or \"{SEQUENCE_NONE}\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<SequenceId, E> {
                Ok(SequenceId::Id(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<SequenceId, E> {
                i64::try_from(v)
                    .map(SequenceId::Id)
                    .map_err(|_| E::custom("sequence-id out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SequenceId, E> {
                if v == SEQUENCE_NONE {
                    Ok(SequenceId::None)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        d.deserialize_any(SequenceVisitor)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The canonical five-field message unit.
///
/// Only [`normalize`](crate::normalize) should produce one from untrusted
/// input; the derive-based `Deserialize` exists for clients and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub identity: ClientId,
    pub method: String,
    pub params: serde_json::Value,
    #[serde(rename = "sequence-id")]
    pub sequence_id: SequenceId,
    pub version: String,
}

// ---------------------------------------------------------------------------
// DispatchContext
// ---------------------------------------------------------------------------

/// The request a piece of broker work is serving.
///
/// Every relay stamps the context's sequence-id onto the outbound message,
/// so replies and error notifications correlate with the request that
/// caused them. Passed by value through every call that can relay; there
/// is no ambient "current request".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Who sent the request.
    pub origin: ClientId,
    /// The method being dispatched.
    pub method: String,
    /// The request's correlation token.
    pub sequence_id: SequenceId,
}

impl DispatchContext {
    pub fn new(origin: ClientId, method: impl Into<String>, sequence_id: SequenceId) -> Self {
        Self {
            origin,
            method: method.into(),
            sequence_id,
        }
    }

    /// Context for broker-initiated work that answers no request.
    pub fn system() -> Self {
        Self::new(ClientId::server(), NOTIFY_METHOD, SequenceId::None)
    }

    /// Context derived from an already-normalized envelope.
    pub fn for_envelope(envelope: &Envelope) -> Self {
        Self::new(
            envelope.identity.clone(),
            envelope.method.clone(),
            envelope.sequence_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Where a relayed message goes: one client's connection, or every
/// eligible subscriber of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Receiver {
    Client(ClientId),
    Channel(String),
}

impl Receiver {
    pub fn client(id: impl Into<String>) -> Self {
        Self::Client(ClientId::new(id))
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self::Channel(name.into())
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Channel(name) => write!(f, "channel:{name}"),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
