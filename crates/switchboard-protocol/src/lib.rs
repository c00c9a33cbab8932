//! Wire protocol for Switchboard.
//!
//! This crate defines the language clients and the broker speak:
//!
//! - **Types** ([`Envelope`], [`ClientId`], [`SequenceId`],
//!   [`DispatchContext`], [`Receiver`]): the five-field envelope and the
//!   values that travel alongside it inside the broker.
//! - **Normalization** ([`normalize`]): turns anything a client (or a
//!   handler) hands us into a canonical envelope, or says exactly why not.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): envelopes to bytes.
//! - **Notifications** ([`codes`], [`Templates`], [`NotifyKind`]): the
//!   stable numeric codes the broker reports outcomes with.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (client identity)
//! ```
//!
//! Nothing in here knows about connections, channels or handlers.

mod codec;
mod error;
mod normalize;
mod notification;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use normalize::{RawMessage, normalize};
pub use notification::{NotifyKind, Templates, codes};
pub use types::{
    ALL_CHANNELS, BROADCAST, BROADCAST_BOUNCE, ClientId, DispatchContext,
    Envelope, MANDATORY_KEYS, NOTIFY_METHOD, PROTOCOL_VERSION, Receiver,
    SEQUENCE_NONE, SERVER_IDENTITY, SequenceId, UNIVERSAL_MODULE,
};
