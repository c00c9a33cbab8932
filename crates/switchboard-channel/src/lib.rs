//! Channel subscription engine for Switchboard.
//!
//! A channel is a named fan-out group. Clients subscribe (optionally
//! creating the channel on the fly), publish through the broker, and
//! unsubscribe one channel at a time or all at once with the `all`
//! shortcut. Two system channels always exist:
//!
//! - `broadcast`: senders do not hear their own messages
//! - `broadcast-bounce`: every subscriber, sender included, hears them
//!
//! # Key types
//!
//! - [`ChannelBroker`]: owns every channel and every subscription
//! - [`Subscription`] / [`SubscriptionToken`]: one (client, channel) entry
//! - [`SubscribeOptions`]: `bounce` and `create_lazy`
//!
//! The broker is bookkeeping only; it never touches a connection. Fan-out
//! goes through a caller-supplied delivery closure (see
//! [`ChannelBroker::publish`]).

mod broker;
mod error;

pub use broker::{
    ChannelBroker, Destroyed, PublishReport, SubscribeOptions, Subscription,
    SubscriptionToken,
};
pub use error::ChannelError;
