//! The channel broker: channels, subscriptions, and fan-out.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use switchboard_protocol::{ALL_CHANNELS, BROADCAST, BROADCAST_BOUNCE, ClientId};

use crate::ChannelError;

/// Opaque handle for one subscription. 32 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionToken(String);

impl SubscriptionToken {
    fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for [`ChannelBroker::subscribe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Also deliver this subscriber's own messages back to it.
    #[serde(default)]
    pub bounce: bool,
    /// Create the channel if it does not exist yet.
    #[serde(default)]
    pub create_lazy: bool,
}

impl SubscribeOptions {
    pub fn bounce() -> Self {
        Self {
            bounce: true,
            ..Self::default()
        }
    }

    pub fn lazy() -> Self {
        Self {
            create_lazy: true,
            ..Self::default()
        }
    }
}

/// One (client, channel) subscription entry.
///
/// The bounce preference belongs to the subscription, not to messages: it
/// decides whether *this subscriber* hears what it publishes itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub identity: ClientId,
    pub channel: String,
    pub token: SubscriptionToken,
    pub bounce: bool,
}

impl Subscription {
    /// Delivery rule: everybody else always, yourself only with bounce.
    pub fn accepts_from(&self, origin: &ClientId) -> bool {
        self.identity != *origin || self.bounce
    }
}

/// Outcome of [`ChannelBroker::destroy`].
#[derive(Debug, Default)]
pub struct Destroyed {
    /// Subscriptions force-removed before any channel was dropped, in
    /// the order they were removed.
    pub forced: Vec<Subscription>,
    /// Per requested name: the destroyed channel, or why not.
    pub results: Vec<Result<String, ChannelError>>,
}

/// Outcome of [`ChannelBroker::publish`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the message was handed to successfully.
    pub delivered: usize,
    /// Subscribers whose delivery failed. Did not stop the rest.
    pub failed: usize,
    /// Subscribers skipped by the bounce rule.
    pub skipped: usize,
}

/// A channel's subscriber list, in subscription order.
#[derive(Debug, Default)]
struct Channel {
    subscribers: Vec<Subscription>,
}

/// Owns every channel and every subscription.
///
/// Two indexes are kept in sync:
/// - `channels`: name → ordered subscriber entries (for fan-out)
/// - `by_client`: identity → channel → token (for "what am I on" and
///   the `all` shortcut)
///
/// Invariant: an entry exists in one index iff it exists in the other, and
/// a (client, channel) pair appears at most once.
#[derive(Debug)]
pub struct ChannelBroker {
    channels: HashMap<String, Channel>,
    by_client: HashMap<ClientId, BTreeMap<String, SubscriptionToken>>,
}

impl ChannelBroker {
    /// Creates a broker holding only the system channels.
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        channels.insert(BROADCAST.to_owned(), Channel::default());
        channels.insert(BROADCAST_BOUNCE.to_owned(), Channel::default());
        Self {
            channels,
            by_client: HashMap::new(),
        }
    }

    /// `true` for names clients may never create or destroy.
    pub fn is_reserved(name: &str) -> bool {
        matches!(name, BROADCAST | BROADCAST_BOUNCE | ALL_CHANNELS)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Creates each named channel. No silent idempotence: an existing
    /// channel is an error for that name.
    pub fn create<I, S>(&mut self, names: I) -> Vec<Result<String, ChannelError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                check_creatable(name)?;
                if self.channels.contains_key(name) {
                    return Err(ChannelError::AlreadyExists(name.to_owned()));
                }
                self.channels.insert(name.to_owned(), Channel::default());
                tracing::info!(channel = name, "channel created");
                Ok(name.to_owned())
            })
            .collect()
    }

    /// Destroys each named channel.
    ///
    /// First every subscriber of every destroyable named channel is
    /// force-unsubscribed from it, so no token outlives its channel. Then
    /// each name is checked and removed. Reserved and unknown names are
    /// reported as errors and their subscribers are left alone.
    pub fn destroy<I, S>(&mut self, names: I) -> Destroyed
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();
        let mut outcome = Destroyed::default();

        for name in &names {
            if Self::is_reserved(name) {
                continue;
            }
            let Some(channel) = self.channels.get(name) else {
                continue;
            };
            let subscribers: Vec<ClientId> =
                channel.subscribers.iter().map(|s| s.identity.clone()).collect();
            for identity in subscribers {
                if let Ok(sub) = self.detach(&identity, name) {
                    outcome.forced.push(sub);
                }
            }
        }

        for name in names {
            let result = if name.trim().is_empty() {
                Err(ChannelError::InvalidName(name))
            } else if name == ALL_CHANNELS {
                Err(ChannelError::ShortcutNotAllowed(name))
            } else if Self::is_reserved(&name) {
                Err(ChannelError::Reserved(name))
            } else if self.channels.remove(&name).is_none() {
                Err(ChannelError::UnknownChannel(name))
            } else {
                tracing::info!(channel = %name, "channel destroyed");
                Ok(name)
            };
            outcome.results.push(result);
        }

        outcome
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Subscribes `identity` to each named channel.
    ///
    /// Per name: the `all` shortcut, an existing subscription, or a missing
    /// channel (without `create_lazy`) is an error for that name only.
    pub fn subscribe<I, S>(
        &mut self,
        identity: &ClientId,
        names: I,
        options: SubscribeOptions,
    ) -> Vec<Result<Subscription, ChannelError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| self.subscribe_one(identity, name.as_ref(), options))
            .collect()
    }

    fn subscribe_one(
        &mut self,
        identity: &ClientId,
        name: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, ChannelError> {
        if name == ALL_CHANNELS {
            return Err(ChannelError::ShortcutNotAllowed(name.to_owned()));
        }
        if name.trim().is_empty() {
            return Err(ChannelError::InvalidName(name.to_owned()));
        }
        if self.is_subscribed(identity, name) {
            return Err(ChannelError::AlreadySubscribed {
                identity: identity.clone(),
                channel: name.to_owned(),
            });
        }
        if !self.channels.contains_key(name) {
            if !options.create_lazy {
                return Err(ChannelError::UnknownChannel(name.to_owned()));
            }
            self.channels.insert(name.to_owned(), Channel::default());
            tracing::info!(channel = name, %identity, "channel created lazily");
        }

        let subscription = Subscription {
            identity: identity.clone(),
            channel: name.to_owned(),
            token: SubscriptionToken::generate(),
            bounce: options.bounce,
        };
        self.by_client
            .entry(identity.clone())
            .or_default()
            .insert(name.to_owned(), subscription.token.clone());
        if let Some(channel) = self.channels.get_mut(name) {
            channel.subscribers.push(subscription.clone());
        }

        tracing::debug!(channel = name, %identity, bounce = options.bounce, "subscribed");
        Ok(subscription)
    }

    /// Unsubscribes `identity` from each named channel. `all` expands to
    /// every channel the identity is currently on.
    pub fn unsubscribe<I, S>(
        &mut self,
        identity: &ClientId,
        names: I,
    ) -> Vec<Result<Subscription, ChannelError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut expanded: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if name == ALL_CHANNELS {
                for held in self.subscriptions(identity) {
                    if !expanded.contains(&held) {
                        expanded.push(held);
                    }
                }
            } else if !expanded.iter().any(|n| n == name) {
                expanded.push(name.to_owned());
            }
        }

        expanded
            .into_iter()
            .map(|name| self.detach(identity, &name))
            .collect()
    }

    /// Removes one subscription from both indexes.
    fn detach(&mut self, identity: &ClientId, name: &str) -> Result<Subscription, ChannelError> {
        let not_subscribed = || ChannelError::NotSubscribed {
            identity: identity.clone(),
            channel: name.to_owned(),
        };

        let held = self.by_client.get_mut(identity).ok_or_else(not_subscribed)?;
        held.remove(name).ok_or_else(not_subscribed)?;
        if held.is_empty() {
            self.by_client.remove(identity);
        }

        let channel = self.channels.get_mut(name).ok_or_else(not_subscribed)?;
        let index = channel
            .subscribers
            .iter()
            .position(|s| s.identity == *identity)
            .ok_or_else(not_subscribed)?;
        let subscription = channel.subscribers.remove(index);

        tracing::debug!(channel = name, %identity, "unsubscribed");
        Ok(subscription)
    }

    // ---------------------------------------------------------------------
    // Fan-out
    // ---------------------------------------------------------------------

    /// Hands a message published by `origin` to every eligible subscriber
    /// of `channel`, in subscription order.
    ///
    /// `deliver` returns `false` when a push failed; that subscriber is
    /// counted and the loop carries on.
    ///
    /// # Errors
    /// [`ChannelError::UnknownChannel`] if the channel does not exist.
    pub fn publish<F>(
        &self,
        channel: &str,
        origin: &ClientId,
        mut deliver: F,
    ) -> Result<PublishReport, ChannelError>
    where
        F: FnMut(&Subscription) -> bool,
    {
        let entry = self
            .channels
            .get(channel)
            .ok_or_else(|| ChannelError::UnknownChannel(channel.to_owned()))?;

        let mut report = PublishReport::default();
        for subscriber in &entry.subscribers {
            if !subscriber.accepts_from(origin) {
                report.skipped += 1;
            } else if deliver(subscriber) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                tracing::debug!(
                    channel,
                    subscriber = %subscriber.identity,
                    "delivery failed"
                );
            }
        }
        Ok(report)
    }

    /// Identities that would receive a message from `origin` on `channel`.
    pub fn recipients(
        &self,
        channel: &str,
        origin: &ClientId,
    ) -> Result<Vec<ClientId>, ChannelError> {
        let mut out = Vec::new();
        self.publish(channel, origin, |s| {
            out.push(s.identity.clone());
            true
        })?;
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn exists(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn is_subscribed(&self, identity: &ClientId, channel: &str) -> bool {
        self.by_client
            .get(identity)
            .is_some_and(|held| held.contains_key(channel))
    }

    /// Subscribers of `channel` in subscription order.
    pub fn subscribers(&self, channel: &str) -> Option<Vec<ClientId>> {
        self.channels
            .get(channel)
            .map(|c| c.subscribers.iter().map(|s| s.identity.clone()).collect())
    }

    /// Channels `identity` is subscribed to, sorted by name.
    pub fn subscriptions(&self, identity: &ClientId) -> Vec<String> {
        self.by_client
            .get(identity)
            .map(|held| held.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The token of `identity`'s subscription to `channel`.
    pub fn token(&self, identity: &ClientId, channel: &str) -> Option<&SubscriptionToken> {
        self.by_client.get(identity)?.get(channel)
    }

    /// Number of channels, system channels included.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_creatable(name: &str) -> Result<(), ChannelError> {
    if name.trim().is_empty() {
        Err(ChannelError::InvalidName(name.to_owned()))
    } else if name == ALL_CHANNELS {
        Err(ChannelError::ShortcutNotAllowed(name.to_owned()))
    } else if ChannelBroker::is_reserved(name) {
        Err(ChannelError::Reserved(name.to_owned()))
    } else {
        Ok(())
    }
}
