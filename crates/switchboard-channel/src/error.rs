//! Error types for the channel layer.

use switchboard_protocol::{ClientId, codes};

/// Errors that can occur during channel operations.
///
/// Every variant is a refusal: the operation it came from changed nothing
/// for that channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel does not exist.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// `create` on a name that is already a channel.
    #[error("channel '{0}' already exists")]
    AlreadyExists(String),

    /// A system channel cannot be created or destroyed by clients.
    #[error("channel '{0}' is reserved")]
    Reserved(String),

    /// The `all` shortcut used anywhere but unsubscribe.
    #[error("'{0}' is only valid for unsubscribe")]
    ShortcutNotAllowed(String),

    /// Empty or blank channel name.
    #[error("invalid channel name '{0}'")]
    InvalidName(String),

    /// Second subscribe without an unsubscribe in between.
    #[error("{identity} is already subscribed to '{channel}'")]
    AlreadySubscribed { identity: ClientId, channel: String },

    /// Unsubscribe from a channel the client is not on.
    #[error("{identity} is not subscribed to '{channel}'")]
    NotSubscribed { identity: ClientId, channel: String },
}

impl ChannelError {
    /// The channel name the error is about.
    pub fn channel(&self) -> &str {
        match self {
            Self::UnknownChannel(c)
            | Self::AlreadyExists(c)
            | Self::Reserved(c)
            | Self::ShortcutNotAllowed(c)
            | Self::InvalidName(c) => c,
            Self::AlreadySubscribed { channel, .. }
            | Self::NotSubscribed { channel, .. } => channel,
        }
    }

    /// The notification code reported to the requester.
    pub fn code(&self) -> u16 {
        match self {
            Self::UnknownChannel(_) => codes::UNKNOWN_CHANNEL,
            Self::AlreadyExists(_) => codes::CHANNEL_EXISTS,
            Self::Reserved(_) => codes::RESERVED_CHANNEL,
            Self::ShortcutNotAllowed(_) => codes::SHORTCUT_NOT_ALLOWED,
            Self::InvalidName(_) => codes::INVALID_CHANNEL_NAME,
            Self::AlreadySubscribed { .. } => codes::ALREADY_SUBSCRIBED,
            Self::NotSubscribed { .. } => codes::NOT_SUBSCRIBED,
        }
    }
}
