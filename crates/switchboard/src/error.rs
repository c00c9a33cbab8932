//! Error types for the Switchboard meta-crate.

use switchboard_channel::ChannelError;
use switchboard_protocol::{ClientId, ProtocolError};
use switchboard_registry::RegistrationError;
use switchboard_session::SessionError;
use switchboard_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SwitchboardError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (malformed or non-canonical message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (module assignment, unknown client).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A channel-level error (unknown, reserved, already subscribed).
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A handler was rejected at registration.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The broker core could not serve a request.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The connection never completed its opening frame.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Errors returned by [`BrokerHandle`](crate::BrokerHandle) calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The core task has stopped; its command channel is closed.
    #[error("broker is not running")]
    Unavailable,

    /// A relayed message failed normalization.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A relay targeted a channel that does not exist.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A module operation was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A relay targeted an identity nobody is bound to.
    #[error("unknown client '{0}'")]
    UnknownClient(ClientId),
}

/// What a handler entry point returns on failure.
///
/// Any variant makes the dispatcher report a handler failure to the
/// caller. Other handlers serving the same request still run.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request's params did not have the expected shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A broker call made by the handler failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Anything else the handler wants to report.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let sb_err: SwitchboardError = err.into();
        assert!(matches!(sb_err, SwitchboardError::Transport(_)));
        assert!(sb_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let sb_err: SwitchboardError = ProtocolError::NoMessageGiven.into();
        assert!(matches!(sb_err, SwitchboardError::Protocol(_)));
    }

    #[test]
    fn test_from_channel_error() {
        let sb_err: SwitchboardError = ChannelError::UnknownChannel("x".into()).into();
        assert!(matches!(sb_err, SwitchboardError::Channel(_)));
        assert_eq!(sb_err.to_string(), "unknown channel 'x'");
    }

    #[test]
    fn test_from_broker_error() {
        let sb_err: SwitchboardError = BrokerError::Unavailable.into();
        assert!(matches!(sb_err, SwitchboardError::Broker(_)));
    }

    #[test]
    fn test_handler_error_from_bad_json_is_invalid_params() {
        let err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let handler_err: HandlerError = err.into();
        assert!(matches!(handler_err, HandlerError::InvalidParams(_)));
    }
}
