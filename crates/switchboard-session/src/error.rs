//! Error types for the session layer.

use switchboard_protocol::{ClientId, codes};

/// Errors that can occur while managing identities and module assignments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A module name was empty or whitespace.
    #[error("invalid module name '{0}'")]
    InvalidModule(String),

    /// Tried to remove a module the client does not hold.
    #[error("module '{module}' is not assigned to {identity}")]
    ModuleNotAssigned { identity: ClientId, module: String },

    /// No client is bound under this identity.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
}

impl SessionError {
    /// The notification code reported to the requester.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidModule(_) => codes::INVALID_MODULE,
            Self::ModuleNotAssigned { .. } => codes::MODULE_NOT_ASSIGNED,
            Self::UnknownClient(_) => codes::UNKNOWN_CLIENT,
        }
    }
}
