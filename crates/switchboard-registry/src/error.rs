//! Registration errors.

use switchboard_protocol::codes;

/// Why a handler was not registered. Registration never panics; the
/// handler is simply skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The descriptor is missing a field or carries an empty entry.
    #[error("invalid descriptor for '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },

    /// This exact handler instance is already registered.
    #[error("handler '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Another handler with the same name and version serves an
    /// overlapping module.
    #[error("handler '{name}' v{version} already serves module '{module}'")]
    Duplicate {
        name: String,
        version: String,
        module: String,
    },
}

impl RegistrationError {
    pub fn name(&self) -> &str {
        match self {
            Self::InvalidDescriptor { name, .. }
            | Self::AlreadyRegistered { name }
            | Self::Duplicate { name, .. } => name,
        }
    }

    /// The notification code reported for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidDescriptor { .. } => codes::INVALID_HANDLER,
            Self::AlreadyRegistered { .. } | Self::Duplicate { .. } => {
                codes::DUPLICATE_HANDLER
            }
        }
    }
}
