//! Error types for the core library.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::outbox::SendError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote mail gateway failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Submitting or canceling a send failed.
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if repeating the failed operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_transient(),
            Self::Send(e) => e.is_retryable(),
            Self::Serde(_) | Self::Io(_) | Self::Config(_) => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_follows_gateway_classification() {
        assert!(Error::from(GatewayError::Network("reset".into())).is_retryable());
        assert!(Error::from(SendError::Gateway(GatewayError::Network("reset".into()))).is_retryable());
        assert!(!Error::from(SendError::Final(GatewayError::NotFound("ob-1".into()))).is_retryable());
        assert!(!Error::Config("missing url".into()).is_retryable());
    }
}
