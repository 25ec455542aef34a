//! # Broker Error Handling

use thiserror::Error;
use vesper_core::SessionId;

/// Broker-specific error types
#[derive(Error, Debug)]
pub enum Error {
    /// Errors raised by core types (channel parsing, queue growth, configuration)
    #[error(transparent)]
    Core(#[from] vesper_core::Error),

    /// A message referenced a session that does not exist
    #[error("Unknown session '{id}'")]
    UnknownSession {
        /// The session id carried by the message
        id: SessionId,
    },

    /// A message is not acceptable on the channel it was sent to
    #[error("Invalid message on {channel}: {reason}")]
    InvalidMessage {
        /// Channel of the rejected message
        channel: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid message error
    pub fn invalid_message<C: std::fmt::Display, R: Into<String>>(channel: C, reason: R) -> Self {
        Self::InvalidMessage { channel: channel.to_string(), reason: reason.into() }
    }

    /// Whether the error is caused by the caller rather than broker state
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::Core(core) => core.is_structural(),
            Self::UnknownSession { .. } | Self::InvalidMessage { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_convert() {
        let err: Error = vesper_core::Error::CapacityExceeded { capacity: 4 }.into();
        assert!(err.is_client_error());
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_unknown_session_display() {
        let err = Error::UnknownSession { id: SessionId::from("abc") };
        assert_eq!(err.to_string(), "Unknown session 'abc'");
    }
}
