//! # Cluster Error Handling

use thiserror::Error;

/// Cluster-specific error types
#[derive(Error, Debug)]
pub enum Error {
    /// Errors raised by core types
    #[error(transparent)]
    Core(#[from] vesper_core::Error),

    /// Inter-node communication failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// A replicated object's processor is no longer running
    #[error("Replicated object '{name}' is stopped")]
    Stopped {
        /// Name of the object
        name: String,
    },

    /// A part value could not be converted to or from its wire form
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a transport error
    pub fn transport<T: std::fmt::Display>(message: T) -> Self {
        Self::Transport(message.to_string())
    }

    /// Check if the error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::transport("connection reset").is_retryable());
        assert!(!Error::Stopped { name: "counter".to_string() }.is_retryable());
        let core: Error = vesper_core::Error::NullValue { name: "counter".to_string() }.into();
        assert!(!core.is_retryable());
        assert!(core.to_string().contains("counter"));
    }
}
