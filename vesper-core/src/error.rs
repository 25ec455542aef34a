//! Error types for the Vesper core library.

use thiserror::Error;

/// Main error type for Vesper core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A channel name or pattern could not be parsed
    #[error("Invalid channel name '{name}': {reason}")]
    InvalidChannelName {
        /// The offending channel name
        name: String,
        /// Why the name was rejected
        reason: String,
    },

    /// Declared parameter names do not match the parameters of a channel template
    #[error("Parameter count mismatch for {channel}: declared {declared:?}, template has {expected:?}")]
    ParameterCountMismatch {
        /// The template channel being registered
        channel: String,
        /// Parameter names supplied by the registering caller
        declared: Vec<String>,
        /// Parameter names found in the template
        expected: Vec<String>,
    },

    /// Attempt to share a null value
    #[error("Null value cannot be shared by '{name}'")]
    NullValue {
        /// Name of the entity that rejected the value
        name: String,
    },

    /// A growable structure could not double its capacity
    #[error("Capacity exceeded: cannot grow beyond {capacity} elements")]
    CapacityExceeded {
        /// Capacity at the time growth was attempted
        capacity: usize,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Standard I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Vesper operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid channel name error
    pub fn invalid_channel<N: Into<String>, R: std::fmt::Display>(name: N, reason: R) -> Self {
        Self::InvalidChannelName { name: name.into(), reason: reason.to_string() }
    }

    /// Create a configuration error
    pub fn configuration<T: std::fmt::Display>(message: T) -> Self {
        Self::Configuration(message.to_string())
    }

    /// Whether this error is a programming or configuration mistake that the
    /// caller must fix, as opposed to a runtime condition.
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidChannelName { .. }
                | Self::ParameterCountMismatch { .. }
                | Self::NullValue { .. }
                | Self::CapacityExceeded { .. }
                | Self::Configuration(_)
        )
    }

    /// Get the error category for logging
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidChannelName { .. } | Self::ParameterCountMismatch { .. } => "channel",
            Self::NullValue { .. } => "value",
            Self::CapacityExceeded { .. } => "resources",
            Self::Configuration(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(Error::invalid_channel("foo", "must start with '/'").is_structural());
        assert!(Error::CapacityExceeded { capacity: 8 }.is_structural());
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!io.is_structural());
        assert_eq!(io.category(), "io");
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::ParameterCountMismatch {
            channel: "/chat/{room}".to_string(),
            declared: vec![],
            expected: vec!["room".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("/chat/{room}"));
        assert!(text.contains("room"));
    }
}
