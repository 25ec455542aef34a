//! Configuration schema definitions for Vesper
//!
//! All structures are plain serde types. Every section has defaults, so a
//! configuration file only needs to name the values it changes.

use serde::{Deserialize, Serialize};

/// Root configuration object.
///
/// Loaded in layers: defaults, then a TOML file, then environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VesperConfig {
    /// Log output settings
    pub logging: LoggingConfig,

    /// Acknowledged-delivery settings
    pub ack: AckConfig,

    /// Replicated object settings
    pub cluster: ClusterConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter directive, in `EnvFilter` syntax (`info`, `vesper_broker=debug`)
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, single line
    #[default]
    Text,
    /// Newline-delimited JSON objects
    Json,
}

/// Acknowledged-delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    /// Maximum number of unacknowledged messages held per session.
    ///
    /// `None` means unbounded.
    pub max_queue_size: Option<usize>,

    /// Initial capacity of the per-session unacknowledged queue
    pub initial_capacity: usize,
}

/// Replicated object configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// URL identifying the local node. Generated when absent.
    pub node_url: Option<String>,

    /// Prefix of broadcast channels carrying object parts
    pub objects_channel_prefix: String,

    /// Prefix prepended to the objects channel for point-to-point pushes
    pub service_channel_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

impl Default for AckConfig {
    fn default() -> Self {
        Self { max_queue_size: None, initial_capacity: 16 }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_url: None,
            objects_channel_prefix: "/cluster/objects".to_string(),
            service_channel_prefix: "/service".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: VesperConfig = toml::from_str(
            r#"
            [ack]
            max_queue_size = 128
            "#,
        )
        .unwrap();

        assert_eq!(config.ack.max_queue_size, Some(128));
        assert_eq!(config.ack.initial_capacity, 16);
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.cluster.service_channel_prefix, "/service");
    }

    #[test]
    fn test_log_format_lowercase() {
        let config: LoggingConfig = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }
}
