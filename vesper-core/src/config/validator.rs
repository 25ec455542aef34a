//! # Configuration Validation
//!
//! Validates configuration settings for consistency before they reach the
//! broker or the cluster layer.

use crate::{
    channel::ChannelId,
    config::schema::{AckConfig, ClusterConfig, LoggingConfig, VesperConfig},
    Error, Result,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a configuration
    pub fn validate(config: &VesperConfig) -> Result<()> {
        debug!("Starting configuration validation");

        Self::validate_logging(&config.logging)?;
        Self::validate_ack(&config.ack)?;
        Self::validate_cluster(&config.cluster)?;

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_logging(config: &LoggingConfig) -> Result<()> {
        EnvFilter::try_new(&config.level).map_err(|e| {
            Error::configuration(format!("Invalid log level '{}': {e}", config.level))
        })?;
        Ok(())
    }

    fn validate_ack(config: &AckConfig) -> Result<()> {
        if config.initial_capacity == 0 {
            return Err(Error::configuration("ack.initial_capacity must be greater than 0"));
        }

        match config.max_queue_size {
            Some(0) => {
                return Err(Error::configuration(
                    "ack.max_queue_size must be greater than 0 when set",
                ))
            },
            Some(max) if max < config.initial_capacity => {
                warn!(
                    max_queue_size = max,
                    initial_capacity = config.initial_capacity,
                    "Queue limit is below the initial capacity"
                );
            },
            _ => {},
        }

        Ok(())
    }

    fn validate_cluster(config: &ClusterConfig) -> Result<()> {
        if let Some(url) = &config.node_url {
            if url.trim().is_empty() {
                return Err(Error::configuration("cluster.node_url must not be blank"));
            }
        }

        for (key, prefix) in [
            ("cluster.objects_channel_prefix", &config.objects_channel_prefix),
            ("cluster.service_channel_prefix", &config.service_channel_prefix),
        ] {
            let channel = ChannelId::parse(prefix)
                .map_err(|e| Error::configuration(format!("{key}: {e}")))?;
            if !channel.is_exact() {
                return Err(Error::configuration(format!(
                    "{key} must be a concrete channel, got '{prefix}'"
                )));
            }
        }

        Ok(())
    }
}
