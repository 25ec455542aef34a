//! Broker configuration.

use serde::{Deserialize, Serialize};
use vesper_core::config::{AckConfig, VesperConfig};

/// Configuration for a broker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Acknowledged delivery settings
    pub ack: AckConfig,

    /// Install the acknowledged delivery extension, letting clients opt in
    /// at handshake
    pub acknowledgement_enabled: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { ack: AckConfig::default(), acknowledgement_enabled: true }
    }
}

impl From<&VesperConfig> for BrokerConfig {
    fn from(config: &VesperConfig) -> Self {
        Self { ack: config.ack.clone(), ..Self::default() }
    }
}
