//! Replicated object configuration.

use crate::{types::NodeId, Result};
use vesper_core::{config::ClusterConfig, ChannelId};

/// Channel layout shared by all replicated objects of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectConfig {
    /// Prefix of the broadcast channels, `/cluster/objects` by default
    pub objects_channel_prefix: String,
    /// Prefix of the point-to-point channels, `/service` by default
    pub service_channel_prefix: String,
}

impl ObjectConfig {
    /// Broadcast channel of the object called `name`.
    pub fn broadcast_channel(&self, name: &str) -> Result<ChannelId> {
        Ok(ChannelId::parse(format!("{}/{name}", self.objects_channel_prefix))?)
    }

    /// Point-to-point channel of the object called `name`.
    pub fn service_channel(&self, name: &str) -> Result<ChannelId> {
        Ok(ChannelId::parse(format!(
            "{}{}/{name}",
            self.service_channel_prefix, self.objects_channel_prefix
        ))?)
    }
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

impl From<&ClusterConfig> for ObjectConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            objects_channel_prefix: config.objects_channel_prefix.clone(),
            service_channel_prefix: config.service_channel_prefix.clone(),
        }
    }
}

/// The local node id: the configured URL, or a generated id.
pub fn local_node(config: &ClusterConfig) -> NodeId {
    config.node_url.as_deref().map_or_else(NodeId::generate, NodeId::new)
}
