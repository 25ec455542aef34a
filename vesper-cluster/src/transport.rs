//! Cluster transport capability set.
//!
//! The replicated object layer never talks to the network directly. It needs
//! a way to broadcast to every node, to send to one node, and to be told
//! about incoming messages and membership changes. Implementations bridge
//! these to a real inter-node link; [`MockCluster`](crate::test_utils::MockCluster)
//! keeps everything in memory.

use crate::{
    types::{ListenerId, NodeId},
    Result,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use vesper_core::ChannelId;

/// Receives messages arriving from other nodes.
///
/// Called on the transport's delivery thread; implementations should hand
/// the message off rather than process it in place.
pub trait MessageListener: Send + Sync {
    /// A message from `from` arrived on `channel`
    fn on_message(&self, from: &NodeId, channel: &ChannelId, data: &Value);
}

/// Receives cluster membership changes.
pub trait MembershipListener: Send + Sync {
    /// `node` joined the cluster
    fn node_joined(&self, node: &NodeId);

    /// `node` left the cluster
    fn node_left(&self, node: &NodeId);
}

/// Inter-node messaging used by replicated objects.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Id of the node this transport belongs to
    fn local_node(&self) -> &NodeId;

    /// Nodes currently known to be part of the cluster, excluding this one
    fn members(&self) -> Vec<NodeId>;

    /// Listen for messages on a channel or channel pattern
    fn add_message_listener(&self, channel: ChannelId, listener: Arc<dyn MessageListener>) -> ListenerId;

    /// Stop listening. Returns `false` if the id was unknown.
    fn remove_message_listener(&self, id: ListenerId) -> bool;

    /// Listen for membership changes
    fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>) -> ListenerId;

    /// Stop listening for membership changes
    fn remove_membership_listener(&self, id: ListenerId) -> bool;

    /// Send `data` to every other node on `channel`
    async fn broadcast(&self, channel: &ChannelId, data: Value) -> Result<()>;

    /// Send `data` to one node on `channel`
    async fn send(&self, to: &NodeId, channel: &ChannelId, data: Value) -> Result<()>;
}
