//! # Mock Network Module
//!
//! An in-memory cluster for exercising replicated objects without sockets.
//!
//! Every node gets a [`MockTransport`]. Messages are delivered synchronously
//! on the sending task unless the cluster is holding them, in which case
//! they queue up until [`MockCluster::release`] or
//! [`MockCluster::deliver_pending`] is called. Held messages can also be
//! dropped to simulate loss, and any logged envelope can be redelivered to
//! simulate duplication.
//!
//! ```rust
//! use vesper_cluster::test_utils::MockCluster;
//!
//! let cluster = MockCluster::new();
//! let a = cluster.node("http://a/cometd");
//! let b = cluster.node("http://b/cometd");
//! cluster.join(a.local_node_id());
//! cluster.join(b.local_node_id());
//! assert_eq!(cluster.members().len(), 2);
//! ```

use crate::{
    transport::{ClusterTransport, MembershipListener, MessageListener},
    types::{ListenerId, NodeId},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::Arc,
};
use tracing::trace;
use vesper_core::ChannelId;

/// A message travelling between two mock nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sending node
    pub from: NodeId,
    /// Receiving node
    pub to: NodeId,
    /// Channel the message was sent on
    pub channel: ChannelId,
    /// Payload
    pub data: Value,
}

#[derive(Default)]
struct NodeEntry {
    joined: bool,
    message_listeners: Vec<(ListenerId, ChannelId, Arc<dyn MessageListener>)>,
    membership_listeners: Vec<(ListenerId, Arc<dyn MembershipListener>)>,
}

#[derive(Default)]
struct NetworkState {
    nodes: BTreeMap<NodeId, NodeEntry>,
    holding: bool,
    pending: VecDeque<Envelope>,
    log: Vec<Envelope>,
    sent: usize,
}

enum Membership {
    Joined,
    Left,
}

/// Shared in-memory network. Cloning yields another handle to the same
/// network.
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<NetworkState>>,
}

impl MockCluster {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached node. It sees no traffic until it [`join`](Self::join)s.
    pub fn node(&self, url: impl AsRef<str>) -> Arc<MockTransport> {
        let node = NodeId::new(url);
        self.state.lock().nodes.entry(node.clone()).or_default();
        Arc::new(MockTransport { node, cluster: self.clone() })
    }

    /// Add a node to the cluster, announcing it to every member and every
    /// member to it.
    pub fn join(&self, node: &NodeId) {
        let events = {
            let mut state = self.state.lock();
            let Some(entry) = state.nodes.get_mut(node) else {
                return;
            };
            if entry.joined {
                return;
            }
            entry.joined = true;
            Self::membership_events(&state, node)
        };
        trace!(node = %node, "Mock node joined");
        Self::dispatch_membership(events, Membership::Joined);
    }

    /// Remove a node from the cluster, notifying both sides.
    pub fn leave(&self, node: &NodeId) {
        let events = {
            let mut state = self.state.lock();
            let events = Self::membership_events(&state, node);
            match state.nodes.get_mut(node) {
                Some(entry) if entry.joined => entry.joined = false,
                _ => return,
            }
            state.pending.retain(|envelope| envelope.from != *node && envelope.to != *node);
            events
        };
        trace!(node = %node, "Mock node left");
        Self::dispatch_membership(events, Membership::Left);
    }

    /// Ids of the joined nodes
    pub fn members(&self) -> Vec<NodeId> {
        let state = self.state.lock();
        state.nodes.iter().filter(|(_, entry)| entry.joined).map(|(id, _)| id.clone()).collect()
    }

    /// Queue messages instead of delivering them
    pub fn hold(&self) {
        self.state.lock().holding = true;
    }

    /// Stop holding and deliver everything queued
    pub fn release(&self) {
        self.state.lock().holding = false;
        self.deliver_pending();
    }

    /// Deliver queued messages in send order, including any sent while
    /// delivering. Returns how many were delivered.
    pub fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.state.lock().pending.pop_front();
            match next {
                Some(envelope) => {
                    self.deliver(&envelope);
                    delivered += 1;
                },
                None => return delivered,
            }
        }
    }

    /// Discard queued messages. Returns how many were lost.
    pub fn drop_pending(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    /// Number of queued messages
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Every envelope delivered so far
    pub fn delivery_log(&self) -> Vec<Envelope> {
        self.state.lock().log.clone()
    }

    /// Deliver an envelope again, as a duplicating network would
    pub fn redeliver(&self, envelope: &Envelope) {
        self.deliver(envelope);
    }

    /// Messages accepted for sending
    pub fn sent_count(&self) -> usize {
        self.state.lock().sent
    }

    /// Messages handed to listeners
    pub fn delivered_count(&self) -> usize {
        self.state.lock().log.len()
    }

    fn post(&self, envelope: Envelope) {
        {
            let mut state = self.state.lock();
            state.sent += 1;
            if state.holding {
                state.pending.push_back(envelope);
                return;
            }
        }
        self.deliver(&envelope);
    }

    fn deliver(&self, envelope: &Envelope) {
        let listeners: Vec<Arc<dyn MessageListener>> = {
            let mut state = self.state.lock();
            let Some(entry) = state.nodes.get(&envelope.to).filter(|entry| entry.joined) else {
                return;
            };
            let listeners = entry
                .message_listeners
                .iter()
                .filter(|(_, pattern, _)| pattern.matches(&envelope.channel))
                .map(|(_, _, listener)| Arc::clone(listener))
                .collect();
            state.log.push(envelope.clone());
            listeners
        };
        trace!(from = %envelope.from, to = %envelope.to, channel = %envelope.channel, "Mock delivery");
        for listener in listeners {
            listener.on_message(&envelope.from, &envelope.channel, &envelope.data);
        }
    }

    /// (listener, node it should hear about) pairs for a membership change
    /// of `node`.
    fn membership_events(
        state: &NetworkState,
        node: &NodeId,
    ) -> Vec<(Arc<dyn MembershipListener>, NodeId)> {
        let mut events = Vec::new();
        let Some(changed) = state.nodes.get(node) else {
            return events;
        };
        for (other, entry) in state.nodes.iter().filter(|(id, entry)| *id != node && entry.joined) {
            events.extend(entry.membership_listeners.iter().map(|(_, l)| (Arc::clone(l), node.clone())));
            events.extend(changed.membership_listeners.iter().map(|(_, l)| (Arc::clone(l), other.clone())));
        }
        events
    }

    fn dispatch_membership(events: Vec<(Arc<dyn MembershipListener>, NodeId)>, change: Membership) {
        for (listener, node) in events {
            match change {
                Membership::Joined => listener.node_joined(&node),
                Membership::Left => listener.node_left(&node),
            }
        }
    }
}

impl fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockCluster")
            .field("nodes", &state.nodes.len())
            .field("holding", &state.holding)
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// One node's view of a [`MockCluster`].
pub struct MockTransport {
    node: NodeId,
    cluster: MockCluster,
}

impl MockTransport {
    /// This node's id
    pub fn local_node_id(&self) -> &NodeId {
        &self.node
    }

    /// The network this node belongs to
    pub fn cluster(&self) -> &MockCluster {
        &self.cluster
    }

    fn is_joined(&self) -> bool {
        self.cluster.state.lock().nodes.get(&self.node).is_some_and(|entry| entry.joined)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport").field("node", &self.node).finish()
    }
}

#[async_trait]
impl ClusterTransport for MockTransport {
    fn local_node(&self) -> &NodeId {
        &self.node
    }

    fn members(&self) -> Vec<NodeId> {
        self.cluster.members().into_iter().filter(|id| *id != self.node).collect()
    }

    fn add_message_listener(&self, channel: ChannelId, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId::generate();
        let mut state = self.cluster.state.lock();
        state.nodes.entry(self.node.clone()).or_default().message_listeners.push((id, channel, listener));
        id
    }

    fn remove_message_listener(&self, id: ListenerId) -> bool {
        let mut state = self.cluster.state.lock();
        let Some(entry) = state.nodes.get_mut(&self.node) else {
            return false;
        };
        let before = entry.message_listeners.len();
        entry.message_listeners.retain(|(registered, _, _)| *registered != id);
        entry.message_listeners.len() != before
    }

    fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>) -> ListenerId {
        let id = ListenerId::generate();
        let mut state = self.cluster.state.lock();
        state.nodes.entry(self.node.clone()).or_default().membership_listeners.push((id, listener));
        id
    }

    fn remove_membership_listener(&self, id: ListenerId) -> bool {
        let mut state = self.cluster.state.lock();
        let Some(entry) = state.nodes.get_mut(&self.node) else {
            return false;
        };
        let before = entry.membership_listeners.len();
        entry.membership_listeners.retain(|(registered, _)| *registered != id);
        entry.membership_listeners.len() != before
    }

    async fn broadcast(&self, channel: &ChannelId, data: Value) -> Result<()> {
        if !self.is_joined() {
            return Ok(());
        }
        for to in self.members() {
            self.cluster.post(Envelope {
                from: self.node.clone(),
                to,
                channel: channel.clone(),
                data: data.clone(),
            });
        }
        Ok(())
    }

    async fn send(&self, to: &NodeId, channel: &ChannelId, data: Value) -> Result<()> {
        if !self.members().contains(to) {
            return Err(Error::transport(format!("node {to} is not reachable from {}", self.node)));
        }
        self.cluster.post(Envelope { from: self.node.clone(), to: to.clone(), channel: channel.clone(), data });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<(NodeId, String, Value)>>,
        joined: Mutex<Vec<NodeId>>,
        left: Mutex<Vec<NodeId>>,
    }

    impl MessageListener for Recorder {
        fn on_message(&self, from: &NodeId, channel: &ChannelId, data: &Value) {
            self.messages.lock().push((from.clone(), channel.to_string(), data.clone()));
        }
    }

    impl MembershipListener for Recorder {
        fn node_joined(&self, node: &NodeId) {
            self.joined.lock().push(node.clone());
        }

        fn node_left(&self, node: &NodeId) {
            self.left.lock().push(node.clone());
        }
    }

    fn channel(name: &str) -> ChannelId {
        ChannelId::parse(name).unwrap()
    }

    #[test]
    fn test_membership_events_both_ways() {
        let cluster = MockCluster::new();
        let a = cluster.node("a");
        let b = cluster.node("b");
        let (ra, rb) = (Arc::new(Recorder::default()), Arc::new(Recorder::default()));
        a.add_membership_listener(ra.clone());
        b.add_membership_listener(rb.clone());

        cluster.join(a.local_node_id());
        assert!(ra.joined.lock().is_empty());
        cluster.join(b.local_node_id());
        assert_eq!(*ra.joined.lock(), [NodeId::from("b")]);
        assert_eq!(*rb.joined.lock(), [NodeId::from("a")]);
        assert_eq!(a.members(), [NodeId::from("b")]);

        cluster.leave(b.local_node_id());
        assert_eq!(*ra.left.lock(), [NodeId::from("b")]);
        assert_eq!(*rb.left.lock(), [NodeId::from("a")]);
        assert!(a.members().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_hold_and_release() {
        let cluster = MockCluster::new();
        let nodes: Vec<_> = ["a", "b", "c"].iter().map(|url| cluster.node(url)).collect();
        let recorders: Vec<_> = nodes
            .iter()
            .map(|node| {
                let recorder = Arc::new(Recorder::default());
                node.add_message_listener(channel("/cluster/**"), recorder.clone());
                cluster.join(node.local_node_id());
                recorder
            })
            .collect();

        cluster.hold();
        nodes[0].broadcast(&channel("/cluster/objects/x"), json!({"v": 1})).await.unwrap();
        assert_eq!(cluster.pending_count(), 2);
        assert!(recorders[1].messages.lock().is_empty());

        cluster.release();
        assert!(recorders[0].messages.lock().is_empty());
        assert_eq!(recorders[1].messages.lock().len(), 1);
        assert_eq!(recorders[2].messages.lock()[0].0, NodeId::from("a"));
        assert_eq!(cluster.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_send_drop_and_redeliver() {
        let cluster = MockCluster::new();
        let a = cluster.node("a");
        let b = cluster.node("b");
        let recorder = Arc::new(Recorder::default());
        b.add_message_listener(channel("/service/x"), recorder.clone());
        cluster.join(a.local_node_id());

        assert!(a.send(&NodeId::from("b"), &channel("/service/x"), json!(1)).await.is_err());
        cluster.join(b.local_node_id());

        cluster.hold();
        a.send(&NodeId::from("b"), &channel("/service/x"), json!(1)).await.unwrap();
        assert_eq!(cluster.drop_pending(), 1);
        cluster.release();
        assert!(recorder.messages.lock().is_empty());

        a.send(&NodeId::from("b"), &channel("/service/x"), json!(2)).await.unwrap();
        let log = cluster.delivery_log();
        cluster.redeliver(&log[0]);
        assert_eq!(recorder.messages.lock().len(), 2);
        assert_eq!(cluster.sent_count(), 2);
    }
}
