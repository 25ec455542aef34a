//! Sequential update processor.
//!
//! Every change to a replicated object's parts, whether it comes from the
//! local node or from the network, is applied by one tokio task reading an
//! unbounded mailbox. Listeners therefore observe updates one at a time and
//! in arrival order. Local submitters wait for their reply; remote arrivals
//! are fire-and-forget.

use super::{
    factory::ValueFactory,
    listener::PartListener,
    part::{Part, PartRecord, RecordAction},
    ObjectState,
};
use crate::{
    transport::{ClusterTransport, MembershipListener, MessageListener},
    types::NodeId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use vesper_core::ChannelId;

pub(crate) enum Command<T> {
    Record { from: NodeId, record: PartRecord },
    Share { value: T, representation: Value, reply: oneshot::Sender<Option<T>> },
    NodeJoined(NodeId),
    NodeLeft(NodeId),
    Barrier(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

pub(crate) struct Processor<T> {
    state: Arc<ObjectState<T>>,
    transport: Arc<dyn ClusterTransport>,
    factory: Arc<dyn ValueFactory<T>>,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    next_version: u64,
}

impl<T> Processor<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    pub(crate) fn new(
        state: Arc<ObjectState<T>>,
        transport: Arc<dyn ClusterTransport>,
        factory: Arc<dyn ValueFactory<T>>,
        commands: mpsc::UnboundedReceiver<Command<T>>,
    ) -> Self {
        // Version 0 is the default part created at start.
        Self { state, transport, factory, commands, next_version: 1 }
    }

    pub(crate) async fn run(mut self) {
        debug!(object = %self.state.name, node = %self.state.local, "Processor started");
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Record { from, record } => self.on_record(from, record).await,
                Command::Share { value, representation, reply } => {
                    let old = self.share(value, representation).await;
                    let _ = reply.send(old);
                }
                Command::NodeJoined(node) => {
                    debug!(object = %self.state.name, node = %node, "Node joined, pushing local part");
                    self.push_local(&node, None).await;
                }
                Command::NodeLeft(node) => self.on_node_left(&node),
                Command::Barrier(done) => {
                    let _ = done.send(());
                }
                Command::Stop(done) => {
                    self.state.parts.write().clear();
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!(object = %self.state.name, node = %self.state.local, "Processor stopped");
    }

    async fn share(&mut self, value: T, representation: Value) -> Option<T> {
        let version = self.next_version;
        self.next_version += 1;

        let local = self.state.local.clone();
        let new = Part::local(local.clone(), version, value);
        let old = self.state.parts.write().insert(local.clone(), new.clone());
        self.notify_updated(old.as_ref(), &new);

        let record = PartRecord {
            version,
            node_id: local,
            name: self.state.name.clone(),
            value: representation,
            peer: None,
            action: None,
        };
        trace!(object = %self.state.name, version, "Sharing local part");
        self.send_record(None, &self.state.broadcast_channel, &record).await;
        old.map(Part::into_value)
    }

    async fn on_record(&mut self, from: NodeId, record: PartRecord) {
        let state = Arc::clone(&self.state);
        if record.name != state.name {
            trace!(object = %state.name, other = %record.name, "Ignoring record for another object");
            return;
        }

        if record.action == Some(RecordAction::Pull) {
            debug!(object = %state.name, from = %from, "Answering pull");
            self.push_local(&from, Some(from.clone())).await;
            return;
        }

        if record.node_id == state.local {
            return;
        }

        let value = match self.factory.new_value(Some(&record.value)) {
            Ok(value) => value,
            Err(e) => {
                warn!(object = %state.name, node = %record.node_id, error = %e, "Discarding undecodable part");
                return;
            }
        };

        let new = Part::remote(record.node_id.clone(), record.version, value);
        let old = {
            let mut parts = state.parts.write();
            if let Some(existing) = parts.get(&record.node_id) {
                if existing.version() >= record.version {
                    debug!(
                        object = %state.name,
                        node = %record.node_id,
                        current = existing.version(),
                        received = record.version,
                        "Discarding stale part"
                    );
                    return;
                }
            }
            parts.insert(record.node_id.clone(), new.clone())
        };
        self.notify_updated(old.as_ref(), &new);

        // First sighting of this node: tell it about us, unless this record
        // was itself a reply addressed to us.
        if old.is_none() && record.peer.as_ref() != Some(&state.local) {
            self.push_local(&record.node_id, Some(record.node_id.clone())).await;
        }
    }

    fn on_node_left(&mut self, node: &NodeId) {
        let removed = self.state.parts.write().remove(node);
        if let Some(part) = removed {
            debug!(object = %self.state.name, node = %node, version = part.version(), "Node left, part removed");
            self.notify(|listener| listener.removed(&part));
        }
    }

    async fn push_local(&self, to: &NodeId, peer: Option<NodeId>) {
        let Some(record) = self.state.local_record() else {
            return;
        };
        let record = record.with_peer(peer);
        self.send_record(Some(to), &self.state.service_channel, &record).await;
    }

    async fn send_record(&self, to: Option<&NodeId>, channel: &ChannelId, record: &PartRecord) {
        let data = match serde_json::to_value(record) {
            Ok(data) => data,
            Err(e) => {
                warn!(object = %self.state.name, error = %e, "Failed to encode part record");
                return;
            }
        };
        let result = match to {
            Some(node) => self.transport.send(node, channel, data).await,
            None => self.transport.broadcast(channel, data).await,
        };
        if let Err(e) = result {
            warn!(object = %self.state.name, channel = %channel, error = %e, "Failed to send part record");
        }
    }

    fn notify_updated(&self, old: Option<&Part<T>>, new: &Part<T>) {
        self.notify(|listener| listener.updated(old, new));
    }

    fn notify(&self, callback: impl Fn(&dyn PartListener<T>)) {
        let listeners = self.state.listeners.read().clone();
        for (index, (_, listener)) in listeners.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(listener.as_ref()))).is_err() {
                warn!(object = %self.state.name, listener = index, "Part listener panicked");
            }
        }
    }
}

/// Bridges transport callbacks into a processor mailbox.
pub(crate) struct Forwarder<T> {
    pub(crate) name: String,
    pub(crate) commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T: Send + Sync> Forwarder<T> {
    fn submit(&self, command: Command<T>) {
        if self.commands.send(command).is_err() {
            trace!(object = %self.name, "Processor gone, dropping event");
        }
    }
}

impl<T: Send + Sync> MessageListener for Forwarder<T> {
    fn on_message(&self, from: &NodeId, channel: &ChannelId, data: &Value) {
        match PartRecord::deserialize(data) {
            Ok(record) => self.submit(Command::Record { from: from.clone(), record }),
            Err(e) => warn!(object = %self.name, channel = %channel, error = %e, "Malformed part record"),
        }
    }
}

impl<T: Send + Sync> MembershipListener for Forwarder<T> {
    fn node_joined(&self, node: &NodeId) {
        self.submit(Command::NodeJoined(node.clone()));
    }

    fn node_left(&self, node: &NodeId) {
        self.submit(Command::NodeLeft(node.clone()));
    }
}
