//! # Replicated Objects
//!
//! A replicated object is a named value partitioned one part per node. Each
//! node only ever writes its own part; every other part is a replica learned
//! from the network. Versions are per owner, so an update is applied only
//! when it is newer than what is already held for that node, which makes
//! duplicate and out-of-order delivery harmless.
//!
//! ```ignore
//! let counter = ReplicatedObject::start("users", transport, factory::long(), &ObjectConfig::default()).await?;
//! counter.set_and_share(17).await?;
//! let total = counter.merge(merger::long_sum);
//! ```

pub mod factory;
pub mod listener;
pub mod merger;
pub mod part;
mod processor;

pub use factory::ValueFactory;
pub use listener::PartListener;
pub use merger::Merger;
pub use part::{Ownership, Part, PartRecord, RecordAction};

use crate::{
    config::ObjectConfig,
    transport::ClusterTransport,
    types::{ListenerId, NodeId},
    Error, Result,
};
use parking_lot::{Mutex, RwLock};
use processor::{Command, Forwarder, Processor};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use vesper_core::{ChannelId, Error as CoreError};

type Listeners<T> = Vec<(ListenerId, Arc<dyn PartListener<T>>)>;

pub(crate) struct ObjectState<T> {
    pub(crate) name: String,
    pub(crate) local: NodeId,
    pub(crate) broadcast_channel: ChannelId,
    pub(crate) service_channel: ChannelId,
    pub(crate) parts: RwLock<BTreeMap<NodeId, Part<T>>>,
    pub(crate) listeners: RwLock<Listeners<T>>,
}

impl<T: Serialize> ObjectState<T> {
    /// Wire record of the local part, if the object is still running.
    pub(crate) fn local_record(&self) -> Option<PartRecord> {
        let parts = self.parts.read();
        let part = parts.get(&self.local)?;
        match serde_json::to_value(part.value()) {
            Ok(value) => Some(PartRecord {
                version: part.version(),
                node_id: self.local.clone(),
                name: self.name.clone(),
                value,
                peer: None,
                action: None,
            }),
            Err(e) => {
                warn!(object = %self.name, error = %e, "Failed to encode local part");
                None
            }
        }
    }
}

enum Registration {
    Message(ListenerId),
    Membership(ListenerId),
}

/// A value replicated across every node of the cluster.
pub struct ReplicatedObject<T> {
    state: Arc<ObjectState<T>>,
    commands: mpsc::UnboundedSender<Command<T>>,
    transport: Arc<dyn ClusterTransport>,
    registrations: Mutex<Vec<Registration>>,
    processor: Mutex<Option<JoinHandle<()>>>,
}

impl<T> ReplicatedObject<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Start replicating the object called `name`.
    ///
    /// Creates the local part from the factory's default value, starts the
    /// processor, subscribes to the object's channels and to membership
    /// changes, then broadcasts the local part.
    pub async fn start<F>(
        name: impl Into<String>,
        transport: Arc<dyn ClusterTransport>,
        factory: F,
        config: &ObjectConfig,
    ) -> Result<Self>
    where
        F: ValueFactory<T>,
    {
        let name = name.into();
        let broadcast_channel = config.broadcast_channel(&name)?;
        let service_channel = config.service_channel(&name)?;
        let local = transport.local_node().clone();
        let initial = factory.new_value(None)?;

        let mut parts = BTreeMap::new();
        parts.insert(local.clone(), Part::local(local.clone(), 0, initial));
        let state = Arc::new(ObjectState {
            name: name.clone(),
            local,
            broadcast_channel,
            service_channel,
            parts: RwLock::new(parts),
            listeners: RwLock::new(Vec::new()),
        });

        let (commands, mailbox) = mpsc::unbounded_channel();
        let factory: Arc<dyn ValueFactory<T>> = Arc::new(factory);
        let processor = Processor::new(Arc::clone(&state), Arc::clone(&transport), factory, mailbox);
        let handle = tokio::spawn(processor.run());

        let forwarder = Arc::new(Forwarder { name: name.clone(), commands: commands.clone() });
        let registrations = vec![
            Registration::Message(
                transport.add_message_listener(state.broadcast_channel.clone(), forwarder.clone()),
            ),
            Registration::Message(transport.add_message_listener(state.service_channel.clone(), forwarder.clone())),
            Registration::Membership(transport.add_membership_listener(forwarder)),
        ];

        let object = Self {
            state,
            commands,
            transport,
            registrations: Mutex::new(registrations),
            processor: Mutex::new(Some(handle)),
        };

        if let Some(record) = object.state.local_record() {
            let data = serde_json::to_value(&record)?;
            if let Err(e) = object.transport.broadcast(&object.state.broadcast_channel, data).await {
                warn!(object = %object.state.name, error = %e, "Failed to announce local part");
            }
        }

        info!(
            object = %object.state.name,
            node = %object.state.local,
            channel = %object.state.broadcast_channel,
            "Replicated object started"
        );
        Ok(object)
    }

    /// Replace the local part with `value`, share it with every node, and
    /// return the previous local value.
    ///
    /// Fails with `NullValue` when `value` serializes to JSON null.
    pub async fn set_and_share(&self, value: T) -> Result<T> {
        let representation = serde_json::to_value(&value)?;
        if representation.is_null() {
            return Err(CoreError::NullValue { name: self.state.name.clone() }.into());
        }

        let (reply, response) = oneshot::channel();
        self.submit(Command::Share { value, representation, reply })?;
        response.await.ok().flatten().ok_or_else(|| self.stopped())
    }

    /// Ask `node` to push its local part to this node.
    pub async fn pull_from(&self, node: &NodeId) -> Result<()> {
        if !self.is_running() {
            return Err(self.stopped());
        }
        debug!(object = %self.state.name, node = %node, "Pulling part");
        let record = PartRecord::pull(&self.state.name, self.state.local.clone());
        self.transport
            .send(node, &self.state.service_channel, serde_json::to_value(&record)?)
            .await
    }

    /// Wait until every update submitted so far has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (done, barrier) = oneshot::channel();
        self.submit(Command::Barrier(done))?;
        barrier.await.map_err(|_| self.stopped())
    }

    /// Stop replicating. Unsubscribes from the transport, stops the processor
    /// and drops every part. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<()> {
        self.unregister();
        let (done, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop(done)).is_ok() {
            let _ = stopped.await;
        }
        let handle = self.processor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(object = %self.state.name, error = %e, "Processor task failed");
            }
            info!(object = %self.state.name, node = %self.state.local, "Replicated object stopped");
        }
        Ok(())
    }

    /// Merge all parts with the given strategy. Does not change any state.
    pub fn merge<R>(&self, merger: impl Merger<T, R>) -> R {
        merger.merge(&self.parts())
    }

    /// Register a listener for part updates and removals
    pub fn add_listener(&self, listener: impl PartListener<T> + 'static) -> ListenerId {
        let id = ListenerId::generate();
        self.state.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Part owned by this node
    pub fn local_part(&self) -> Option<Part<T>> {
        self.part(&self.state.local)
    }

    /// Value of the part owned by this node
    pub fn value(&self) -> Option<T> {
        self.local_part().map(Part::into_value)
    }

    /// Part owned by `node`, if known
    pub fn part(&self, node: &NodeId) -> Option<Part<T>> {
        self.state.parts.read().get(node).cloned()
    }

    /// Snapshot of all parts in node order
    pub fn parts(&self) -> Vec<Part<T>> {
        self.state.parts.read().values().cloned().collect()
    }

    /// First part, in node order, holding `value`
    pub fn part_by_value(&self, value: &T) -> Option<Part<T>>
    where
        T: PartialEq,
    {
        self.state.parts.read().values().find(|part| part.value() == value).cloned()
    }

    /// True until [`stop`](Self::stop) completes
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn submit(&self, command: Command<T>) -> Result<()> {
        self.commands.send(command).map_err(|_| self.stopped())
    }
}

impl<T> ReplicatedObject<T> {
    /// Object name
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// This node
    pub fn local_node(&self) -> &NodeId {
        &self.state.local
    }

    /// Channel every node broadcasts its part on
    pub fn broadcast_channel(&self) -> &ChannelId {
        &self.state.broadcast_channel
    }

    /// Channel used for point-to-point pushes and pulls
    pub fn service_channel(&self) -> &ChannelId {
        &self.state.service_channel
    }

    fn stopped(&self) -> Error {
        Error::Stopped { name: self.state.name.clone() }
    }

    fn unregister(&self) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for registration in registrations {
            match registration {
                Registration::Message(id) => self.transport.remove_message_listener(id),
                Registration::Membership(id) => self.transport.remove_membership_listener(id),
            };
        }
    }
}

impl<T> Drop for ReplicatedObject<T> {
    fn drop(&mut self) {
        self.unregister();
        let (done, _) = oneshot::channel();
        let _ = self.commands.send(Command::Stop(done));
    }
}

impl<T> fmt::Debug for ReplicatedObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedObject")
            .field("name", &self.state.name)
            .field("local", &self.state.local)
            .field("parts", &self.state.parts.read().len())
            .finish()
    }
}
