//! Core broker implementation.
//!
//! The broker owns the sessions and the router and runs the meta protocol
//! (handshake, connect, disconnect) through the installed extensions. It
//! works on already-decoded [`Message`]s; framing and transports live
//! outside this crate.

use crate::{
    config::BrokerConfig,
    error::{Error, Result},
    ext::{AcknowledgedMessagesExtension, EnqueueOutcome, Extension, QueueMaxedListener},
    meta,
    routing::ChannelRouter,
    session::ServerSession,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, info, warn};
use vesper_core::{ChannelId, Message, SessionId};

/// Replies to a `/meta/connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectResponse {
    /// Messages to write before the reply, oldest first
    pub messages: Vec<Message>,
    /// The connect reply
    pub reply: Message,
    /// Whether the transport should hold the request until a message
    /// arrives or its timeout expires, then call [`Broker::resume_connect`]
    pub held: bool,
}

/// Outcome of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Sessions the message was queued for
    pub delivered: usize,
    /// Listeners invoked
    pub listeners: usize,
    /// Sessions whose unacknowledged queue went over its limit
    pub maxed: Vec<SessionId>,
}

/// Main broker instance.
pub struct Broker {
    config: BrokerConfig,
    sessions: DashMap<SessionId, Arc<ServerSession>>,
    router: ChannelRouter,
    extensions: RwLock<Vec<Arc<dyn Extension>>>,
    queue_maxed_listeners: RwLock<Vec<Arc<dyn QueueMaxedListener>>>,
}

impl Broker {
    /// Create a broker with the given configuration.
    pub fn new(config: BrokerConfig) -> Self {
        let mut extensions: Vec<Arc<dyn Extension>> = Vec::new();
        if config.acknowledgement_enabled {
            extensions.push(Arc::new(AcknowledgedMessagesExtension::new(config.ack.clone())));
        }
        Self {
            config,
            sessions: DashMap::new(),
            router: ChannelRouter::new(),
            extensions: RwLock::new(extensions),
            queue_maxed_listeners: RwLock::new(Vec::new()),
        }
    }

    /// The broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The router, for listener and remote-call registration.
    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Install an extension after the built-in ones.
    pub fn add_extension<E: Extension + 'static>(&self, extension: E) {
        self.extensions.write().push(Arc::new(extension));
    }

    /// Register a listener for sessions whose unacknowledged queue goes over
    /// its limit.
    pub fn add_queue_maxed_listener<L: QueueMaxedListener + 'static>(&self, listener: L) {
        self.queue_maxed_listeners.write().push(Arc::new(listener));
    }

    /// Look up a session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<ServerSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handle a `/meta/handshake`, creating a session.
    pub fn handshake(&self, mut message: Message) -> Result<Message> {
        expect_channel(&message, meta::HANDSHAKE)?;
        let session = Arc::new(ServerSession::new(SessionId::generate()));
        self.rcv_meta(&session, &mut message)?;

        let mut reply = message.reply();
        reply.client_id = Some(session.id().clone());
        self.send_meta(&session, &mut reply)?;

        info!(session = %session.id(), acknowledged = session.is_acknowledged(), "Session created");
        self.sessions.insert(session.id().clone(), session);
        Ok(reply)
    }

    /// Handle a `/meta/connect`.
    ///
    /// The first connect of a session and any connect with messages that
    /// must not wait return immediately. Otherwise the response is marked
    /// `held` and carries no messages.
    pub fn connect(&self, mut message: Message) -> Result<ConnectResponse> {
        expect_channel(&message, meta::CONNECT)?;
        let session = self.session_of(&message)?;
        self.rcv_meta(&session, &mut message)?;

        let first = session.mark_connected();
        let reply = message.reply();
        if !first && !session.has_immediate_messages() {
            debug!(session = %session.id(), "Holding connect");
            return Ok(ConnectResponse { messages: Vec::new(), reply, held: true });
        }
        self.flush(&session, reply)
    }

    /// Complete a held connect, delivering whatever is queued, lazy
    /// messages included.
    pub fn resume_connect(&self, reply: Message) -> Result<ConnectResponse> {
        let session = self.session_of(&reply)?;
        self.flush(&session, reply)
    }

    /// Subscribe a session to a channel or channel pattern.
    pub fn subscribe(&self, session: &SessionId, channel: &ChannelId) -> Result<()> {
        if channel.is_meta() {
            return Err(Error::invalid_message(channel, "cannot subscribe to meta channels"));
        }
        let server_session = self.require_session(session)?;
        server_session.add_subscription(channel.clone());
        self.router.subscribe(session.clone(), channel.clone());
        debug!(session = %session, channel = %channel, "Subscribed");
        Ok(())
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, session: &SessionId, channel: &ChannelId) -> Result<()> {
        let server_session = self.require_session(session)?;
        server_session.remove_subscription(channel);
        self.router.unsubscribe(session, channel);
        Ok(())
    }

    /// Publish a message.
    ///
    /// Broadcast channels are delivered to subscribers; listeners are
    /// notified on every channel.
    pub fn publish(&self, message: Message) -> Result<PublishOutcome> {
        if !message.channel.is_exact() {
            return Err(Error::invalid_message(&message.channel, "cannot publish to a pattern"));
        }
        if message.is_meta() {
            return Err(Error::invalid_message(&message.channel, "cannot publish to meta channels"));
        }
        if let Some(sender) = &message.client_id {
            self.require_session(sender)?;
        }

        let mut outcome = PublishOutcome::default();
        if message.channel.is_broadcast() {
            for id in self.router.route(&message) {
                let Some(session) = self.session(&id) else { continue };
                if let EnqueueOutcome::Maxed { size } = session.deliver(message.clone())? {
                    warn!(session = %id, size, "Unacknowledged queue over limit");
                    outcome.maxed.push(id.clone());
                    self.notify_queue_maxed(&id, size);
                }
                outcome.delivered += 1;
            }
        }
        outcome.listeners = self.router.notify_listeners(&message);
        Ok(outcome)
    }

    /// Dispatch a remote call on a service channel.
    pub fn call(&self, message: &Message) -> Result<Option<Value>> {
        if !message.channel.is_service() {
            return Err(Error::invalid_message(&message.channel, "remote calls use service channels"));
        }
        Ok(self.router.call(message))
    }

    /// Remove a session, dropping its queues and subscriptions.
    pub fn disconnect(&self, session: &SessionId) -> Result<()> {
        let (_, server_session) =
            self.sessions.remove(session).ok_or_else(|| Error::UnknownSession { id: session.clone() })?;
        for channel in server_session.clear() {
            self.router.unsubscribe(session, &channel);
        }
        info!(session = %session, "Session removed");
        Ok(())
    }

    fn flush(&self, session: &ServerSession, mut reply: Message) -> Result<ConnectResponse> {
        let messages = session.dequeue_for_connect(&reply);
        self.send_meta(session, &mut reply)?;
        Ok(ConnectResponse { messages, reply, held: false })
    }

    fn rcv_meta(&self, session: &ServerSession, message: &mut Message) -> Result<()> {
        let extensions = self.extensions.read().clone();
        extensions.iter().try_for_each(|extension| extension.rcv_meta(session, message))
    }

    fn send_meta(&self, session: &ServerSession, reply: &mut Message) -> Result<()> {
        let extensions = self.extensions.read().clone();
        extensions.iter().try_for_each(|extension| extension.send_meta(session, reply))
    }

    fn notify_queue_maxed(&self, session: &SessionId, size: usize) {
        let listeners = self.queue_maxed_listeners.read().clone();
        for (index, listener) in listeners.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.queue_maxed(session, size))).is_err() {
                warn!(session = %session, size, listener = index, "Queue maxed listener panicked");
            }
        }
    }

    fn session_of(&self, message: &Message) -> Result<Arc<ServerSession>> {
        let id = message
            .client_id
            .as_ref()
            .ok_or_else(|| Error::invalid_message(&message.channel, "missing clientId"))?;
        self.require_session(id)
    }

    fn require_session(&self, id: &SessionId) -> Result<Arc<ServerSession>> {
        self.session(id).ok_or_else(|| Error::UnknownSession { id: id.clone() })
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("router", &self.router)
            .finish()
    }
}

fn expect_channel(message: &Message, channel: &str) -> Result<()> {
    if message.channel.as_str() == channel {
        Ok(())
    } else {
        Err(Error::invalid_message(&message.channel, format!("expected {channel}")))
    }
}
