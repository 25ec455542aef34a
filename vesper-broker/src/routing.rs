//! Message routing, template listeners and remote calls.
//!
//! Subscriptions are indexed by channel, so routing a publish only looks up
//! the published channel and its [`wilds`](ChannelId::wilds).
//!
//! Listeners and remote calls may be registered on channel templates such as
//! `/chat/{room}`. A registration listens on a synthesized wildcard channel
//! (`/chat/*`) and only fires when the published channel binds every declared
//! parameter.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    collections::HashSet,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, trace, warn};
use vesper_core::{channel::SERVICE_PREFIX, Bindings, ChannelId, Error, Message, Result, SessionId};

pub use vesper_core::ListenerId;

/// Callback for messages published on a listened channel.
pub trait ChannelListener: Send + Sync {
    /// Called with the published message and the bound template parameters
    fn on_message(&self, message: &Message, bindings: &Bindings);
}

impl<F> ChannelListener for F
where
    F: Fn(&Message, &Bindings) + Send + Sync,
{
    fn on_message(&self, message: &Message, bindings: &Bindings) {
        self(message, bindings);
    }
}

/// Handler for remote calls on service channels.
pub trait RemoteCallHandler: Send + Sync {
    /// Produce the reply payload for a call
    fn call(&self, message: &Message, bindings: &Bindings) -> Value;
}

impl<F> RemoteCallHandler for F
where
    F: Fn(&Message, &Bindings) -> Value + Send + Sync,
{
    fn call(&self, message: &Message, bindings: &Bindings) -> Value {
        self(message, bindings)
    }
}

struct Registration<H: ?Sized> {
    id: ListenerId,
    channel: ChannelId,
    listening: ChannelId,
    handler: Arc<H>,
}

impl<H: ?Sized> Clone for Registration<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            channel: self.channel.clone(),
            listening: self.listening.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: ?Sized> Registration<H> {
    fn new(channel: ChannelId, parameters: &[&str], handler: Arc<H>) -> Result<Self> {
        let listening = channel.listening_channel(parameters)?;
        Ok(Self { id: ListenerId::generate(), channel, listening, handler })
    }

    /// Bindings for `published`, or `None` when this registration does not apply.
    fn bind(&self, published: &ChannelId) -> Option<Bindings> {
        if !self.listening.matches(published) {
            return None;
        }
        if !self.channel.is_template() {
            return Some(self.channel.bind(published));
        }
        let bindings = self.channel.bind(published);
        self.channel.parameters().iter().all(|p| bindings.contains_key(p)).then_some(bindings)
    }
}

/// Routes published messages to subscribers, listeners and remote calls.
#[derive(Default)]
pub struct ChannelRouter {
    subscriptions: DashMap<ChannelId, HashSet<SessionId>>,
    listeners: RwLock<Vec<Registration<dyn ChannelListener>>>,
    remote_calls: RwLock<Vec<Registration<dyn RemoteCallHandler>>>,
}

impl ChannelRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a channel or channel pattern.
    ///
    /// Returns `false` if the session was already subscribed.
    pub fn subscribe(&self, session: SessionId, channel: ChannelId) -> bool {
        trace!(session = %session, channel = %channel, "Subscribing");
        self.subscriptions.entry(channel).or_default().insert(session)
    }

    /// Remove a subscription. Returns `false` if there was none.
    pub fn unsubscribe(&self, session: &SessionId, channel: &ChannelId) -> bool {
        let removed = self
            .subscriptions
            .get_mut(channel)
            .map_or(false, |mut sessions| sessions.remove(session));
        self.subscriptions.remove_if(channel, |_, sessions| sessions.is_empty());
        removed
    }

    /// Sessions subscribed to `channel`, directly or through a wildcard.
    pub fn subscribers(&self, channel: &ChannelId) -> HashSet<SessionId> {
        let mut sessions = HashSet::new();
        for candidate in std::iter::once(channel.clone()).chain(channel.wilds()) {
            if let Some(subscribed) = self.subscriptions.get(&candidate) {
                sessions.extend(subscribed.iter().cloned());
            }
        }
        sessions
    }

    /// Sessions a published message should be delivered to.
    pub fn route(&self, message: &Message) -> HashSet<SessionId> {
        self.subscribers(&message.channel)
    }

    /// Number of channels with at least one subscriber.
    pub fn subscribed_channels(&self) -> usize {
        self.subscriptions.len()
    }

    /// Register a listener on `channel`.
    ///
    /// For templates, `parameters` must list the template parameters in
    /// order; for other channels it must be empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChannelName`] for malformed channels and
    /// [`Error::ParameterCountMismatch`] when `parameters` does not match.
    pub fn add_listener<L>(&self, channel: &str, parameters: &[&str], listener: L) -> Result<ListenerId>
    where
        L: ChannelListener + 'static,
    {
        let handler: Arc<dyn ChannelListener> = Arc::new(listener);
        let registration = Registration::new(ChannelId::parse(channel)?, parameters, handler)?;
        let id = registration.id;
        debug!(channel = %registration.channel, listening = %registration.listening, %id, "Listener added");
        self.listeners.write().push(registration);
        Ok(id)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        before != listeners.len()
    }

    /// Invoke every listener that applies to the message's channel.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    /// Returns the number of listeners invoked, panicked ones included.
    pub fn notify_listeners(&self, message: &Message) -> usize {
        let listeners = self.listeners.read().clone();
        let mut invoked = 0;
        for registration in &listeners {
            let Some(bindings) = registration.bind(&message.channel) else {
                continue;
            };
            invoked += 1;
            let delivery = AssertUnwindSafe(|| registration.handler.on_message(message, &bindings));
            if panic::catch_unwind(delivery).is_err() {
                warn!(
                    listener = %registration.id,
                    channel = %message.channel,
                    registered = %registration.channel,
                    "Channel listener panicked"
                );
            }
        }
        invoked
    }

    /// Register a remote call handler.
    ///
    /// Channels outside `/service/` are moved under it, so `/users/{id}`
    /// registers `/service/users/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChannelName`] for wildcard channels and
    /// [`Error::ParameterCountMismatch`] when `parameters` does not match.
    pub fn add_remote_call<H>(&self, channel: &str, parameters: &[&str], handler: H) -> Result<ListenerId>
    where
        H: RemoteCallHandler + 'static,
    {
        let channel = ChannelId::parse(channel)?;
        if channel.is_wild() {
            return Err(Error::invalid_channel(
                channel.as_str(),
                "remote calls cannot be registered on wildcard channels",
            ));
        }
        let channel = if channel.is_service() {
            channel
        } else {
            let service = SERVICE_PREFIX.trim_end_matches('/');
            ChannelId::parse(format!("{service}{channel}"))?
        };

        let handler: Arc<dyn RemoteCallHandler> = Arc::new(handler);
        let registration = Registration::new(channel, parameters, handler)?;
        let id = registration.id;
        debug!(channel = %registration.channel, %id, "Remote call added");
        self.remote_calls.write().push(registration);
        Ok(id)
    }

    /// Remove a remote call. Returns `false` if it was not registered.
    pub fn remove_remote_call(&self, id: ListenerId) -> bool {
        let mut calls = self.remote_calls.write();
        let before = calls.len();
        calls.retain(|registration| registration.id != id);
        before != calls.len()
    }

    /// Dispatch a remote call to the first matching handler.
    ///
    /// Returns `None` when no handler applies.
    pub fn call(&self, message: &Message) -> Option<Value> {
        let calls = self.remote_calls.read().clone();
        calls.iter().find_map(|registration| {
            registration
                .bind(&message.channel)
                .map(|bindings| registration.handler.call(message, &bindings))
        })
    }
}

impl fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRouter")
            .field("subscribed_channels", &self.subscriptions.len())
            .field("listeners", &self.listeners.read().len())
            .field("remote_calls", &self.remote_calls.read().len())
            .finish()
    }
}
