//! Server-side session state.

use crate::{
    ext::{AckState, Acknowledger, EnqueueOutcome},
    Result,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use vesper_core::{config::AckConfig, ChannelId, Message, MessageId, SessionId};

#[derive(Debug, Default)]
struct SessionState {
    queue: VecDeque<Message>,
    acknowledger: Option<Acknowledger>,
    subscriptions: HashSet<ChannelId>,
    connected: bool,
}

/// A client session known to the broker.
///
/// A single lock guards the outbound queue, the acknowledgement state and the
/// subscriptions, so a message is never half-way between them.
#[derive(Debug)]
pub struct ServerSession {
    id: SessionId,
    state: Mutex<SessionState>,
}

impl ServerSession {
    /// Create a session with the given id.
    pub fn new(id: SessionId) -> Self {
        Self { id, state: Mutex::new(SessionState::default()) }
    }

    /// The session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Switch this session to acknowledged delivery. Messages already in the
    /// outbound queue move into the unacknowledged queue.
    ///
    /// The outbound queue is left untouched if any message fails to move.
    /// The outcome reports whether the moved messages put the unacknowledged
    /// queue over its limit.
    pub fn enable_acknowledgement(&self, config: &AckConfig) -> Result<EnqueueOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.acknowledger.is_some() {
            return Ok(EnqueueOutcome::Enqueued);
        }
        let mut acknowledger = Acknowledger::new(config)?;
        let mut outcome = EnqueueOutcome::Enqueued;
        for message in &state.queue {
            outcome = acknowledger.queued(message.clone())?;
        }
        state.queue.clear();
        state.acknowledger = Some(acknowledger);
        Ok(outcome)
    }

    /// Whether acknowledged delivery is enabled.
    pub fn is_acknowledged(&self) -> bool {
        self.state.lock().acknowledger.is_some()
    }

    /// Apply a client acknowledgement. No-op without acknowledged delivery.
    pub fn acknowledge(&self, ack: Option<&Value>) -> Option<u64> {
        self.state.lock().acknowledger.as_mut()?.acknowledge(ack)
    }

    /// Remove and return the batch sealed for the given connect reply.
    pub fn take_reply_batch(&self, reply_id: &Option<MessageId>) -> Option<u64> {
        self.state.lock().acknowledger.as_mut()?.take_reply_batch(reply_id)
    }

    /// Queue a message for delivery on the next connect.
    pub fn deliver(&self, message: Message) -> Result<EnqueueOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.acknowledger.as_mut() {
            Some(acknowledger) => Ok(acknowledger.queued(message)?),
            None => {
                state.queue.push_back(message);
                Ok(EnqueueOutcome::Enqueued)
            },
        }
    }

    /// Whether a pending connect should return without waiting.
    pub fn has_immediate_messages(&self) -> bool {
        let state = self.state.lock();
        match &state.acknowledger {
            Some(acknowledger) => acknowledger.has_immediate_messages(),
            None => state.queue.iter().any(|message| !message.lazy),
        }
    }

    /// Take the messages to write with the connect reply `reply`.
    ///
    /// With acknowledged delivery the unacknowledged messages are copied and
    /// stay queued until acknowledged; otherwise the queue is drained.
    pub fn dequeue_for_connect(&self, reply: &Message) -> Vec<Message> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut outbox = Vec::new();
        match state.acknowledger.as_mut() {
            Some(acknowledger) => {
                let batch = acknowledger.dequeue(reply.id.clone(), &mut outbox);
                tracing::trace!(session = %self.id, batch, count = outbox.len(), "Batch sealed");
            },
            None => outbox.extend(state.queue.drain(..)),
        }
        outbox
    }

    /// Number of messages waiting for delivery or acknowledgement.
    pub fn queue_len(&self) -> usize {
        let state = self.state.lock();
        state.acknowledger.as_ref().map_or(state.queue.len(), Acknowledger::len)
    }

    /// Acknowledgement state, if acknowledged delivery is enabled.
    pub fn ack_state(&self) -> Option<AckState> {
        self.state.lock().acknowledger.as_ref().map(Acknowledger::state)
    }

    /// Channels this session is subscribed to.
    pub fn subscriptions(&self) -> Vec<ChannelId> {
        self.state.lock().subscriptions.iter().cloned().collect()
    }

    pub(crate) fn add_subscription(&self, channel: ChannelId) -> bool {
        self.state.lock().subscriptions.insert(channel)
    }

    pub(crate) fn remove_subscription(&self, channel: &ChannelId) -> bool {
        self.state.lock().subscriptions.remove(channel)
    }

    /// Record a connect; returns `true` for the first one.
    pub(crate) fn mark_connected(&self) -> bool {
        !std::mem::replace(&mut self.state.lock().connected, true)
    }

    /// Drop queued messages, acknowledgement state and subscriptions.
    pub(crate) fn clear(&self) -> Vec<ChannelId> {
        let mut state = self.state.lock();
        state.queue.clear();
        if let Some(acknowledger) = state.acknowledger.as_mut() {
            acknowledger.clear();
        }
        state.subscriptions.drain().collect()
    }
}
