//! # Acknowledged Delivery
//!
//! Guarantees that messages queued for a session reach the client even when
//! a `/meta/connect` response is lost.
//!
//! Every message queued for the session is offered into a [`BatchQueue`].
//! Each connect response seals the current batch and carries its number in
//! `ext.ack`. The client echoes the last batch it fully received on its next
//! connect, which purges everything up to that batch. Whatever remains is
//! sent again, in order.

use crate::{
    ext::{batch_queue::BatchQueue, Extension},
    meta,
    session::ServerSession,
    Result,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, trace, warn};
use vesper_core::{config::AckConfig, Message, MessageId, SessionId};

/// Extension field carrying acknowledgement data.
pub const ACK_FIELD: &str = "ack";

/// Result of queueing a message for acknowledged delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The message was queued
    Enqueued,
    /// The message was queued and the unacknowledged queue is now larger
    /// than the configured maximum
    Maxed {
        /// Number of unacknowledged messages
        size: usize,
    },
}

/// Acknowledgement state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// Nothing is waiting for acknowledgement
    Empty,
    /// Messages are queued but have not been sent yet
    Pending,
    /// Sent messages are unacknowledged and will be sent again
    ResendRequired,
}

/// Notified when a session's unacknowledged queue grows past its limit.
///
/// The owner of the session decides what to do, typically disconnecting it.
pub trait QueueMaxedListener: Send + Sync {
    /// Called with the session and the current queue size
    fn queue_maxed(&self, session: &SessionId, size: usize);
}

impl<F> QueueMaxedListener for F
where
    F: Fn(&SessionId, usize) + Send + Sync,
{
    fn queue_maxed(&self, session: &SessionId, size: usize) {
        self(session, size);
    }
}

/// Per-session acknowledgement state.
#[derive(Debug)]
pub struct Acknowledger {
    queue: BatchQueue<Message>,
    batches: HashMap<Option<MessageId>, u64>,
    last_sent_batch: u64,
    last_acknowledged_batch: u64,
    max_queue_size: Option<usize>,
}

impl Acknowledger {
    /// Create the state for one session.
    pub fn new(config: &AckConfig) -> vesper_core::Result<Self> {
        Ok(Self {
            queue: BatchQueue::new(config.initial_capacity)?,
            batches: HashMap::new(),
            last_sent_batch: 0,
            last_acknowledged_batch: 0,
            max_queue_size: config.max_queue_size,
        })
    }

    /// Queue a message into the current batch.
    pub fn queued(&mut self, message: Message) -> vesper_core::Result<EnqueueOutcome> {
        self.queue.offer(message)?;
        let size = self.queue.len();
        match self.max_queue_size {
            Some(max) if size > max => Ok(EnqueueOutcome::Maxed { size }),
            _ => Ok(EnqueueOutcome::Enqueued),
        }
    }

    /// Apply the acknowledgement carried by a connect message.
    ///
    /// Values that are not non-negative integers, or that name a batch that
    /// was never sent, acknowledge nothing. Returns the acknowledged batch.
    pub fn acknowledge(&mut self, ack: Option<&Value>) -> Option<u64> {
        let batch = ack.and_then(Value::as_u64)?;
        if batch > self.last_sent_batch {
            debug!(batch, last_sent = self.last_sent_batch, "Ignoring acknowledgement of unsent batch");
            return None;
        }
        self.queue.clear_to_batch(batch);
        self.last_acknowledged_batch = self.last_acknowledged_batch.max(batch);
        trace!(batch, remaining = self.queue.len(), "Batch acknowledged");
        Some(batch)
    }

    /// Seal the current batch for the connect reply `reply_id` and copy every
    /// unacknowledged message into `outbox`, oldest first.
    ///
    /// Returns the sealed batch number.
    pub fn dequeue<E: Extend<Message>>(&mut self, reply_id: Option<MessageId>, outbox: &mut E) -> u64 {
        let batch = self.queue.batch();
        self.queue.next_batch();
        self.batches.insert(reply_id, batch);
        self.last_sent_batch = batch;
        self.queue.export_to_batch(outbox, batch);
        batch
    }

    /// Remove and return the batch sealed for the given connect reply.
    pub fn take_reply_batch(&mut self, reply_id: &Option<MessageId>) -> Option<u64> {
        self.batches.remove(reply_id)
    }

    /// Whether a connect should return without waiting.
    ///
    /// Fresh lazy messages alone never do; anything awaiting resend does.
    pub fn has_immediate_messages(&self) -> bool {
        self.state() == AckState::ResendRequired || self.queue.iter().any(|message| !message.lazy)
    }

    /// Current acknowledgement state.
    pub fn state(&self) -> AckState {
        match self.queue.batch_of(0) {
            None => AckState::Empty,
            Some(batch) if batch <= self.last_sent_batch => AckState::ResendRequired,
            Some(_) => AckState::Pending,
        }
    }

    /// Number of unacknowledged messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting for acknowledgement.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The last batch sealed into a connect reply, 0 if none.
    pub fn last_sent_batch(&self) -> u64 {
        self.last_sent_batch
    }

    /// The highest batch acknowledged by the client, 0 if none.
    pub fn last_acknowledged_batch(&self) -> u64 {
        self.last_acknowledged_batch
    }

    /// Drop all state.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.batches.clear();
        self.last_sent_batch = 0;
        self.last_acknowledged_batch = 0;
    }
}

/// Server extension that negotiates acknowledged delivery at handshake and
/// applies it on every connect.
#[derive(Debug, Clone, Default)]
pub struct AcknowledgedMessagesExtension {
    config: AckConfig,
}

impl AcknowledgedMessagesExtension {
    /// Create the extension; sessions that opt in use `config`.
    pub fn new(config: AckConfig) -> Self {
        Self { config }
    }
}

impl Extension for AcknowledgedMessagesExtension {
    fn rcv_meta(&self, session: &ServerSession, message: &mut Message) -> Result<()> {
        match message.channel.as_str() {
            meta::HANDSHAKE => {
                if message.ext_value(ACK_FIELD) == Some(&Value::Bool(true)) {
                    if let EnqueueOutcome::Maxed { size } = session.enable_acknowledgement(&self.config)? {
                        warn!(session = %session.id(), size, "Unacknowledged queue over limit at handshake");
                    }
                    debug!(session = %session.id(), "Acknowledged delivery enabled");
                }
            },
            meta::CONNECT => {
                session.acknowledge(message.ext_value(ACK_FIELD));
            },
            _ => {},
        }
        Ok(())
    }

    fn send_meta(&self, session: &ServerSession, reply: &mut Message) -> Result<()> {
        match reply.channel.as_str() {
            meta::HANDSHAKE if session.is_acknowledged() => {
                reply.set_ext(ACK_FIELD, true);
            },
            meta::CONNECT => {
                if let Some(batch) = session.take_reply_batch(&reply.id) {
                    reply.set_ext(ACK_FIELD, batch);
                }
            },
            _ => {},
        }
        Ok(())
    }
}
