//! Server extensions.
//!
//! Extensions see every meta message a session sends and every meta reply
//! sent back to it, and may rewrite either.

pub mod acknowledge;
pub mod batch_queue;

pub use acknowledge::{
    AckState, AcknowledgedMessagesExtension, Acknowledger, EnqueueOutcome, QueueMaxedListener,
    ACK_FIELD,
};
pub use batch_queue::BatchQueue;

use crate::{session::ServerSession, Result};
use vesper_core::Message;

/// Hook into meta message processing.
pub trait Extension: Send + Sync {
    /// Called for each incoming meta message, before the broker handles it.
    fn rcv_meta(&self, _session: &ServerSession, _message: &mut Message) -> Result<()> {
        Ok(())
    }

    /// Called for each meta reply, before it is returned to the transport.
    fn send_meta(&self, _session: &ServerSession, _reply: &mut Message) -> Result<()> {
        Ok(())
    }
}
