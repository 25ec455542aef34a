//! # Test Utilities Module
//!
//! In-memory infrastructure for testing cluster behaviour: a mock network
//! implementing [`ClusterTransport`](crate::transport::ClusterTransport) and
//! a few helpers for driving replicated objects to a quiescent state.

use crate::{object::ReplicatedObject, Result};
use serde::Serialize;

pub mod mock_network;

pub use mock_network::{Envelope, MockCluster, MockTransport};

/// Default number of flush rounds used by [`settle`]
pub const DEFAULT_SETTLE_ROUNDS: usize = 5;

/// Flush every object repeatedly so that replies triggered by earlier
/// updates, and the replies to those, are applied before returning.
pub async fn settle<T>(objects: &[&ReplicatedObject<T>]) -> Result<()>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    for _ in 0..DEFAULT_SETTLE_ROUNDS {
        for object in objects {
            object.flush().await?;
        }
    }
    Ok(())
}
