//! # Vesper Cluster
//!
//! Cluster-wide replicated objects for the Vesper publish/subscribe bus.
//!
//! A [`ReplicatedObject`] holds one part per node. Each node writes only its
//! own part with [`ReplicatedObject::set_and_share`]; the other parts arrive
//! over a [`ClusterTransport`] and are kept in sync with per-node versions.
//! Reading the whole object is a [`merge`](ReplicatedObject::merge) over the
//! current parts.
//!
//! ## Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use vesper_cluster::{
//!     object::{factory, merger},
//!     test_utils::{settle, MockCluster},
//!     ObjectConfig, ReplicatedObject,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> vesper_cluster::Result<()> {
//! let cluster = MockCluster::new();
//! let (a, b) = (cluster.node("http://a/cometd"), cluster.node("http://b/cometd"));
//! cluster.join(a.local_node_id());
//! cluster.join(b.local_node_id());
//!
//! let config = ObjectConfig::default();
//! let users_a = ReplicatedObject::start("users", a, factory::long(), &config).await?;
//! let users_b = ReplicatedObject::start("users", b, factory::long(), &config).await?;
//!
//! users_a.set_and_share(17).await?;
//! users_b.set_and_share(19).await?;
//! settle(&[&users_a, &users_b]).await?;
//!
//! assert_eq!(users_a.merge(merger::long_sum), 36);
//! assert_eq!(users_b.merge(merger::long_sum), 36);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

/// Replicated object configuration
pub mod config;

/// Cluster error types and handling
pub mod error;

/// Replicated objects, their parts, factories, mergers and listeners
pub mod object;

/// In-memory cluster for tests
pub mod test_utils;

/// Inter-node messaging capability set
pub mod transport;

/// Core types used across the cluster
pub mod types;

pub use crate::{
    config::ObjectConfig,
    error::{Error, Result},
    object::{Merger, Part, PartListener, ReplicatedObject, ValueFactory},
    transport::{ClusterTransport, MembershipListener, MessageListener},
    types::{ListenerId, NodeId},
};

/// Current version of the cluster crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
