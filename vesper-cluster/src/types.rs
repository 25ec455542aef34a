//! # Core Types
//!
//! Identifiers used throughout the cluster layer.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    sync::Arc,
};
use uuid::Uuid;

pub use vesper_core::ListenerId;

/// Identifier of a node in the cluster, usually the URL it is reachable at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Generate a new unique node id
    pub fn generate() -> Self {
        Self(format!("node-{}", Uuid::new_v4().simple()).into())
    }

    /// Create a node id from a URL or any other unique string
    pub fn new(url: impl AsRef<str>) -> Self {
        Self(url.as_ref().into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for NodeId {
    fn from(url: String) -> Self {
        Self(url.into())
    }
}
