//! Per-node parts and their wire record.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a part belongs to this node or was learned from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Owned and written by this node
    Local,
    /// Replicated from another node
    Remote,
}

/// One node's contribution to a replicated object.
#[derive(Debug, Clone, PartialEq)]
pub struct Part<T> {
    version: u64,
    node: NodeId,
    value: T,
    ownership: Ownership,
}

impl<T> Part<T> {
    pub(crate) fn local(node: NodeId, version: u64, value: T) -> Self {
        Self { version, node, value, ownership: Ownership::Local }
    }

    pub(crate) fn remote(node: NodeId, version: u64, value: T) -> Self {
        Self { version, node, value, ownership: Ownership::Remote }
    }

    /// Version stamped by the owning node. Higher always wins.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Owning node
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Current value
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the part, keeping only its value
    pub fn into_value(self) -> T {
        self.value
    }

    /// Ownership of this part
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// True for the part owned by this node
    pub fn is_local(&self) -> bool {
        self.ownership == Ownership::Local
    }
}

/// Control actions carried by a record instead of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    /// Ask the receiver to push its local part back
    Pull,
}

/// Serialized form of a part exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    /// Version of the part
    pub version: u64,
    /// Owner of the part, or the requester for a pull
    pub node_id: NodeId,
    /// Name of the replicated object
    pub name: String,
    /// Serialized part value
    #[serde(default)]
    pub value: Value,
    /// Set on point-to-point replies to the node the reply is meant for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<NodeId>,
    /// Control action, absent for plain updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RecordAction>,
}

impl PartRecord {
    pub(crate) fn pull(name: &str, from: NodeId) -> Self {
        Self {
            version: 0,
            node_id: from,
            name: name.to_string(),
            value: Value::Null,
            peer: None,
            action: Some(RecordAction::Pull),
        }
    }

    pub(crate) fn with_peer(mut self, peer: Option<NodeId>) -> Self {
        self.peer = peer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_names() {
        let record = PartRecord {
            version: 3,
            node_id: NodeId::from("http://a/cometd"),
            name: "users".to_string(),
            value: json!(["bob"]),
            peer: None,
            action: None,
        };
        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(
            encoded,
            json!({"version": 3, "nodeId": "http://a/cometd", "name": "users", "value": ["bob"]})
        );

        let pull = PartRecord::pull("users", NodeId::from("http://b/cometd"))
            .with_peer(Some(NodeId::from("http://a/cometd")));
        let encoded = serde_json::to_value(&pull).unwrap();
        assert_eq!(encoded["action"], json!("pull"));
        assert_eq!(encoded["peer"], json!("http://a/cometd"));
        assert_eq!(serde_json::from_value::<PartRecord>(encoded).unwrap(), pull);
    }

    #[test]
    fn test_part_ownership() {
        let local = Part::local(NodeId::from("a"), 0, 5);
        let remote = Part::remote(NodeId::from("b"), 2, 7);
        assert!(local.is_local());
        assert_eq!(remote.ownership(), Ownership::Remote);
        assert_eq!(remote.version(), 2);
        assert_eq!(remote.into_value(), 7);
    }
}
