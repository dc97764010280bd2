//! Shared primitive IDs, node references and event discriminators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned, strictly increasing event identifier.
pub type EventId = i64;
/// Application-level node identifier.
pub type NodeId = String;
/// Schema version of a node's serialized shape.
pub type SchemaVersion = i64;
/// Timestamp in milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Composite logical key of a versioned node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    /// Node type name, e.g. `"user"`.
    pub node_name: String,
    /// Node identifier within its type.
    pub node_id: NodeId,
}

impl NodeRef {
    /// Builds a reference from any displayable id.
    pub fn new(node_name: impl Into<String>, node_id: impl ToString) -> Self {
        Self {
            node_name: node_name.into(),
            node_id: node_id.to_string(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_name, self.node_id)
    }
}

/// Discriminator selecting the adjunct table that holds an event's facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImplementorType {
    /// Row in the node-change table.
    NodeChange,
    /// Row in the fragment-register table.
    NodeFragmentChange,
    /// Row in the link-change table.
    LinkChange,
}

impl ImplementorType {
    /// Every implementor type, in id order.
    pub const ALL: [ImplementorType; 3] = [
        ImplementorType::NodeChange,
        ImplementorType::NodeFragmentChange,
        ImplementorType::LinkChange,
    ];

    /// Persisted id.
    pub fn id(self) -> i64 {
        match self {
            Self::NodeChange => 1,
            Self::NodeFragmentChange => 2,
            Self::LinkChange => 3,
        }
    }

    /// Persisted type label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeChange => "NODE_CHANGE",
            Self::NodeFragmentChange => "NODE_FRAGMENT_CHANGE",
            Self::LinkChange => "LINK_CHANGE",
        }
    }
}

impl TryFrom<i64> for ImplementorType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::NodeChange),
            2 => Ok(Self::NodeFragmentChange),
            3 => Ok(Self::LinkChange),
            other => Err(other),
        }
    }
}

/// Position of an event in stream order.
///
/// Ordering compares `created_at` first and breaks ties on `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPosition {
    /// Event timestamp.
    pub created_at: TimestampMs,
    /// Event id.
    pub id: EventId,
}
