//! Event write model (what the recorder persists) and read model (what the
//! reconstructor pages over).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EventId, EventPosition, ImplementorType, NodeRef, SchemaVersion, TimestampMs};

/// Facts shared by every event derived from one recorded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfoBase {
    /// Event timestamp.
    pub created_at: TimestampMs,
    /// Acting user.
    pub user_id: String,
    /// Node the operation returned.
    pub node: NodeRef,
    /// Free-form operation label, e.g. `"create"`.
    pub resolver_operation: String,
    /// Roles the acting user held when the event happened.
    pub user_roles: Vec<String>,
    /// Snapshot frequency in effect for this operation.
    pub snapshot_frequency: u32,
}

/// Node-change payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChangeInfo {
    /// Opaque serialized patch.
    pub revision_data: Value,
    /// Node schema version the patch applies to.
    pub node_schema_version: SchemaVersion,
    /// Full node state, when the snapshot policy asked for one.
    pub snapshot: Option<Value>,
}

/// Link-change payload: the node on the other side of the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkChangeInfo {
    /// Linked node.
    pub link_node: NodeRef,
}

/// Fragment-register payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentRegisterInfo {
    /// Composite node.
    pub parent: NodeRef,
    /// Node that is a compositional part of `parent`.
    pub child: NodeRef,
}

/// Implementor-specific facts of an event to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventFact {
    /// Node content changed.
    NodeChange(NodeChangeInfo),
    /// An edge touching the node changed.
    LinkChange(LinkChangeInfo),
    /// A child node was registered as a fragment.
    FragmentRegister(FragmentRegisterInfo),
}

impl EventFact {
    /// Adjunct table discriminator.
    pub fn implementor_type(&self) -> ImplementorType {
        match self {
            Self::NodeChange(_) => ImplementorType::NodeChange,
            Self::LinkChange(_) => ImplementorType::LinkChange,
            Self::FragmentRegister(_) => ImplementorType::NodeFragmentChange,
        }
    }
}

/// One event ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Shared base facts.
    pub base: EventInfoBase,
    /// Implementor facts.
    pub fact: EventFact,
}

/// Implementor facts of a persisted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionFact {
    /// Node content changed.
    #[serde(rename_all = "camelCase")]
    NodeChange {
        /// Opaque serialized patch.
        revision_data: Value,
        /// Node schema version.
        node_schema_version: SchemaVersion,
        /// Full node state if one was stored.
        snapshot: Option<Value>,
    },
    /// Edge change seen from `VersionRecord::node`.
    #[serde(rename_all = "camelCase")]
    LinkChange {
        /// Node on the other side of the edge.
        link_node: NodeRef,
    },
    /// Fragment registration.
    #[serde(rename_all = "camelCase")]
    FragmentRegister {
        /// Composite node.
        parent: NodeRef,
        /// Registered child.
        child: NodeRef,
    },
}

/// A persisted event with its implementor facts joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Event id.
    pub id: EventId,
    /// Event timestamp.
    pub created_at: TimestampMs,
    /// Acting user.
    pub user_id: String,
    /// Roles attached to the event. Only populated where explicitly loaded.
    pub user_roles: Vec<String>,
    /// Node the event is anchored at.
    pub node: NodeRef,
    /// Operation label.
    pub resolver_operation: String,
    /// Implementor facts.
    pub fact: VersionFact,
}

impl VersionRecord {
    /// Stream position of this event.
    pub fn position(&self) -> EventPosition {
        EventPosition {
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// Adjunct table discriminator.
    pub fn implementor_type(&self) -> ImplementorType {
        match self.fact {
            VersionFact::NodeChange { .. } => ImplementorType::NodeChange,
            VersionFact::LinkChange { .. } => ImplementorType::LinkChange,
            VersionFact::FragmentRegister { .. } => ImplementorType::NodeFragmentChange,
        }
    }

    /// Snapshot carried by a node-change event.
    pub fn snapshot(&self) -> Option<&Value> {
        match &self.fact {
            VersionFact::NodeChange { snapshot, .. } => snapshot.as_ref(),
            _ => None,
        }
    }

    /// Value of a pageable attribute, as used in cursors.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        let value = match (name, &self.fact) {
            ("id", _) => Value::from(self.id),
            ("createdAt", _) => Value::from(self.created_at),
            ("userId", _) => Value::from(self.user_id.clone()),
            ("nodeName", _) => Value::from(self.node.node_name.clone()),
            ("nodeId", _) => Value::from(self.node.node_id.clone()),
            ("resolverOperation", _) => Value::from(self.resolver_operation.clone()),
            ("type", _) => Value::from(self.implementor_type().id()),
            ("nodeSchemaVersion", VersionFact::NodeChange { node_schema_version, .. }) => {
                Value::from(*node_schema_version)
            }
            ("linkNodeName", VersionFact::LinkChange { link_node }) => {
                Value::from(link_node.node_name.clone())
            }
            ("linkNodeId", VersionFact::LinkChange { link_node }) => {
                Value::from(link_node.node_id.clone())
            }
            ("nodeSchemaVersion" | "linkNodeName" | "linkNodeId", _) => Value::Null,
            _ => return None,
        };
        Some(value)
    }
}
