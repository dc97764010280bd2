//! Physical table and column names for the revision schema.
//!
//! Built once at startup and shared by reference. Both the migration
//! generator and the runtime accessors read from the same [`NameConfig`], so
//! a deployment that overrides a name must hand the same config to both.
//!
//! Every struct is `#[serde(default)]`: a partial JSON document overrides only
//! the names it mentions.
//!
//! ```
//! use node_version::names::{NameConfig, TableRole};
//!
//! let names: NameConfig = serde_json::from_str(
//!     r#"{ "tables": { "event": "audit_event" }, "event": { "node_id": "entity_id" } }"#,
//! ).unwrap();
//! assert_eq!(names.table(TableRole::Event), "audit_event");
//! assert_eq!(names.table(TableRole::Role), "role");
//! assert_eq!(names.event.node_id, "entity_id");
//! assert_eq!(names.event.node_name, "node_name");
//! ```

use serde::{Deserialize, Serialize};

/// Logical table roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableRole {
    /// Base event rows.
    Event,
    /// Implementor type lookup.
    EventImplementorType,
    /// Link-change adjunct rows.
    EventLinkChange,
    /// Node-change adjunct rows.
    EventNodeChange,
    /// Fragment-register adjunct rows.
    EventNodeFragmentRegister,
    /// Role labels.
    Role,
    /// Event-to-role join rows.
    UserRole,
    /// Sparse node snapshots.
    NodeSnapshot,
}

impl TableRole {
    /// All roles in creation order.
    pub const ALL: [TableRole; 8] = [
        TableRole::EventImplementorType,
        TableRole::Event,
        TableRole::EventNodeChange,
        TableRole::NodeSnapshot,
        TableRole::EventLinkChange,
        TableRole::EventNodeFragmentRegister,
        TableRole::Role,
        TableRole::UserRole,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub event: String,
    pub event_implementor_type: String,
    pub event_link_change: String,
    pub event_node_change: String,
    pub event_node_fragment_register: String,
    pub role: String,
    pub user_role: String,
    pub node_snapshot: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            event: "event".to_string(),
            event_implementor_type: "event_implementor_type".to_string(),
            event_link_change: "event_link_change".to_string(),
            event_node_change: "event_node_change".to_string(),
            event_node_fragment_register: "event_node_fragment_register".to_string(),
            role: "role".to_string(),
            user_role: "user_role".to_string(),
            node_snapshot: "node_snapshot".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventColumns {
    pub id: String,
    pub created_at: String,
    pub user_id: String,
    pub node_name: String,
    pub node_id: String,
    pub resolver_operation: String,
    pub implementor_type_id: String,
}

impl Default for EventColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            created_at: "created_at".to_string(),
            user_id: "user_id".to_string(),
            node_name: "node_name".to_string(),
            node_id: "node_id".to_string(),
            resolver_operation: "resolver_operation".to_string(),
            implementor_type_id: "implementor_type_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementorTypeColumns {
    pub id: String,
    pub type_name: String,
}

impl Default for ImplementorTypeColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            type_name: "type".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkChangeColumns {
    pub event_id: String,
    pub node_name: String,
    pub node_id: String,
}

impl Default for LinkChangeColumns {
    fn default() -> Self {
        Self {
            event_id: "event_id".to_string(),
            node_name: "node_name".to_string(),
            node_id: "node_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeChangeColumns {
    pub event_id: String,
    pub revision_data: String,
    pub node_schema_version: String,
}

impl Default for NodeChangeColumns {
    fn default() -> Self {
        Self {
            event_id: "event_id".to_string(),
            revision_data: "revision_data".to_string(),
            node_schema_version: "node_schema_version".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentRegisterColumns {
    pub event_id: String,
    pub parent_node_name: String,
    pub parent_node_id: String,
    pub child_node_name: String,
    pub child_node_id: String,
}

impl Default for FragmentRegisterColumns {
    fn default() -> Self {
        Self {
            event_id: "event_id".to_string(),
            parent_node_name: "parent_node_name".to_string(),
            parent_node_id: "parent_node_id".to_string(),
            child_node_name: "child_node_name".to_string(),
            child_node_id: "child_node_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleColumns {
    pub id: String,
    pub role: String,
}

impl Default for RoleColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            role: "role".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRoleColumns {
    pub id: String,
    pub role_id: String,
    pub event_id: String,
}

impl Default for UserRoleColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            role_id: "role_id".to_string(),
            event_id: "event_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSnapshotColumns {
    pub event_id: String,
    pub snapshot: String,
    pub node_schema_version: String,
    pub created_at: String,
}

impl Default for NodeSnapshotColumns {
    fn default() -> Self {
        Self {
            event_id: "event_id".to_string(),
            snapshot: "snapshot".to_string(),
            node_schema_version: "node_schema_version".to_string(),
            created_at: "created_at".to_string(),
        }
    }
}

/// Resolved physical names for every table and column role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameConfig {
    /// Table names.
    pub tables: TableNames,
    /// `event` columns.
    pub event: EventColumns,
    /// `event_implementor_type` columns.
    pub event_implementor_type: ImplementorTypeColumns,
    /// `event_link_change` columns.
    pub event_link_change: LinkChangeColumns,
    /// `event_node_change` columns.
    pub event_node_change: NodeChangeColumns,
    /// `event_node_fragment_register` columns.
    pub event_node_fragment_register: FragmentRegisterColumns,
    /// `role` columns.
    pub role: RoleColumns,
    /// `user_role` columns.
    pub user_role: UserRoleColumns,
    /// `node_snapshot` columns.
    pub node_snapshot: NodeSnapshotColumns,
}

impl NameConfig {
    /// Physical name of a table role.
    pub fn table(&self, role: TableRole) -> &str {
        match role {
            TableRole::Event => &self.tables.event,
            TableRole::EventImplementorType => &self.tables.event_implementor_type,
            TableRole::EventLinkChange => &self.tables.event_link_change,
            TableRole::EventNodeChange => &self.tables.event_node_change,
            TableRole::EventNodeFragmentRegister => &self.tables.event_node_fragment_register,
            TableRole::Role => &self.tables.role,
            TableRole::UserRole => &self.tables.user_role,
            TableRole::NodeSnapshot => &self.tables.node_snapshot,
        }
    }

    /// Overrides one table name.
    pub fn with_table(mut self, role: TableRole, name: impl Into<String>) -> Self {
        let name = name.into();
        let slot = match role {
            TableRole::Event => &mut self.tables.event,
            TableRole::EventImplementorType => &mut self.tables.event_implementor_type,
            TableRole::EventLinkChange => &mut self.tables.event_link_change,
            TableRole::EventNodeChange => &mut self.tables.event_node_change,
            TableRole::EventNodeFragmentRegister => &mut self.tables.event_node_fragment_register,
            TableRole::Role => &mut self.tables.role,
            TableRole::UserRole => &mut self.tables.user_role,
            TableRole::NodeSnapshot => &mut self.tables.node_snapshot,
        };
        *slot = name;
        self
    }

    /// Prefixes every table name, e.g. `"versioning_"`.
    pub fn with_table_prefix(self, prefix: &str) -> Self {
        TableRole::ALL.into_iter().fold(self, |names, role| {
            let prefixed = format!("{prefix}{}", names.table(role));
            names.with_table(role, prefixed)
        })
    }
}
