//! Forward and reverse schema migration for the revision tables.
//!
//! The up direction is idempotent: every table and index is created with
//! `IF NOT EXISTS` and the implementor type seed skips existing rows. The
//! down direction drops in reverse dependency order.

use rusqlite::Connection;
use tracing::info;

use crate::{
    names::{NameConfig, TableRole},
    types::ImplementorType,
};

use super::{StoreResult, dialect::Dialect};

struct Index {
    name: String,
    columns: Vec<String>,
}

pub struct RevisionMigration<'a> {
    names: &'a NameConfig,
    dialect: &'a dyn Dialect,
}

impl<'a> RevisionMigration<'a> {
    pub fn new(names: &'a NameConfig, dialect: &'a dyn Dialect) -> Self {
        Self { names, dialect }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn references(&self, role: TableRole, column: &str) -> String {
        format!(
            "REFERENCES {} ({})",
            self.q(self.names.table(role)),
            self.q(column)
        )
    }

    fn index(&self, role: TableRole, suffix: &str, columns: &[&String]) -> Index {
        Index {
            name: format!("{}_{suffix}_idx", self.names.table(role)),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Column definitions and secondary indexes per table, in creation order.
    fn tables(&self) -> Vec<(TableRole, Vec<String>, Vec<Index>)> {
        let n = self.names;
        let d = self.dialect;
        let big = d.big_integer();
        let key = d.key_text();
        let payload = d.payload_text();
        let serial = d.auto_increment_primary_key();
        let col = |name: &str, ty: &str| format!("{} {ty}", self.q(name));
        let event_fk = |name: &str| {
            format!(
                "{} {big} PRIMARY KEY {}",
                self.q(name),
                self.references(TableRole::Event, &n.event.id)
            )
        };

        TableRole::ALL
            .into_iter()
            .map(|role| {
                let (columns, indexes) = match role {
                    TableRole::EventImplementorType => {
                        let c = &n.event_implementor_type;
                        (
                            vec![
                                col(&c.id, &format!("{big} PRIMARY KEY")),
                                col(&c.type_name, &format!("{key} NOT NULL UNIQUE")),
                            ],
                            vec![],
                        )
                    }
                    TableRole::Event => {
                        let c = &n.event;
                        (
                            vec![
                                col(&c.id, serial),
                                col(&c.created_at, &format!("{big} NOT NULL")),
                                col(&c.user_id, &format!("{key} NOT NULL")),
                                col(&c.node_name, &format!("{key} NOT NULL")),
                                col(&c.node_id, &format!("{key} NOT NULL")),
                                col(&c.resolver_operation, &format!("{key} NOT NULL")),
                                format!(
                                    "{} {big} NOT NULL {}",
                                    self.q(&c.implementor_type_id),
                                    self.references(
                                        TableRole::EventImplementorType,
                                        &n.event_implementor_type.id
                                    )
                                ),
                            ],
                            vec![
                                self.index(
                                    role,
                                    "node",
                                    &[&c.node_name, &c.node_id, &c.created_at],
                                ),
                                self.index(role, "created_at", &[&c.created_at]),
                            ],
                        )
                    }
                    TableRole::EventNodeChange => {
                        let c = &n.event_node_change;
                        (
                            vec![
                                event_fk(&c.event_id),
                                col(&c.revision_data, &format!("{payload} NOT NULL")),
                                col(&c.node_schema_version, &format!("{big} NOT NULL")),
                            ],
                            vec![],
                        )
                    }
                    TableRole::NodeSnapshot => {
                        let c = &n.node_snapshot;
                        (
                            vec![
                                event_fk(&c.event_id),
                                col(&c.snapshot, &format!("{payload} NOT NULL")),
                                col(&c.node_schema_version, &format!("{big} NOT NULL")),
                                col(&c.created_at, &format!("{big} NOT NULL")),
                            ],
                            vec![],
                        )
                    }
                    TableRole::EventLinkChange => {
                        let c = &n.event_link_change;
                        (
                            vec![
                                event_fk(&c.event_id),
                                col(&c.node_name, &format!("{key} NOT NULL")),
                                col(&c.node_id, &format!("{key} NOT NULL")),
                            ],
                            vec![self.index(role, "link", &[&c.node_name, &c.node_id])],
                        )
                    }
                    TableRole::EventNodeFragmentRegister => {
                        let c = &n.event_node_fragment_register;
                        (
                            vec![
                                event_fk(&c.event_id),
                                col(&c.parent_node_name, &format!("{key} NOT NULL")),
                                col(&c.parent_node_id, &format!("{key} NOT NULL")),
                                col(&c.child_node_name, &format!("{key} NOT NULL")),
                                col(&c.child_node_id, &format!("{key} NOT NULL")),
                            ],
                            vec![self.index(
                                role,
                                "parent",
                                &[&c.parent_node_name, &c.parent_node_id],
                            )],
                        )
                    }
                    TableRole::Role => {
                        let c = &n.role;
                        (
                            vec![
                                col(&c.id, serial),
                                col(&c.role, &format!("{key} NOT NULL UNIQUE")),
                            ],
                            vec![],
                        )
                    }
                    TableRole::UserRole => {
                        let c = &n.user_role;
                        (
                            vec![
                                col(&c.id, serial),
                                format!(
                                    "{} {big} NOT NULL {}",
                                    self.q(&c.role_id),
                                    self.references(TableRole::Role, &n.role.id)
                                ),
                                format!(
                                    "{} {big} NOT NULL {}",
                                    self.q(&c.event_id),
                                    self.references(TableRole::Event, &n.event.id)
                                ),
                            ],
                            vec![self.index(role, "event", &[&c.event_id])],
                        )
                    }
                };
                (role, columns, indexes)
            })
            .collect()
    }

    fn index_columns(&self, index: &Index) -> String {
        index
            .columns
            .iter()
            .map(|c| self.q(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn up_statements(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (role, mut columns, indexes) in self.tables() {
            let table = self.q(self.names.table(role));
            if !self.dialect.supports_index_if_not_exists() {
                for index in &indexes {
                    columns.push(format!(
                        "INDEX {} ({})",
                        self.q(&index.name),
                        self.index_columns(index)
                    ));
                }
            }
            out.push(format!(
                "CREATE TABLE IF NOT EXISTS {table} ({})",
                columns.join(", ")
            ));
            if self.dialect.supports_index_if_not_exists() {
                for index in &indexes {
                    out.push(format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {table} ({})",
                        self.q(&index.name),
                        self.index_columns(index)
                    ));
                }
            }
        }

        let c = &self.names.event_implementor_type;
        let seed = ImplementorType::ALL
            .iter()
            .map(|kind| format!("({}, '{}')", kind.id(), kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        out.push(self.dialect.insert_ignore(
            &self.names.tables.event_implementor_type,
            &[c.id.as_str(), c.type_name.as_str()],
            &seed,
        ));
        out
    }

    pub fn down_statements(&self) -> Vec<String> {
        TableRole::ALL
            .iter()
            .rev()
            .map(|role| format!("DROP TABLE IF EXISTS {}", self.q(self.names.table(*role))))
            .collect()
    }

    /// Creates every revision table on a SQLite connection.
    pub fn apply_up(&self, conn: &mut Connection) -> StoreResult<()> {
        self.apply(conn, self.up_statements())?;
        info!(event_table = %self.names.tables.event, "revision tables migrated");
        Ok(())
    }

    /// Drops every revision table on a SQLite connection.
    pub fn apply_down(&self, conn: &mut Connection) -> StoreResult<()> {
        self.apply(conn, self.down_statements())?;
        info!(event_table = %self.names.tables.event, "revision tables rolled back");
        Ok(())
    }

    fn apply(&self, conn: &mut Connection, statements: Vec<String>) -> StoreResult<()> {
        let tx = conn.transaction()?;
        for statement in statements {
            tx.execute(&statement, [])?;
        }
        tx.commit()?;
        Ok(())
    }
}
