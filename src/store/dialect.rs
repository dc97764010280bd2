//! Backend-specific SQL idioms behind one trait.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// SQLite, executed through rusqlite.
    Sqlite,
    /// PostgreSQL, DDL generation only.
    Postgres,
    /// MySQL, DDL generation only.
    Mysql,
}

impl DialectKind {
    /// Dialect implementation for this backend.
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::Sqlite => &SqliteDialect,
            Self::Postgres => &PostgresDialect,
            Self::Mysql => &MysqlDialect,
        }
    }
}

/// How an insert reports the id it assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastInsertId {
    /// Append this clause to the insert and read the single returned row.
    Returning(String),
    /// Run this query right after the insert on the same connection.
    FollowUpQuery(String),
}

pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn last_insert_id(&self, id_column: &str) -> LastInsertId;

    /// Column definition for an auto-assigned integer primary key.
    fn auto_increment_primary_key(&self) -> &'static str;

    fn big_integer(&self) -> &'static str {
        "BIGINT"
    }

    /// Type for short identifiers that take part in keys and indexes.
    fn key_text(&self) -> &'static str {
        "TEXT"
    }

    /// Type for serialized payloads.
    fn payload_text(&self) -> &'static str {
        "TEXT"
    }

    /// Insert that silently skips rows violating a unique constraint.
    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String;

    /// Whether `CREATE INDEX IF NOT EXISTS` is accepted.
    fn supports_index_if_not_exists(&self) -> bool {
        true
    }
}

fn column_list(dialect: &dyn Dialect, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn last_insert_id(&self, id_column: &str) -> LastInsertId {
        LastInsertId::Returning(format!(" RETURNING {}", self.quote(id_column)))
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn big_integer(&self) -> &'static str {
        "INTEGER"
    }

    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String {
        format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES {values}",
            self.quote(table),
            column_list(self, columns)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn last_insert_id(&self, id_column: &str) -> LastInsertId {
        LastInsertId::Returning(format!(" RETURNING {}", self.quote(id_column)))
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {values} ON CONFLICT DO NOTHING",
            self.quote(table),
            column_list(self, columns)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn last_insert_id(&self, _id_column: &str) -> LastInsertId {
        LastInsertId::FollowUpQuery("SELECT LAST_INSERT_ID()".to_string())
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        "BIGINT AUTO_INCREMENT PRIMARY KEY"
    }

    fn key_text(&self) -> &'static str {
        "VARCHAR(255)"
    }

    fn payload_text(&self) -> &'static str {
        "LONGTEXT"
    }

    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String {
        format!(
            "INSERT IGNORE INTO {} ({}) VALUES {values}",
            self.quote(table),
            column_list(self, columns)
        )
    }

    fn supports_index_if_not_exists(&self) -> bool {
        false
    }
}
