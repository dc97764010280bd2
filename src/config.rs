//! JSON configuration, loaded once at startup and passed down explicitly.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{names::NameConfig, store::dialect::DialectKind};

pub const DEFAULT_SNAPSHOT_FREQUENCY: u32 = 10;
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Physical table and column names, shared by migrations and runtime.
    pub names: NameConfig,
    pub snapshot_frequency: u32,
    pub transaction_timeout_ms: u64,
    pub database_path: Option<String>,
    pub dialect: DialectKind,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            names: NameConfig::default(),
            snapshot_frequency: DEFAULT_SNAPSHOT_FREQUENCY,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            database_path: None,
            dialect: DialectKind::Sqlite,
        }
    }
}

impl VersionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config: VersionConfig = serde_json::from_str(
            r#"{ "snapshot_frequency": 3, "names": { "tables": { "role": "acl_role" } } }"#,
        )
        .expect("parse");
        assert_eq!(config.snapshot_frequency, 3);
        assert_eq!(config.transaction_timeout_ms, DEFAULT_TRANSACTION_TIMEOUT_MS);
        assert_eq!(config.names.tables.role, "acl_role");
        assert_eq!(config.names.tables.event, "event");
        assert_eq!(config.dialect, DialectKind::Sqlite);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = VersionConfig::load("/definitely/not/here.json").expect_err("missing");
        assert!(matches!(err, ConfigLoadError::Io { ref path, .. } if path.contains("here.json")));
    }
}
