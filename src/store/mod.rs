//! Persistence for the event graph.
//!
//! [`EventStore`] is a cloneable async handle around one SQLite connection.
//! Every call hops onto the blocking pool and holds the connection lock for
//! the duration of one unit of work, so a recorded operation's rows land in
//! a single transaction.

pub mod dialect;
pub mod migration;
pub mod sql;
pub mod tx;

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use hashbrown::HashMap;
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    config::DEFAULT_TRANSACTION_TIMEOUT_MS,
    event::{EventInfo, VersionRecord},
    names::NameConfig,
    page::{AttributeMap, PagePlan},
    types::{EventId, EventPosition, NodeRef, SchemaVersion},
};

use self::{
    dialect::{Dialect, SqliteDialect},
    migration::RevisionMigration,
    sql::Tables,
    tx::DeadlineTx,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("transaction exceeded its {timeout_ms} ms deadline")]
    TransactionTimeout { timeout_ms: u64 },
    #[error("blocking task failed: {0}")]
    Join(String),
    #[error("corrupt revision data: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lock wait used when no transaction timeout is configured.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TRANSACTION_TIMEOUT_MS);

#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
    names: Arc<NameConfig>,
    dialect: &'static dyn Dialect,
    busy_timeout: Duration,
}

impl EventStore {
    /// Opens or creates a database at `path` with [`DEFAULT_BUSY_TIMEOUT`].
    pub fn open(path: impl AsRef<Path>, names: NameConfig) -> StoreResult<Self> {
        Self::open_with_timeout(path, names, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens or creates a database at `path`.
    ///
    /// Enables WAL mode, foreign keys and a busy timeout of `busy_timeout`,
    /// which should match the recorder's transaction timeout. Tables are not
    /// created; call [`EventStore::migrate`] for that.
    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        names: NameConfig,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, names, busy_timeout)
    }

    pub fn open_in_memory(names: NameConfig) -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, names, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(conn: Connection, names: NameConfig, busy_timeout: Duration) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            names: Arc::new(names),
            dialect: &SqliteDialect,
            busy_timeout,
        })
    }

    pub fn names(&self) -> &NameConfig {
        &self.names
    }

    /// Pageable attributes of version rows under this store's names.
    pub fn version_attributes(&self) -> AttributeMap {
        sql::version_attributes(&self.names, self.dialect)
    }

    async fn run<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &NameConfig, &dyn Dialect) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let names = Arc::clone(&self.names);
        let dialect = self.dialect;
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            work(&mut *conn, &names, dialect)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn read<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tables<'_>) -> StoreResult<T> + Send + 'static,
    {
        self.run(move |conn, names, dialect| work(&Tables::new(conn, names, dialect)))
            .await
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        self.run(|conn, names, dialect| RevisionMigration::new(names, dialect).apply_up(conn))
            .await
    }

    pub async fn rollback(&self) -> StoreResult<()> {
        self.run(|conn, names, dialect| RevisionMigration::new(names, dialect).apply_down(conn))
            .await
    }

    /// Runs `work` inside one immediate transaction bounded by `timeout`.
    ///
    /// The deadline starts before the connection lock is taken, and SQLite's
    /// lock wait is capped at whatever is left of it. `work` returning an
    /// error rolls everything back.
    pub async fn in_transaction<T, E, F>(&self, timeout: Duration, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&DeadlineTx<'_>, &Tables<'_>) -> Result<T, E> + Send + 'static,
    {
        let started = Instant::now();
        let busy_timeout = self.busy_timeout;
        self.run(move |conn, names, dialect| {
            let outcome = write_unit(conn, names, dialect, started, timeout, work);
            conn.busy_timeout(busy_timeout)?;
            Ok(outcome)
        })
        .await?
    }

    /// Writes every event of one recorded operation atomically.
    ///
    /// Returns the assigned ids in input order. If `timeout` elapses before
    /// commit, nothing is written and [`StoreError::TransactionTimeout`] is
    /// returned.
    pub async fn persist_events(
        &self,
        events: Vec<EventInfo>,
        timeout: Duration,
    ) -> StoreResult<Vec<EventId>> {
        let ids = self
            .in_transaction(timeout, move |tx, tables| -> StoreResult<Vec<EventId>> {
                let mut ids = Vec::with_capacity(events.len());
                for event in &events {
                    tx.check()?;
                    ids.push(tables.insert_event_graph(event)?);
                }
                Ok(ids)
            })
            .await?;
        debug!(count = ids.len(), "persisted event graph");
        Ok(ids)
    }

    /// The connection's current SQLite busy timeout.
    pub async fn busy_timeout(&self) -> StoreResult<Duration> {
        self.run(|conn, _, _| {
            let ms: i64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
            Ok(Duration::from_millis(ms.max(0) as u64))
        })
        .await
    }

    /// Snapshot presence of the newest `limit` node changes, newest first.
    pub async fn recent_snapshot_flags(
        &self,
        node: NodeRef,
        node_schema_version: SchemaVersion,
        limit: usize,
    ) -> StoreResult<Vec<bool>> {
        self.read(move |t| t.recent_snapshot_flags(&node, node_schema_version, limit))
            .await
    }

    pub async fn fragment_children(&self, parent: NodeRef) -> StoreResult<Vec<NodeRef>> {
        self.read(move |t| t.fragment_children(&parent)).await
    }

    pub async fn page_versions(
        &self,
        instances: Vec<NodeRef>,
        plan: PagePlan,
    ) -> StoreResult<Vec<VersionRecord>> {
        self.read(move |t| t.page_versions(&instances, &plan)).await
    }

    pub async fn nearest_snapshot(
        &self,
        node: NodeRef,
        at: EventPosition,
    ) -> StoreResult<Option<EventPosition>> {
        self.read(move |t| t.nearest_snapshot(&node, at)).await
    }

    pub async fn earliest_position(
        &self,
        instances: Vec<NodeRef>,
    ) -> StoreResult<Option<EventPosition>> {
        self.read(move |t| t.earliest_position(&instances)).await
    }

    pub async fn versions_between(
        &self,
        instances: Vec<NodeRef>,
        oldest: EventPosition,
        youngest: EventPosition,
    ) -> StoreResult<Vec<VersionRecord>> {
        self.read(move |t| t.versions_between(&instances, oldest, youngest))
            .await
    }

    pub async fn version(&self, id: EventId) -> StoreResult<Option<VersionRecord>> {
        self.read(move |t| {
            let Some(mut record) = t.version(id)? else {
                return Ok(None);
            };
            record.user_roles = t.roles_for_events(&[id])?.remove(&id).unwrap_or_default();
            Ok(Some(record))
        })
        .await
    }

    /// Every event anchored at `node`, oldest first, with roles attached.
    pub async fn node_history(&self, node: NodeRef) -> StoreResult<Vec<VersionRecord>> {
        self.read(move |t| {
            let mut history = t.node_history(&node)?;
            let ids: Vec<EventId> = history.iter().map(|r| r.id).collect();
            let mut roles = t.roles_for_events(&ids)?;
            for record in &mut history {
                record.user_roles = roles.remove(&record.id).unwrap_or_default();
            }
            Ok(history)
        })
        .await
    }

    pub async fn roles_for_events(
        &self,
        ids: Vec<EventId>,
    ) -> StoreResult<HashMap<EventId, Vec<String>>> {
        self.read(move |t| t.roles_for_events(&ids)).await
    }

    /// Row count of one revision table.
    pub async fn count(&self, table: impl Into<String>) -> StoreResult<i64> {
        let table = table.into();
        self.read(move |t| t.count(&table)).await
    }
}

fn write_unit<T, E, F>(
    conn: &mut Connection,
    names: &NameConfig,
    dialect: &dyn Dialect,
    started: Instant,
    timeout: Duration,
    work: F,
) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&DeadlineTx<'_>, &Tables<'_>) -> Result<T, E>,
{
    let tx = DeadlineTx::begin(conn, started, timeout)?;
    let out = {
        let tables = tx.tables(names, dialect);
        work(&tx, &tables)?
    };
    tx.commit()?;
    Ok(out)
}
