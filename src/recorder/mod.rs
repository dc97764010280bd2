//! Version recorder: wraps a mutating resolver and writes the event graph
//! for every successful invocation.
//!
//! Per call the recorder
//!
//! 1. runs the wrapped resolver and keeps its node,
//! 2. extracts the node id from that node,
//! 3. builds the shared event base,
//! 4. derives the node-change, fragment-register and link-change events,
//! 5. asks the snapshot policy whether the node change carries full state,
//! 6. persists all events in one deadline-bounded transaction,
//! 7. returns the node unchanged.
//!
//! The resolver's own write is never rolled back by a recording failure.
//!
//! [`VersionRecorder::wrap_in_transaction`] is the opt-in alternative: the
//! domain write runs synchronously on the recorder's transaction, so it
//! commits or rolls back together with its events.

pub mod extract;
pub mod snapshot;

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::BoxFuture;
use rusqlite::Connection;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, info_span, warn};

use crate::{
    BoxError,
    config::VersionConfig,
    event::{EventFact, EventInfo, EventInfoBase},
    resolver::{Call, Resolver},
    store::{EventStore, StoreError},
    types::{EventId, NodeId, NodeRef, SchemaVersion, TimestampMs},
};

use self::extract::{ExtractionError, LinkEdge};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing mandatory extractor `{0}`")]
    MissingExtractor(&'static str),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("wrapped resolver failed: {0}")]
    Resolver(BoxError),
    #[error("resolver for `{node_name}` returned a node without an id")]
    MissingNodeId { node_name: String },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("version transaction exceeded its {timeout_ms} ms deadline")]
    TransactionTimeout { timeout_ms: u64 },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RecordError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::TransactionTimeout { timeout_ms } => Self::TransactionTimeout { timeout_ms },
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Used when the extractor set has no per-call frequency.
    pub snapshot_frequency: u32,
    pub transaction_timeout: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshot_frequency: 10,
            transaction_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&VersionConfig> for RecorderConfig {
    fn from(config: &VersionConfig) -> Self {
        Self {
            snapshot_frequency: config.snapshot_frequency,
            transaction_timeout: Duration::from_millis(config.transaction_timeout_ms),
        }
    }
}

type Extract<P, A, C, T> = Arc<dyn Fn(&Call<P, A, C>) -> T + Send + Sync>;
type ExtractNodeId<P, A, C, N> = Arc<dyn Fn(&N, &Call<P, A, C>) -> Option<NodeId> + Send + Sync>;
type SnapshotAccessor<P, A, C> =
    Arc<dyn Fn(&NodeId, &Call<P, A, C>) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
type TxSnapshotAccessor<P, A, C> =
    Arc<dyn Fn(&Connection, &NodeId, &Call<P, A, C>) -> Result<Value, BoxError> + Send + Sync>;
type TxOp<P, A, C, N> = Arc<dyn Fn(&Connection, &Call<P, A, C>) -> Result<N, BoxError> + Send + Sync>;

/// Extractors the recorder reads event facts through.
pub struct ExtractorSet<P, A, C, N> {
    user_id: Extract<P, A, C, String>,
    user_roles: Extract<P, A, C, Vec<String>>,
    revision_data: Extract<P, A, C, Value>,
    event_time: Option<Extract<P, A, C, TimestampMs>>,
    node_id: ExtractNodeId<P, A, C, N>,
    node_schema_version: Extract<P, A, C, SchemaVersion>,
    node_name: Extract<P, A, C, String>,
    resolver_operation: Option<Extract<P, A, C, String>>,
    current_node_snapshot: Option<SnapshotAccessor<P, A, C>>,
    current_node_snapshot_in_transaction: Option<TxSnapshotAccessor<P, A, C>>,
    current_node_snapshot_frequency: Option<Extract<P, A, C, u32>>,
    parent_node: Option<Extract<P, A, C, Option<NodeRef>>>,
    edges: Option<Extract<P, A, C, Vec<LinkEdge>>>,
}

impl<P, A, C, N> ExtractorSet<P, A, C, N> {
    pub fn builder() -> ExtractorSetBuilder<P, A, C, N> {
        ExtractorSetBuilder::default()
    }
}

pub struct ExtractorSetBuilder<P, A, C, N> {
    user_id: Option<Extract<P, A, C, String>>,
    user_roles: Option<Extract<P, A, C, Vec<String>>>,
    revision_data: Option<Extract<P, A, C, Value>>,
    event_time: Option<Extract<P, A, C, TimestampMs>>,
    node_id: Option<ExtractNodeId<P, A, C, N>>,
    node_schema_version: Option<Extract<P, A, C, SchemaVersion>>,
    node_name: Option<Extract<P, A, C, String>>,
    resolver_operation: Option<Extract<P, A, C, String>>,
    current_node_snapshot: Option<SnapshotAccessor<P, A, C>>,
    current_node_snapshot_in_transaction: Option<TxSnapshotAccessor<P, A, C>>,
    current_node_snapshot_frequency: Option<Extract<P, A, C, u32>>,
    parent_node: Option<Extract<P, A, C, Option<NodeRef>>>,
    edges: Option<Extract<P, A, C, Vec<LinkEdge>>>,
}

impl<P, A, C, N> Default for ExtractorSetBuilder<P, A, C, N> {
    fn default() -> Self {
        Self {
            user_id: None,
            user_roles: None,
            revision_data: None,
            event_time: None,
            node_id: None,
            node_schema_version: None,
            node_name: None,
            resolver_operation: None,
            current_node_snapshot: None,
            current_node_snapshot_in_transaction: None,
            current_node_snapshot_frequency: None,
            parent_node: None,
            edges: None,
        }
    }
}

impl<P, A, C, N> ExtractorSetBuilder<P, A, C, N> {
    pub fn user_id(mut self, f: impl Fn(&Call<P, A, C>) -> String + Send + Sync + 'static) -> Self {
        self.user_id = Some(Arc::new(f));
        self
    }

    pub fn user_roles(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.user_roles = Some(Arc::new(f));
        self
    }

    pub fn revision_data(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.revision_data = Some(Arc::new(f));
        self
    }

    pub fn event_time(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> TimestampMs + Send + Sync + 'static,
    ) -> Self {
        self.event_time = Some(Arc::new(f));
        self
    }

    /// Reads the id off the node the resolver returned.
    pub fn node_id(
        mut self,
        f: impl Fn(&N, &Call<P, A, C>) -> Option<NodeId> + Send + Sync + 'static,
    ) -> Self {
        self.node_id = Some(Arc::new(f));
        self
    }

    pub fn node_schema_version(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> SchemaVersion + Send + Sync + 'static,
    ) -> Self {
        self.node_schema_version = Some(Arc::new(f));
        self
    }

    pub fn node_name(mut self, f: impl Fn(&Call<P, A, C>) -> String + Send + Sync + 'static) -> Self {
        self.node_name = Some(Arc::new(f));
        self
    }

    /// Defaults to the resolver's field name.
    pub fn resolver_operation(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.resolver_operation = Some(Arc::new(f));
        self
    }

    /// Loads full node state. Only called when the snapshot policy asks.
    pub fn current_node_snapshot<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&NodeId, &Call<P, A, C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
        P: 'static,
        A: 'static,
        C: 'static,
        N: 'static,
    {
        self.current_node_snapshot = Some(Arc::new(move |id: &NodeId, call: &Call<P, A, C>| {
            Box::pin(f(id, call)) as BoxFuture<'static, Result<Value, BoxError>>
        }));
        self
    }

    /// Snapshot accessor for [`VersionRecorder::wrap_in_transaction`]. Reads
    /// through the open transaction, so it sees the uncommitted domain write.
    pub fn current_node_snapshot_in_transaction(
        mut self,
        f: impl Fn(&Connection, &NodeId, &Call<P, A, C>) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.current_node_snapshot_in_transaction = Some(Arc::new(f));
        self
    }

    pub fn current_node_snapshot_frequency(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> u32 + Send + Sync + 'static,
    ) -> Self {
        self.current_node_snapshot_frequency = Some(Arc::new(f));
        self
    }

    pub fn parent_node(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> Option<NodeRef> + Send + Sync + 'static,
    ) -> Self {
        self.parent_node = Some(Arc::new(f));
        self
    }

    pub fn edges(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> Vec<LinkEdge> + Send + Sync + 'static,
    ) -> Self {
        self.edges = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<ExtractorSet<P, A, C, N>, ConfigError> {
        use ConfigError::MissingExtractor;
        Ok(ExtractorSet {
            user_id: self.user_id.ok_or(MissingExtractor("userId"))?,
            user_roles: self.user_roles.ok_or(MissingExtractor("userRoles"))?,
            revision_data: self.revision_data.ok_or(MissingExtractor("revisionData"))?,
            event_time: self.event_time,
            node_id: self.node_id.ok_or(MissingExtractor("nodeId"))?,
            node_schema_version: self
                .node_schema_version
                .ok_or(MissingExtractor("nodeSchemaVersion"))?,
            node_name: self.node_name.ok_or(MissingExtractor("nodeName"))?,
            resolver_operation: self.resolver_operation,
            current_node_snapshot: self.current_node_snapshot,
            current_node_snapshot_in_transaction: self.current_node_snapshot_in_transaction,
            current_node_snapshot_frequency: self.current_node_snapshot_frequency,
            parent_node: self.parent_node,
            edges: self.edges,
        })
    }
}

/// Events of one call, before the snapshot decision.
struct PendingEvents {
    base: EventInfoBase,
    node_id: NodeId,
    node_schema_version: SchemaVersion,
    node_change: EventInfo,
    rest: Vec<EventInfo>,
}

impl PendingEvents {
    fn attach_snapshot(&mut self, state: Value) {
        if let EventFact::NodeChange(change) = &mut self.node_change.fact {
            change.snapshot = Some(state);
        }
    }

    fn into_events(self) -> Vec<EventInfo> {
        let mut events = Vec::with_capacity(1 + self.rest.len());
        events.push(self.node_change);
        events.extend(self.rest);
        events
    }
}

impl<P, A, C, N> ExtractorSet<P, A, C, N> {
    fn pending(
        &self,
        default_frequency: u32,
        node: &N,
        call: &Call<P, A, C>,
    ) -> Result<PendingEvents, RecordError> {
        let node_name = (self.node_name)(call);
        let Some(node_id) = (self.node_id)(node, call) else {
            return Err(RecordError::MissingNodeId { node_name });
        };

        let base = EventInfoBase {
            created_at: self.event_time.as_ref().map_or_else(now_ms, |f| f(call)),
            user_id: (self.user_id)(call),
            node: NodeRef {
                node_name,
                node_id: node_id.clone(),
            },
            resolver_operation: self
                .resolver_operation
                .as_ref()
                .map_or_else(|| call.info.field_name.clone(), |f| f(call)),
            user_roles: (self.user_roles)(call),
            snapshot_frequency: self
                .current_node_snapshot_frequency
                .as_ref()
                .map_or(default_frequency, |f| f(call)),
        };
        let node_schema_version = (self.node_schema_version)(call);

        let node_change =
            extract::node_change_event(&base, (self.revision_data)(call), node_schema_version)?;
        let mut rest: Vec<EventInfo> =
            extract::fragment_register_event(&base, self.parent_node.as_ref().and_then(|f| f(call)))?
                .into_iter()
                .collect();
        let edges = self.edges.as_ref().map(|f| f(call)).unwrap_or_default();
        rest.extend(extract::link_change_events(&base, &edges)?);

        Ok(PendingEvents {
            base,
            node_id,
            node_schema_version,
            node_change,
            rest,
        })
    }
}

pub(crate) fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct VersionRecorder {
    store: EventStore,
    config: RecorderConfig,
}

impl VersionRecorder {
    pub fn new(store: EventStore, config: RecorderConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Wraps `op`. Fails before any call if a mandatory extractor is missing.
    pub fn wrap<R, P, A, C>(
        &self,
        op: R,
        extractors: ExtractorSetBuilder<P, A, C, R::Output>,
    ) -> Result<RecordedResolver<R, P, A, C>, ConfigError>
    where
        R: Resolver<P, A, C>,
    {
        let extractors = extractors.build()?;
        let snapshot = extractors
            .current_node_snapshot
            .clone()
            .ok_or(ConfigError::MissingExtractor("currentNodeSnapshot"))?;
        Ok(RecordedResolver {
            op,
            extractors,
            snapshot,
            store: self.store.clone(),
            config: self.config.clone(),
        })
    }

    /// Wraps a synchronous domain write that runs on the recorder's own
    /// transaction. The write and its events commit together, and any
    /// recording failure rolls both back.
    ///
    /// Requires [`ExtractorSetBuilder::current_node_snapshot_in_transaction`]
    /// in place of the async snapshot accessor.
    pub fn wrap_in_transaction<F, E, P, A, C, N>(
        &self,
        op: F,
        extractors: ExtractorSetBuilder<P, A, C, N>,
    ) -> Result<TransactionalResolver<P, A, C, N>, ConfigError>
    where
        F: Fn(&Connection, &Call<P, A, C>) -> Result<N, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        P: 'static,
        A: 'static,
        C: 'static,
        N: 'static,
    {
        let extractors = extractors.build()?;
        let snapshot = extractors
            .current_node_snapshot_in_transaction
            .clone()
            .ok_or(ConfigError::MissingExtractor("currentNodeSnapshotInTransaction"))?;
        Ok(TransactionalResolver {
            op: Arc::new(move |conn: &Connection, call: &Call<P, A, C>| {
                op(conn, call).map_err(Into::<BoxError>::into)
            }),
            extractors: Arc::new(extractors),
            snapshot,
            store: self.store.clone(),
            config: self.config.clone(),
        })
    }
}

/// A resolver whose successful calls are recorded as versions.
pub struct RecordedResolver<R: Resolver<P, A, C>, P, A, C> {
    op: R,
    extractors: ExtractorSet<P, A, C, R::Output>,
    snapshot: SnapshotAccessor<P, A, C>,
    store: EventStore,
    config: RecorderConfig,
}

impl<R, P, A, C> RecordedResolver<R, P, A, C>
where
    R: Resolver<P, A, C>,
    R::Error: Into<BoxError>,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    async fn record(&self, call: Call<P, A, C>) -> Result<R::Output, RecordError> {
        let x = &self.extractors;
        let node = self
            .op
            .call(call.clone())
            .await
            .map_err(|e| RecordError::Resolver(e.into()))?;

        let mut pending = x.pending(self.config.snapshot_frequency, &node, &call)?;
        let due = snapshot::should_store_snapshot(
            &self.store,
            &pending.base.node,
            pending.node_schema_version,
            pending.base.snapshot_frequency,
        )
        .await?;
        if due {
            match (self.snapshot)(&pending.node_id, &call).await {
                Ok(state) => pending.attach_snapshot(state),
                Err(err) => {
                    warn!(node = %pending.base.node, error = %err, "snapshot accessor failed, recording without snapshot");
                }
            }
        }

        let node_ref = pending.base.node.clone();
        let ids: Vec<EventId> = self
            .store
            .persist_events(pending.into_events(), self.config.transaction_timeout)
            .await?;
        tracing::debug!(node = %node_ref, ?ids, "version recorded");

        Ok(node)
    }
}

impl<R, P, A, C> Resolver<P, A, C> for RecordedResolver<R, P, A, C>
where
    R: Resolver<P, A, C>,
    R::Error: Into<BoxError>,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    type Output = R::Output;
    type Error = RecordError;

    fn call(&self, call: Call<P, A, C>) -> BoxFuture<'_, Result<R::Output, RecordError>> {
        let span = info_span!("record_version", operation = %call.info.field_name);
        Box::pin(self.record(call).instrument(span))
    }
}

/// A recorded resolver whose domain write shares the event transaction.
pub struct TransactionalResolver<P, A, C, N> {
    op: TxOp<P, A, C, N>,
    extractors: Arc<ExtractorSet<P, A, C, N>>,
    snapshot: TxSnapshotAccessor<P, A, C>,
    store: EventStore,
    config: RecorderConfig,
}

impl<P, A, C, N> TransactionalResolver<P, A, C, N>
where
    P: Send + Sync + 'static,
    A: Send + Sync + 'static,
    C: Send + Sync + 'static,
    N: Send + 'static,
{
    async fn record(&self, call: Call<P, A, C>) -> Result<N, RecordError> {
        let op = Arc::clone(&self.op);
        let x = Arc::clone(&self.extractors);
        let take_snapshot = Arc::clone(&self.snapshot);
        let default_frequency = self.config.snapshot_frequency;

        self.store
            .in_transaction(self.config.transaction_timeout, move |tx, tables| -> Result<N, RecordError> {
                tx.check()?;
                let node = op(tx.connection(), &call).map_err(RecordError::Resolver)?;
                let mut pending = x.pending(default_frequency, &node, &call)?;

                let frequency = pending.base.snapshot_frequency;
                let flags = tables.recent_snapshot_flags(
                    &pending.base.node,
                    pending.node_schema_version,
                    snapshot::lookback(frequency),
                )?;
                if snapshot::snapshot_due(&flags, frequency) {
                    match take_snapshot(tx.connection(), &pending.node_id, &call) {
                        Ok(state) => pending.attach_snapshot(state),
                        Err(err) => {
                            warn!(node = %pending.base.node, error = %err, "snapshot accessor failed, recording without snapshot");
                        }
                    }
                }

                let node_ref = pending.base.node.clone();
                for event in pending.into_events() {
                    tx.check()?;
                    tables.insert_event_graph(&event)?;
                }
                tracing::debug!(node = %node_ref, "version recorded with domain write");
                Ok(node)
            })
            .await
    }
}

impl<P, A, C, N> Resolver<P, A, C> for TransactionalResolver<P, A, C, N>
where
    P: Send + Sync + 'static,
    A: Send + Sync + 'static,
    C: Send + Sync + 'static,
    N: Send + 'static,
{
    type Output = N;
    type Error = RecordError;

    fn call(&self, call: Call<P, A, C>) -> BoxFuture<'_, Result<N, RecordError>> {
        let span = info_span!("record_version", operation = %call.info.field_name, in_transaction = true);
        Box::pin(self.record(call).instrument(span))
    }
}
