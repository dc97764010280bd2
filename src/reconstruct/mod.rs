//! Version connection: pages a node's event history and rebuilds the full
//! node state at every event on the page.
//!
//! [`VersionConnection::resolve`] composes three public stages:
//!
//! - [`VersionConnection::load_page`] finds the anchor's fragment instances
//!   and fetches one page of events across all of them,
//! - [`VersionConnection::plan_window`] computes the smallest snapshot-seeded
//!   range covering the page and loads it,
//! - [`VersionConnection::replay`] folds that range and attaches the anchor's
//!   state to every page edge.
//!
//! Reconstruction is all-or-nothing per page. Reads do not share a
//! transaction, so a concurrent recorder can make the page query and the
//! window query observe different data.

pub mod replay;
pub mod window;

use std::{collections::BTreeMap, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, info_span, instrument};

use crate::{
    BoxError,
    event::VersionRecord,
    page::{Connection, ConnectionError, ConnectionManager, Edge, PageInfo, PageRequest},
    resolver::{Call, Resolver},
    store::{EventStore, StoreError},
    types::{EventId, NodeId, NodeRef},
};

use self::{replay::Replayer, window::ReplayWindow};

/// Current state of every fragment of the anchor, keyed by fragment node.
pub type FragmentStates = BTreeMap<NodeRef, Value>;

/// `(previous state, event, fragment states) -> next state`.
pub type NodeBuilder =
    Arc<dyn Fn(&Value, &VersionRecord, &FragmentStates) -> Result<Value, BoxError> + Send + Sync>;

/// `(previous fragment state, event) -> next fragment state`.
pub type FragmentNodeBuilder =
    Arc<dyn Fn(&Value, &VersionRecord) -> Result<Value, BoxError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("no snapshot to seed {node} before event {event_id}")]
    MissingSnapshot { node: NodeRef, event_id: EventId },
    #[error("no node instances to reconstruct")]
    EmptyInstanceSet,
    #[error("event {event_id} on the page has no reconstructed state")]
    UnresolvedState { event_id: EventId },
    #[error("node builder failed at event {event_id}")]
    Builder { event_id: EventId, source: BoxError },
    #[error("wrapped resolver failed: {0}")]
    Resolver(BoxError),
    #[error("resolver for `{node_name}` returned a node without an id")]
    MissingNodeId { node_name: String },
    #[error("current node is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// One reconstructed version. `version` is `None` only on the synthetic edge
/// returned for an empty history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEdge {
    pub version: Option<VersionRecord>,
    pub node: Value,
}

/// Output of [`VersionConnection::load_page`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPage {
    pub anchor: NodeRef,
    /// Anchor first, then its fragments in registration order.
    pub instances: Vec<NodeRef>,
    pub page: Connection<VersionRecord>,
}

#[derive(Clone)]
pub struct VersionConnection {
    store: EventStore,
    node_builder: NodeBuilder,
    fragment_node_builder: Option<FragmentNodeBuilder>,
}

impl VersionConnection {
    pub fn new(store: EventStore, node_builder: NodeBuilder) -> Self {
        Self {
            store,
            node_builder,
            fragment_node_builder: None,
        }
    }

    pub fn with_fragment_node_builder(mut self, builder: FragmentNodeBuilder) -> Self {
        self.fragment_node_builder = Some(builder);
        self
    }

    #[instrument(skip_all, fields(anchor = %anchor))]
    pub async fn load_page(
        &self,
        anchor: NodeRef,
        request: &PageRequest,
    ) -> Result<LoadedPage, ReconstructError> {
        let mut instances = vec![anchor.clone()];
        for child in self.store.fragment_children(anchor.clone()).await? {
            if !instances.contains(&child) {
                instances.push(child);
            }
        }

        let attributes = self.store.version_attributes();
        let plan = ConnectionManager::new(&attributes).plan(request)?;
        let rows = self.store.page_versions(instances.clone(), plan.clone()).await?;
        let mut page = plan.assemble(rows)?;

        let ids: Vec<EventId> = page.edges.iter().map(|e| e.node.id).collect();
        let mut roles = self.store.roles_for_events(ids).await?;
        for edge in &mut page.edges {
            edge.node.user_roles = roles.remove(&edge.node.id).unwrap_or_default();
        }

        Ok(LoadedPage {
            anchor,
            instances,
            page,
        })
    }

    /// `None` when the page is empty.
    pub async fn plan_window(
        &self,
        loaded: &LoadedPage,
    ) -> Result<Option<ReplayWindow>, ReconstructError> {
        if loaded.instances.is_empty() {
            return Err(ReconstructError::EmptyInstanceSet);
        }
        let page: Vec<&VersionRecord> = loaded.page.edges.iter().map(|e| &e.node).collect();
        Ok(window::plan(&self.store, &loaded.instances, &page).await?)
    }

    /// Attaches the anchor's reconstructed state to every page edge, keeping
    /// the page's cursors and page info.
    pub fn replay(
        &self,
        loaded: LoadedPage,
        window: &ReplayWindow,
    ) -> Result<Connection<VersionEdge>, ReconstructError> {
        let mut states = Replayer::new(
            &loaded.anchor,
            &self.node_builder,
            self.fragment_node_builder.as_ref(),
        )
        .run(window)?;

        let edges = loaded
            .page
            .edges
            .into_iter()
            .map(|edge| {
                let event_id = edge.node.id;
                let node = states
                    .remove(&event_id)
                    .ok_or(ReconstructError::UnresolvedState { event_id })?;
                Ok(Edge {
                    cursor: edge.cursor,
                    node: VersionEdge {
                        version: Some(edge.node),
                        node,
                    },
                })
            })
            .collect::<Result<Vec<_>, ReconstructError>>()?;

        Ok(Connection {
            page_info: loaded.page.page_info,
            edges,
        })
    }

    /// Full pipeline. An empty history yields one edge with no version and
    /// the caller's `current` node.
    pub async fn resolve(
        &self,
        anchor: NodeRef,
        current: Value,
        request: &PageRequest,
    ) -> Result<Connection<VersionEdge>, ReconstructError> {
        let loaded = self.load_page(anchor, request).await?;
        let Some(window) = self.plan_window(&loaded).await? else {
            return Ok(current_only(current));
        };
        self.replay(loaded, &window)
    }

    pub fn wrap<R, P, A, C>(
        &self,
        op: R,
        extractors: ConnectionExtractors<P, A, C, R::Output>,
    ) -> VersionedQuery<R, P, A, C>
    where
        R: Resolver<P, A, C>,
    {
        VersionedQuery {
            op,
            extractors,
            connection: self.clone(),
        }
    }
}

fn current_only(current: Value) -> Connection<VersionEdge> {
    Connection {
        page_info: PageInfo::default(),
        edges: vec![Edge {
            cursor: String::new(),
            node: VersionEdge {
                version: None,
                node: current,
            },
        }],
    }
}

type Extract<P, A, C, T> = Arc<dyn Fn(&Call<P, A, C>) -> T + Send + Sync>;

/// How a wrapped query exposes its anchor and page request.
pub struct ConnectionExtractors<P, A, C, N> {
    node_name: Extract<P, A, C, String>,
    node_id: Arc<dyn Fn(&N, &Call<P, A, C>) -> Option<NodeId> + Send + Sync>,
    page_request: Option<Extract<P, A, C, PageRequest>>,
}

impl<P, A, C, N> ConnectionExtractors<P, A, C, N> {
    pub fn new(
        node_name: impl Fn(&Call<P, A, C>) -> String + Send + Sync + 'static,
        node_id: impl Fn(&N, &Call<P, A, C>) -> Option<NodeId> + Send + Sync + 'static,
    ) -> Self {
        Self {
            node_name: Arc::new(node_name),
            node_id: Arc::new(node_id),
            page_request: None,
        }
    }

    /// Defaults to the first page in default order.
    pub fn page_request(
        mut self,
        f: impl Fn(&Call<P, A, C>) -> PageRequest + Send + Sync + 'static,
    ) -> Self {
        self.page_request = Some(Arc::new(f));
        self
    }
}

/// A query resolver whose node is replaced by its version connection.
pub struct VersionedQuery<R: Resolver<P, A, C>, P, A, C> {
    op: R,
    extractors: ConnectionExtractors<P, A, C, R::Output>,
    connection: VersionConnection,
}

impl<R, P, A, C> VersionedQuery<R, P, A, C>
where
    R: Resolver<P, A, C>,
    R::Output: Serialize,
    R::Error: Into<BoxError>,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    async fn query(&self, call: Call<P, A, C>) -> Result<Connection<VersionEdge>, ReconstructError> {
        let x = &self.extractors;
        let node = self
            .op
            .call(call.clone())
            .await
            .map_err(|e| ReconstructError::Resolver(e.into()))?;

        let node_name = (x.node_name)(&call);
        let Some(node_id) = (x.node_id)(&node, &call) else {
            return Err(ReconstructError::MissingNodeId { node_name });
        };
        let request = x
            .page_request
            .as_ref()
            .map(|f| f(&call))
            .unwrap_or_default();
        let current = serde_json::to_value(&node)?;

        self.connection
            .resolve(NodeRef { node_name, node_id }, current, &request)
            .await
    }
}

impl<R, P, A, C> Resolver<P, A, C> for VersionedQuery<R, P, A, C>
where
    R: Resolver<P, A, C>,
    R::Output: Serialize,
    R::Error: Into<BoxError>,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    type Output = Connection<VersionEdge>;
    type Error = ReconstructError;

    fn call(
        &self,
        call: Call<P, A, C>,
    ) -> BoxFuture<'_, Result<Connection<VersionEdge>, ReconstructError>> {
        let span = info_span!("version_connection", operation = %call.info.field_name);
        Box::pin(self.query(call).instrument(span))
    }
}
