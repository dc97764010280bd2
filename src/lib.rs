//! Event-sourced versioning for application nodes, persisted in SQLite.
//!
//! A [`recorder::VersionRecorder`] wraps a mutating resolver and writes an
//! immutable event graph for every call. A [`reconstruct::VersionConnection`]
//! pages that graph and rebuilds the node's full state at each event by
//! replaying from the nearest snapshot.
//!
//! # Examples
//!
//! ```
//! use std::convert::Infallible;
//!
//! use node_version::{
//!     builders::merge_node_builder,
//!     names::NameConfig,
//!     page::PageRequest,
//!     recorder::{ExtractorSet, RecorderConfig, VersionRecorder},
//!     reconstruct::VersionConnection,
//!     resolver::{Call, ResolveInfo, Resolver, resolver_fn},
//!     store::EventStore,
//!     types::NodeRef,
//! };
//! use serde_json::{Value, json};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = EventStore::open_in_memory(NameConfig::default()).expect("open");
//! store.migrate().await.expect("migrate");
//!
//! let update = resolver_fn(|call: Call<(), Value, ()>| async move {
//!     Ok::<_, Infallible>(json!({ "id": 1, "title": call.args["title"] }))
//! });
//! let recorder = VersionRecorder::new(store.clone(), RecorderConfig::default());
//! let update = recorder
//!     .wrap(
//!         update,
//!         ExtractorSet::<(), Value, (), Value>::builder()
//!             .user_id(|_| "alice".to_string())
//!             .user_roles(|_| vec!["editor".to_string()])
//!             .revision_data(|call| call.args.clone())
//!             .node_id(|node: &Value, _| node["id"].as_i64().map(|id| id.to_string()))
//!             .node_schema_version(|_| 1)
//!             .node_name(|_| "todo".to_string())
//!             .current_node_snapshot(|_, call| {
//!                 let state = json!({ "id": 1, "title": call.args["title"] });
//!                 async move { Ok::<_, node_version::BoxError>(state) }
//!             }),
//!     )
//!     .expect("extractors");
//!
//! for title in ["draft", "final"] {
//!     let call = Call::new((), json!({ "title": title }), (), ResolveInfo::new("updateTodo"));
//!     update.call(call).await.expect("recorded");
//! }
//!
//! let connection = VersionConnection::new(store, merge_node_builder());
//! let page = connection
//!     .resolve(NodeRef::new("todo", 1), Value::Null, &PageRequest::first(10))
//!     .await
//!     .expect("versions");
//! assert_eq!(page.edges.len(), 2);
//! assert_eq!(page.edges[0].node.node["title"], "final");
//! assert_eq!(page.edges[1].node.node["title"], "draft");
//! # }
//! ```

/// JSON merge-patch reducers.
pub mod builders;
/// File-based configuration.
pub mod config;
/// Event write and read models.
pub mod event;
/// Subscriber setup for binaries.
pub mod logging;
/// Physical table and column names.
pub mod names;
/// Cursor pagination over pageable rows.
pub mod page;
/// Historical state reconstruction.
pub mod reconstruct;
/// Event recording around mutating resolvers.
pub mod recorder;
/// Resolver call shape and adapters.
pub mod resolver;
/// SQLite event store, dialects and migrations.
pub mod store;
/// Shared identifiers and discriminators.
pub mod types;

/// Boxed error returned by user-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
