#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use node_version::{
    BoxError,
    builders::merge_patch,
    names::NameConfig,
    recorder::{
        ExtractorSet, ExtractorSetBuilder, RecordError, RecorderConfig, VersionRecorder,
        extract::LinkEdge,
    },
    resolver::{Call, ResolveInfo, Resolver, ResolverFn, resolver_fn},
    store::EventStore,
    types::NodeRef,
};
use serde_json::{Value, json};

pub type TodoCall = Call<(), Value, ()>;

pub const T0: i64 = 1_700_000_000_000;

pub async fn migrated_store() -> EventStore {
    migrated_store_with(NameConfig::default()).await
}

pub async fn migrated_store_with(names: NameConfig) -> EventStore {
    let store = EventStore::open_in_memory(names).expect("open store");
    store.migrate().await.expect("migrate");
    store
}

/// Application-side node storage the recorded resolvers mutate.
#[derive(Clone, Default)]
pub struct Domain {
    rows: Arc<Mutex<BTreeMap<NodeRef, Value>>>,
    clock: Arc<AtomicI64>,
    snapshots_fail: Arc<AtomicBool>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &NodeRef) -> Option<Value> {
        self.rows.lock().expect("rows").get(node).cloned()
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.snapshots_fail.store(fail, Ordering::SeqCst);
    }

    /// Strictly increasing event time, one millisecond per recorded call.
    fn tick(&self) -> i64 {
        T0 + self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn apply(&self, node_name: &str, args: &Value) -> Value {
        let Some(id) = args.get("id").and_then(Value::as_i64) else {
            return json!({ "title": "orphan" });
        };
        let node = NodeRef::new(node_name, id);
        let mut rows = self.rows.lock().expect("rows");
        let state = rows.entry(node).or_insert_with(|| json!({ "id": id }));
        merge_patch(state, &args["patch"]);
        state.clone()
    }

    /// Resolver that merges `args.patch` into node `args.id`.
    pub fn upsert(
        &self,
        node_name: &'static str,
    ) -> ResolverFn<
        impl Fn(TodoCall) -> futures::future::Ready<Result<Value, Infallible>> + Send + Sync + 'static,
        (),
        Value,
        (),
    > {
        let domain = self.clone();
        resolver_fn(move |call: TodoCall| futures::future::ready(Ok(domain.apply(node_name, &call.args))))
    }

    pub fn extractors(&self, node_name: &'static str) -> ExtractorSetBuilder<(), Value, (), Value> {
        let clock = self.clone();
        let snapshots = self.clone();
        ExtractorSet::<(), Value, (), Value>::builder()
            .user_id(|call| {
                call.args
                    .get("userId")
                    .and_then(Value::as_str)
                    .unwrap_or("tester")
                    .to_string()
            })
            .user_roles(|call| {
                call.args
                    .get("roles")
                    .and_then(Value::as_array)
                    .map(|roles| {
                        roles
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_else(|| vec!["member".to_string()])
            })
            .revision_data(|call| call.args["patch"].clone())
            .event_time(move |_| clock.tick())
            .node_id(|node: &Value, _| node.get("id").and_then(Value::as_i64).map(|id| id.to_string()))
            .node_schema_version(|_| 1)
            .node_name(move |_| node_name.to_string())
            .current_node_snapshot(move |id, _| {
                let state = snapshots.get(&NodeRef::new(node_name, id));
                let fail = snapshots.snapshots_fail.load(Ordering::SeqCst);
                async move {
                    if fail {
                        return Err::<Value, BoxError>("snapshot source unavailable".into());
                    }
                    state.ok_or_else(|| BoxError::from("node vanished"))
                }
            })
            .parent_node(|call| serde_json::from_value(call.args.get("parent")?.clone()).ok())
            .edges(move |call| {
                let Some(id) = call.args.get("id").and_then(Value::as_i64) else {
                    return Vec::new();
                };
                let from = NodeRef::new(node_name, id);
                call.args
                    .get("links")
                    .cloned()
                    .and_then(|links| serde_json::from_value::<Vec<NodeRef>>(links).ok())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|to| LinkEdge::new(from.clone(), to))
                    .collect()
            })
    }
}

pub fn recorder(store: &EventStore, snapshot_frequency: u32) -> VersionRecorder {
    VersionRecorder::new(
        store.clone(),
        RecorderConfig {
            snapshot_frequency,
            transaction_timeout: Duration::from_secs(10),
        },
    )
}

pub fn call(args: Value) -> TodoCall {
    Call::new((), args, (), ResolveInfo::new("updateTodo"))
}

pub async fn run<R>(resolver: &R, args: Value) -> Result<Value, RecordError>
where
    R: Resolver<(), Value, (), Output = Value, Error = RecordError>,
{
    resolver.call(call(args)).await
}
