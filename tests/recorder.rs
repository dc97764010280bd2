mod common;

use std::time::Duration;

use node_version::{
    builders::{merge_node_builder, merge_patch},
    event::VersionFact,
    page::PageRequest,
    names::NameConfig,
    recorder::{ConfigError, ExtractorSet, RecordError, RecorderConfig, VersionRecorder},
    reconstruct::VersionConnection,
    resolver::Resolver,
    store::EventStore,
    types::{ImplementorType, NodeRef},
};
use rusqlite::OptionalExtension;
use serde_json::{Value, json};

use common::{Domain, TodoCall, call, migrated_store, recorder, run};

fn snapshot_flags(history: &[node_version::event::VersionRecord]) -> Vec<bool> {
    history
        .iter()
        .filter(|r| r.implementor_type() == ImplementorType::NodeChange)
        .map(|r| r.snapshot().is_some())
        .collect()
}

#[tokio::test]
async fn five_writes_at_frequency_five_snapshot_only_the_first() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = recorder(&store, 5)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("wrap");

    for n in 0..5 {
        run(&update, json!({ "id": 1, "patch": { "title": format!("v{n}"), "rev": n } }))
            .await
            .expect("record");
    }

    let node = NodeRef::new("todo", 1);
    let history = store.node_history(node.clone()).await.expect("history");
    assert_eq!(snapshot_flags(&history), vec![true, false, false, false, false]);

    // Seed from the only snapshot and fold the remaining four patches by hand.
    let mut folded = history[0].snapshot().cloned().expect("seed");
    for record in &history[1..] {
        if let VersionFact::NodeChange { revision_data, .. } = &record.fact {
            merge_patch(&mut folded, revision_data);
        }
    }

    let connection = VersionConnection::new(store.clone(), merge_node_builder());
    let page = connection
        .resolve(node.clone(), Value::Null, &PageRequest::first(1))
        .await
        .expect("resolve");
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].node.node, folded);
    assert_eq!(Some(folded), domain.get(&node));
}

#[tokio::test]
async fn snapshot_gaps_never_exceed_the_frequency() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = recorder(&store, 3)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("wrap");

    for n in 0..10 {
        run(&update, json!({ "id": 4, "patch": { "n": n } }))
            .await
            .expect("record");
    }

    let history = store
        .node_history(NodeRef::new("todo", 4))
        .await
        .expect("history");
    let flags = snapshot_flags(&history);
    let positions: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.then_some(i + 1))
        .collect();
    assert_eq!(positions, vec![1, 4, 7, 10]);

    let longest_gap = flags
        .split(|has| *has)
        .map(<[bool]>::len)
        .max()
        .unwrap_or_default();
    assert!(longest_gap < 3);
}

#[tokio::test]
async fn per_call_frequency_overrides_the_default() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = recorder(&store, 50)
        .wrap(
            domain.upsert("todo"),
            domain
                .extractors("todo")
                .current_node_snapshot_frequency(|_| 1),
        )
        .expect("wrap");

    for n in 0..3 {
        run(&update, json!({ "id": 2, "patch": { "n": n } }))
            .await
            .expect("record");
    }
    let history = store
        .node_history(NodeRef::new("todo", 2))
        .await
        .expect("history");
    assert_eq!(snapshot_flags(&history), vec![true, true, true]);
}

#[tokio::test]
async fn snapshot_accessor_failure_records_without_snapshot() {
    let store = migrated_store().await;
    let domain = Domain::new();
    domain.fail_snapshots(true);
    let update = recorder(&store, 5)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("wrap");

    let node = run(&update, json!({ "id": 1, "patch": { "title": "a" } }))
        .await
        .expect("recorded despite snapshot failure");
    assert_eq!(node, json!({ "id": 1, "title": "a" }));

    let history = store
        .node_history(NodeRef::new("todo", 1))
        .await
        .expect("history");
    assert_eq!(snapshot_flags(&history), vec![false]);
    assert_eq!(store.count("node_snapshot").await.expect("count"), 0);
}

#[tokio::test]
async fn missing_node_id_writes_nothing() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = recorder(&store, 5)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("wrap");

    let err = run(&update, json!({ "patch": { "title": "no id" } }))
        .await
        .expect_err("no id");
    assert!(matches!(err, RecordError::MissingNodeId { ref node_name } if node_name == "todo"));
    assert_eq!(store.count("event").await.expect("count"), 0);
}

#[tokio::test]
async fn missing_mandatory_extractor_fails_at_wrap_time() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let incomplete = ExtractorSet::<(), Value, (), Value>::builder()
        .user_id(|_| "u".to_string())
        .user_roles(|_| Vec::new())
        .revision_data(|call| call.args.clone())
        .node_schema_version(|_| 1)
        .node_name(|_| "todo".to_string())
        .current_node_snapshot(|_, _| async { Ok::<_, node_version::BoxError>(Value::Null) });

    let wrapped = recorder(&store, 5).wrap(domain.upsert("todo"), incomplete);
    assert!(matches!(wrapped, Err(ConfigError::MissingExtractor("nodeId"))));
}

#[tokio::test]
async fn expired_deadline_rolls_back_the_whole_graph() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = VersionRecorder::new(
        store.clone(),
        RecorderConfig {
            snapshot_frequency: 5,
            transaction_timeout: Duration::ZERO,
        },
    )
    .wrap(domain.upsert("todo"), domain.extractors("todo"))
    .expect("wrap");

    let err = run(
        &update,
        json!({ "id": 1, "patch": { "title": "late" }, "links": [{ "nodeName": "team", "nodeId": "3" }] }),
    )
    .await
    .expect_err("deadline");
    assert!(matches!(err, RecordError::TransactionTimeout { timeout_ms: 0 }));

    // The domain write already happened and stays.
    assert_eq!(
        domain.get(&NodeRef::new("todo", 1)),
        Some(json!({ "id": 1, "title": "late" }))
    );
    for table in ["event", "event_node_change", "event_link_change", "user_role", "role"] {
        assert_eq!(store.count(table).await.expect("count"), 0, "{table}");
    }
}

#[tokio::test]
async fn roles_are_a_fact_of_each_event() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = recorder(&store, 5)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("wrap");

    run(
        &update,
        json!({ "id": 1, "userId": "ann", "roles": ["admin", "owner", "admin"], "patch": { "a": 1 } }),
    )
    .await
    .expect("first");
    run(&update, json!({ "id": 1, "userId": "bob", "roles": ["admin"], "patch": { "a": 2 } }))
        .await
        .expect("second");

    let history = store
        .node_history(NodeRef::new("todo", 1))
        .await
        .expect("history");
    assert_eq!(history[0].user_id, "ann");
    assert_eq!(history[0].user_roles, vec!["admin", "owner"]);
    assert_eq!(history[1].user_roles, vec!["admin"]);
    assert_eq!(store.count("role").await.expect("roles"), 2);
    assert_eq!(store.count("user_role").await.expect("user roles"), 3);
}

#[tokio::test]
async fn resolver_operation_defaults_to_the_field_name() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let default_label = recorder(&store, 5)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("wrap");
    let custom_label = recorder(&store, 5)
        .wrap(
            domain.upsert("todo"),
            domain.extractors("todo").resolver_operation(|_| "create".to_string()),
        )
        .expect("wrap");

    default_label
        .call(call(json!({ "id": 8, "patch": {} })))
        .await
        .expect("default");
    custom_label
        .call(call(json!({ "id": 8, "patch": {} })))
        .await
        .expect("custom");

    let history = store
        .node_history(NodeRef::new("todo", 8))
        .await
        .expect("history");
    let labels: Vec<&str> = history.iter().map(|r| r.resolver_operation.as_str()).collect();
    assert_eq!(labels, vec!["updateTodo", "create"]);
}

#[tokio::test]
async fn recorded_resolvers_compose() {
    let store = migrated_store().await;
    let domain = Domain::new();
    let inner = recorder(&store, 5)
        .wrap(domain.upsert("todo"), domain.extractors("todo"))
        .expect("inner");
    let outer = recorder(&store, 5)
        .wrap(inner, domain.extractors("todo"))
        .expect("outer");

    run(&outer, json!({ "id": 3, "patch": { "x": 1 } }))
        .await
        .expect("record");
    let history = store
        .node_history(NodeRef::new("todo", 3))
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
}

/// Domain write into a table living next to the revision tables.
fn upsert_row(conn: &rusqlite::Connection, call: &TodoCall) -> Result<Value, rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS todo_rows (id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
    )?;
    let id = call.args["id"].as_i64().unwrap_or_default();
    let mut body = conn
        .query_row("SELECT body FROM todo_rows WHERE id = ?1", [id], |row| row.get::<_, String>(0))
        .optional()?
        .and_then(|body| serde_json::from_str(&body).ok())
        .unwrap_or_else(|| json!({ "id": id }));
    merge_patch(&mut body, &call.args["patch"]);
    conn.execute(
        "INSERT INTO todo_rows (id, body) VALUES (?1, ?2) \
         ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        rusqlite::params![id, body.to_string()],
    )?;
    if let Some(ms) = call.args.get("slowMs").and_then(Value::as_u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
    Ok(body)
}

fn in_transaction(
    store: &EventStore,
    frequency: u32,
    timeout: Duration,
) -> impl Resolver<(), Value, (), Output = Value, Error = RecordError> + use<> {
    let extractors = Domain::new().extractors("todo").current_node_snapshot_in_transaction(
        |conn, id, _| {
            let body: String = conn.query_row(
                "SELECT body FROM todo_rows WHERE id = ?1",
                [id.parse::<i64>()?],
                |row| row.get(0),
            )?;
            Ok(serde_json::from_str(&body)?)
        },
    );
    VersionRecorder::new(
        store.clone(),
        RecorderConfig {
            snapshot_frequency: frequency,
            transaction_timeout: timeout,
        },
    )
    .wrap_in_transaction(upsert_row, extractors)
    .expect("wrap in transaction")
}

#[tokio::test]
async fn domain_write_and_events_commit_in_one_transaction() {
    let store = migrated_store().await;
    let update = in_transaction(&store, 2, Duration::from_secs(10));

    for title in ["a", "b", "c"] {
        let node = run(&update, json!({ "id": 1, "patch": { "title": title } }))
            .await
            .expect("record");
        assert_eq!(node, json!({ "id": 1, "title": title }));
    }
    assert_eq!(store.count("todo_rows").await.expect("rows"), 1);

    let history = store.node_history(NodeRef::new("todo", 1)).await.expect("history");
    assert_eq!(snapshot_flags(&history), vec![true, false, true]);
    assert_eq!(history[0].snapshot(), Some(&json!({ "id": 1, "title": "a" })));

    let page = VersionConnection::new(store, merge_node_builder())
        .resolve(NodeRef::new("todo", 1), Value::Null, &PageRequest::first(3))
        .await
        .expect("resolve");
    let titles: Vec<&Value> = page.edges.iter().map(|e| &e.node.node["title"]).collect();
    assert_eq!(titles, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn failed_recording_rolls_back_the_domain_write() {
    let store = migrated_store().await;
    run(
        &in_transaction(&store, 5, Duration::from_secs(10)),
        json!({ "id": 1, "patch": { "title": "kept" } }),
    )
    .await
    .expect("first write");

    let slow = in_transaction(&store, 5, Duration::from_millis(50));
    let err = run(&slow, json!({ "id": 2, "patch": { "title": "late" }, "slowMs": 120 }))
        .await
        .expect_err("deadline passes during the domain write");
    assert!(matches!(err, RecordError::TransactionTimeout { timeout_ms: 50 }));

    let update = in_transaction(&store, 5, Duration::from_secs(10));
    let err = run(
        &update,
        json!({ "id": 3, "patch": { "title": "loop" }, "links": [{ "nodeName": "todo", "nodeId": "3" }] }),
    )
    .await
    .expect_err("self link");
    assert!(matches!(err, RecordError::Extraction(_)));

    assert_eq!(store.count("todo_rows").await.expect("rows"), 1);
    assert_eq!(store.count("event").await.expect("events"), 1);
    for id in [2, 3] {
        let history = store.node_history(NodeRef::new("todo", id)).await.expect("history");
        assert!(history.is_empty(), "todo {id}");
    }
}

#[tokio::test]
async fn missing_transactional_snapshot_accessor_is_a_config_error() {
    let store = migrated_store().await;
    let err = recorder(&store, 5)
        .wrap_in_transaction(upsert_row, Domain::new().extractors("todo"))
        .err()
        .expect("config error");
    assert!(matches!(
        err,
        ConfigError::MissingExtractor("currentNodeSnapshotInTransaction")
    ));
}

#[tokio::test]
async fn lock_wait_counts_against_the_transaction_deadline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("contended.db");
    let store = EventStore::open_with_timeout(&path, NameConfig::default(), Duration::from_millis(750))
        .expect("open");
    store.migrate().await.expect("migrate");
    assert_eq!(store.busy_timeout().await.expect("pragma"), Duration::from_millis(750));

    let holder = rusqlite::Connection::open(&path).expect("second connection");
    holder.execute_batch("BEGIN IMMEDIATE").expect("hold the write lock");

    let domain = Domain::new();
    let update = VersionRecorder::new(
        store.clone(),
        RecorderConfig {
            snapshot_frequency: 5,
            transaction_timeout: Duration::from_millis(100),
        },
    )
    .wrap(domain.upsert("todo"), domain.extractors("todo"))
    .expect("wrap");

    let started = std::time::Instant::now();
    let err = run(&update, json!({ "id": 1, "patch": { "title": "blocked" } }))
        .await
        .expect_err("write lock held elsewhere");
    assert!(matches!(err, RecordError::TransactionTimeout { timeout_ms: 100 }));
    assert!(started.elapsed() < Duration::from_millis(700));

    holder.execute_batch("ROLLBACK").expect("release");
    assert_eq!(store.busy_timeout().await.expect("pragma"), Duration::from_millis(750));
    run(&update, json!({ "id": 1, "patch": { "title": "free" } }))
        .await
        .expect("record once the lock is released");
}
