mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;

use node_version::{
    builders::merge_node_builder,
    page::PageRequest,
    reconstruct::VersionConnection,
    types::{EventId, NodeRef},
};
use serde_json::{Map, Value, json};

use common::{Domain, migrated_store, recorder, run};

#[derive(Debug, Clone)]
struct Patch {
    field: u8,
    value: Option<u8>,
}

fn patch_strategy() -> impl Strategy<Value = Patch> {
    (0u8..4, prop::option::weighted(0.8, 0u8..50)).prop_map(|(field, value)| Patch { field, value })
}

fn to_json(patch: &Patch) -> Value {
    let mut map = Map::new();
    map.insert(
        format!("f{}", patch.field),
        patch.value.map_or(Value::Null, Value::from),
    );
    Value::Object(map)
}

struct Outcome {
    expected: BTreeMap<EventId, Value>,
    walked: Vec<(EventId, Value)>,
    repeated: Vec<(EventId, Value)>,
    longest_gap: usize,
}

async fn record_and_walk(patches: &[Patch], frequency: u32, page_size: usize) -> Outcome {
    let store = migrated_store().await;
    let domain = Domain::new();
    let update = recorder(&store, frequency)
        .wrap(domain.upsert("item"), domain.extractors("item"))
        .expect("wrap");
    let node = NodeRef::new("item", 1);

    let mut expected = BTreeMap::new();
    for (i, patch) in patches.iter().enumerate() {
        run(&update, json!({ "id": 1, "patch": to_json(patch) }))
            .await
            .expect("record");
        expected.insert(i as EventId + 1, domain.get(&node).expect("state"));
    }

    let history = store.node_history(node.clone()).await.expect("history");
    let flags: Vec<bool> = history.iter().map(|r| r.snapshot().is_some()).collect();
    let longest_gap = flags.split(|s| *s).map(<[bool]>::len).max().unwrap_or_default();

    let connection = VersionConnection::new(store, merge_node_builder());
    let collect = |page: &node_version::page::Connection<node_version::reconstruct::VersionEdge>| {
        page.edges
            .iter()
            .map(|e| {
                (
                    e.node.version.as_ref().map(|v| v.id).unwrap_or_default(),
                    e.node.node.clone(),
                )
            })
            .collect::<Vec<_>>()
    };

    let mut walked = Vec::new();
    let mut request = PageRequest::first(page_size);
    loop {
        let page = connection
            .resolve(node.clone(), Value::Null, &request)
            .await
            .expect("page");
        walked.extend(collect(&page));
        match page.page_info.end_cursor {
            Some(end) if page.page_info.has_next_page => {
                request = PageRequest::first(page_size).after(end);
            }
            _ => break,
        }
    }

    let first = PageRequest::first(page_size);
    let repeated = collect(
        &connection
            .resolve(node, Value::Null, &first)
            .await
            .expect("repeat"),
    );

    Outcome {
        expected,
        walked,
        repeated,
        longest_gap,
    }
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(f)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_reconstructed_state_matches_the_live_node(
        patches in prop::collection::vec(patch_strategy(), 1..30),
        frequency in 1u32..7,
        page_size in 1usize..6,
    ) {
        let outcome = block_on(record_and_walk(&patches, frequency, page_size));

        prop_assert_eq!(outcome.walked.len(), patches.len());
        for (id, state) in &outcome.walked {
            prop_assert_eq!(Some(state), outcome.expected.get(id));
        }
        let ids: Vec<EventId> = outcome.walked.iter().map(|(id, _)| *id).collect();
        let newest_first: Vec<EventId> = outcome.expected.keys().rev().copied().collect();
        prop_assert_eq!(ids, newest_first);

        prop_assert!(outcome.longest_gap < frequency.max(1) as usize);

        let head: Vec<(EventId, Value)> = outcome.walked.iter().take(page_size).cloned().collect();
        prop_assert_eq!(outcome.repeated, head);
    }
}
