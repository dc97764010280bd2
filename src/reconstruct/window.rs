//! Minimal replay window for one page.

use hashbrown::HashMap;

use crate::{
    event::VersionRecord,
    store::{EventStore, StoreResult},
    types::{EventPosition, NodeRef},
};

/// Range of events that must be replayed to rebuild every state on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayWindow {
    /// Inclusive lower bound.
    pub oldest: EventPosition,
    /// Inclusive upper bound: the newest page event.
    pub youngest: EventPosition,
    /// Per-instance replay seed: the nearest snapshot at or before the oldest
    /// page event.
    pub seeds: HashMap<NodeRef, EventPosition>,
    /// No instance had a snapshot to seed from; replay starts from an
    /// implicit empty state.
    pub degraded: bool,
    /// Every event of the relevant instances in `[oldest, youngest]`, oldest
    /// first.
    pub events: Vec<VersionRecord>,
}

impl ReplayWindow {
    pub fn seed_of(&self, node: &NodeRef) -> Option<EventPosition> {
        self.seeds.get(node).copied()
    }

    /// Whether `event` precedes its instance's seed and must be skipped.
    pub fn before_seed(&self, event: &VersionRecord) -> bool {
        self.seed_of(&event.node)
            .is_some_and(|seed| event.position() < seed)
    }
}

/// Bounds of the page in stream order.
pub fn page_bounds<'a>(
    page: impl IntoIterator<Item = &'a VersionRecord>,
) -> Option<(EventPosition, EventPosition)> {
    page.into_iter().fold(None, |bounds, record| {
        let pos = record.position();
        Some(match bounds {
            None => (pos, pos),
            Some((lo, hi)) => (lo.min(pos), hi.max(pos)),
        })
    })
}

/// Computes the window for `page` across `instances` and loads its events.
///
/// Returns `None` for an empty page.
pub async fn plan(
    store: &EventStore,
    instances: &[NodeRef],
    page: &[&VersionRecord],
) -> StoreResult<Option<ReplayWindow>> {
    let Some((page_oldest, youngest)) = page_bounds(page.iter().copied()) else {
        return Ok(None);
    };

    let mut seeds = HashMap::new();
    for instance in instances {
        if let Some(seed) = store.nearest_snapshot(instance.clone(), page_oldest).await? {
            seeds.insert(instance.clone(), seed);
        }
    }

    let (oldest, degraded) = match seeds.values().min() {
        Some(seed) => ((*seed).min(page_oldest), false),
        None => {
            let earliest = store.earliest_position(instances.to_vec()).await?;
            (earliest.unwrap_or(page_oldest).min(page_oldest), true)
        }
    };

    let events = store
        .versions_between(instances.to_vec(), oldest, youngest)
        .await?;
    tracing::debug!(
        instances = instances.len(),
        seeded = seeds.len(),
        events = events.len(),
        degraded,
        "replay window planned"
    );

    Ok(Some(ReplayWindow {
        oldest,
        youngest,
        seeds,
        degraded,
        events,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::VersionFact;

    fn record(id: i64, created_at: i64) -> VersionRecord {
        VersionRecord {
            id,
            created_at,
            user_id: "u".to_string(),
            user_roles: vec![],
            node: NodeRef::new("todo", 1),
            resolver_operation: "update".to_string(),
            fact: VersionFact::NodeChange {
                revision_data: json!({}),
                node_schema_version: 1,
                snapshot: None,
            },
        }
    }

    #[test]
    fn bounds_follow_stream_order() {
        let page = [record(9, 200), record(4, 100), record(5, 100)];
        let (lo, hi) = page_bounds(&page).expect("bounds");
        assert_eq!(lo, EventPosition { created_at: 100, id: 4 });
        assert_eq!(hi, EventPosition { created_at: 200, id: 9 });
        assert_eq!(page_bounds(Vec::<VersionRecord>::new().iter()), None);
    }
}
