//! Snapshot policy: decides whether a node change carries full node state.
//!
//! With frequency `F`, a node change stores a snapshot iff none of the
//! previous `F - 1` node changes for the same node and schema version did.
//! Between two snapshots there are therefore at most `F - 1` snapshot-less
//! node changes, and the first change of a stream always snapshots.

use tracing::debug;

use crate::{
    store::{EventStore, StoreResult},
    types::{NodeRef, SchemaVersion},
};

/// How many earlier node changes the policy inspects.
pub fn lookback(frequency: u32) -> usize {
    frequency.saturating_sub(1) as usize
}

/// Decision over snapshot flags of the most recent node changes, newest
/// first.
pub fn snapshot_due(recent_flags: &[bool], frequency: u32) -> bool {
    let window = lookback(frequency);
    !recent_flags.iter().take(window).any(|has| *has)
}

pub async fn should_store_snapshot(
    store: &EventStore,
    node: &NodeRef,
    node_schema_version: SchemaVersion,
    frequency: u32,
) -> StoreResult<bool> {
    let window = lookback(frequency);
    if window == 0 {
        return Ok(true);
    }
    let flags = store
        .recent_snapshot_flags(node.clone(), node_schema_version, window)
        .await?;
    let due = snapshot_due(&flags, frequency);
    debug!(%node, node_schema_version, frequency, inspected = flags.len(), due, "snapshot policy");
    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_one_or_zero_always_snapshots() {
        assert!(snapshot_due(&[true, true], 1));
        assert!(snapshot_due(&[true], 0));
    }

    #[test]
    fn first_change_of_a_stream_snapshots() {
        assert!(snapshot_due(&[], 5));
    }

    #[test]
    fn snapshots_recur_every_frequency_changes() {
        let frequency = 5;
        let mut history: Vec<bool> = Vec::new();
        for _ in 0..11 {
            let mut newest_first = history.clone();
            newest_first.reverse();
            history.push(snapshot_due(&newest_first, frequency));
        }
        let snapshotted: Vec<usize> = history
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.then_some(i + 1))
            .collect();
        assert_eq!(snapshotted, vec![1, 6, 11]);
    }
}
