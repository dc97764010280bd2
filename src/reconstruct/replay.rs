//! Folding a replay window into per-event anchor states.

use hashbrown::HashMap;
use serde_json::{Map, Value};

use crate::{
    event::{VersionFact, VersionRecord},
    types::{EventId, NodeRef},
};

use super::{FragmentNodeBuilder, FragmentStates, NodeBuilder, ReconstructError, window::ReplayWindow};

pub struct Replayer<'a> {
    anchor: &'a NodeRef,
    node_builder: &'a NodeBuilder,
    fragment_node_builder: Option<&'a FragmentNodeBuilder>,
}

impl<'a> Replayer<'a> {
    pub fn new(
        anchor: &'a NodeRef,
        node_builder: &'a NodeBuilder,
        fragment_node_builder: Option<&'a FragmentNodeBuilder>,
    ) -> Self {
        Self {
            anchor,
            node_builder,
            fragment_node_builder,
        }
    }

    /// Replays `window.events` oldest to newest and returns the anchor's
    /// state after every replayed event.
    ///
    /// Until the anchor's first node change is replayed its state is the
    /// empty object, folded with any fragment changes seen so far. Link and
    /// fragment-register events copy the current state forward.
    pub fn run(&self, window: &ReplayWindow) -> Result<HashMap<EventId, Value>, ReconstructError> {
        let mut anchor_state: Option<Value> = None;
        let mut unborn = Value::Object(Map::new());
        let mut fragments = FragmentStates::new();
        let mut states = HashMap::with_capacity(window.events.len());

        for event in &window.events {
            if window.before_seed(event) {
                continue;
            }
            if let VersionFact::NodeChange { snapshot, .. } = &event.fact {
                if event.node == *self.anchor {
                    let next = match anchor_state.take() {
                        Some(state) => self.build_anchor(&state, event, &fragments)?,
                        None => self.seed(event, snapshot.as_ref(), window.degraded, &unborn, &fragments)?,
                    };
                    anchor_state = Some(next);
                } else {
                    let next = match fragments.get(&event.node) {
                        Some(state) => self.build_fragment(state, event)?,
                        None => match snapshot {
                            Some(snapshot) => snapshot.clone(),
                            None if window.degraded => {
                                self.build_fragment(&Value::Object(Map::new()), event)?
                            }
                            None => return Err(missing(event)),
                        },
                    };
                    fragments.insert(event.node.clone(), next);
                    match anchor_state.take() {
                        Some(state) => anchor_state = Some(self.build_anchor(&state, event, &fragments)?),
                        None => unborn = self.build_anchor(&unborn, event, &fragments)?,
                    }
                }
            }
            let state = anchor_state.as_ref().unwrap_or(&unborn);
            states.insert(event.id, state.clone());
        }
        Ok(states)
    }

    fn seed(
        &self,
        event: &VersionRecord,
        snapshot: Option<&Value>,
        degraded: bool,
        unborn: &Value,
        fragments: &FragmentStates,
    ) -> Result<Value, ReconstructError> {
        match snapshot {
            Some(snapshot) => Ok(snapshot.clone()),
            None if degraded => self.build_anchor(unborn, event, fragments),
            None => Err(missing(event)),
        }
    }

    fn build_anchor(
        &self,
        state: &Value,
        event: &VersionRecord,
        fragments: &FragmentStates,
    ) -> Result<Value, ReconstructError> {
        (self.node_builder)(state, event, fragments).map_err(|source| ReconstructError::Builder {
            event_id: event.id,
            source,
        })
    }

    fn build_fragment(&self, state: &Value, event: &VersionRecord) -> Result<Value, ReconstructError> {
        let built = match self.fragment_node_builder {
            Some(builder) => builder(state, event),
            None => (self.node_builder)(state, event, &FragmentStates::new()),
        };
        built.map_err(|source| ReconstructError::Builder {
            event_id: event.id,
            source,
        })
    }
}

fn missing(event: &VersionRecord) -> ReconstructError {
    ReconstructError::MissingSnapshot {
        node: event.node.clone(),
        event_id: event.id,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{builders::merge_node_builder, types::EventPosition};

    fn change(id: i64, patch: Value, snapshot: Option<Value>) -> VersionRecord {
        VersionRecord {
            id,
            created_at: id * 10,
            user_id: "u".to_string(),
            user_roles: vec![],
            node: NodeRef::new("todo", 1),
            resolver_operation: "update".to_string(),
            fact: VersionFact::NodeChange {
                revision_data: patch,
                node_schema_version: 1,
                snapshot,
            },
        }
    }

    fn window(events: Vec<VersionRecord>, degraded: bool) -> ReplayWindow {
        let oldest = events.first().map(VersionRecord::position).unwrap_or(EventPosition {
            created_at: 0,
            id: 0,
        });
        let youngest = events.last().map(VersionRecord::position).unwrap_or(oldest);
        ReplayWindow {
            oldest,
            youngest,
            seeds: HashMap::new(),
            degraded,
            events,
        }
    }

    #[test]
    fn snapshot_seeds_then_patches_fold() {
        let anchor = NodeRef::new("todo", 1);
        let builder = merge_node_builder();
        let events = vec![
            change(1, json!({"title": "a"}), Some(json!({"title": "a", "done": false}))),
            change(2, json!({"done": true}), None),
        ];
        let states = Replayer::new(&anchor, &builder, None)
            .run(&window(events, false))
            .expect("replay");
        assert_eq!(states[&1], json!({"title": "a", "done": false}));
        assert_eq!(states[&2], json!({"title": "a", "done": true}));
    }

    #[test]
    fn unseeded_stream_is_an_error_unless_degraded() {
        let anchor = NodeRef::new("todo", 1);
        let builder = merge_node_builder();
        let events = vec![change(1, json!({"title": "a"}), None)];

        let err = Replayer::new(&anchor, &builder, None)
            .run(&window(events.clone(), false))
            .expect_err("no seed");
        assert!(matches!(err, ReconstructError::MissingSnapshot { event_id: 1, .. }));

        let states = Replayer::new(&anchor, &builder, None)
            .run(&window(events, true))
            .expect("degraded replay");
        assert_eq!(states[&1], json!({"title": "a"}));
    }

    #[test]
    fn fragment_events_before_the_anchor_exists_carry_the_empty_state() {
        let anchor = NodeRef::new("user", 7);
        let address = NodeRef::new("address", 11);
        let builder = merge_node_builder();
        let mut early = change(1, json!({"city": "Oslo"}), Some(json!({"city": "Oslo"})));
        early.node = address.clone();
        let mut user = change(2, json!({"name": "ada"}), Some(json!({"name": "ada"})));
        user.node = anchor.clone();

        let states = Replayer::new(&anchor, &builder, None)
            .run(&window(vec![early, user], false))
            .expect("replay");
        assert_eq!(states[&1], json!({}));
        assert_eq!(states[&2], json!({"name": "ada"}));
    }

    #[test]
    fn link_only_anchor_replays_as_empty() {
        let anchor = NodeRef::new("team", 3);
        let builder = merge_node_builder();
        let mut link = change(4, json!({}), None);
        link.node = anchor.clone();
        link.fact = VersionFact::LinkChange {
            link_node: NodeRef::new("user", 7),
        };

        let states = Replayer::new(&anchor, &builder, None)
            .run(&window(vec![link], true))
            .expect("replay");
        assert_eq!(states[&4], json!({}));
    }
}
