//! Default reducers for nodes whose revision data is a JSON merge patch.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::{
    BoxError,
    event::{VersionFact, VersionRecord},
    reconstruct::{FragmentNodeBuilder, FragmentStates, NodeBuilder},
};

/// Applies an RFC 7396 merge patch in place.
///
/// Objects merge key by key, `null` removes a key, anything else replaces
/// the target wholesale.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn apply_revision(state: &Value, event: &VersionRecord) -> Value {
    let mut next = state.clone();
    if let VersionFact::NodeChange { revision_data, .. } = &event.fact {
        merge_patch(&mut next, revision_data);
    }
    next
}

/// Applies the anchor's own node changes; events on fragments leave the
/// anchor untouched.
pub fn merge_node_builder() -> NodeBuilder {
    Arc::new(
        |state: &Value, event: &VersionRecord, fragments: &FragmentStates| -> Result<Value, BoxError> {
            if fragments.contains_key(&event.node) {
                return Ok(state.clone());
            }
            Ok(apply_revision(state, event))
        },
    )
}

pub fn merge_fragment_builder() -> FragmentNodeBuilder {
    Arc::new(|state: &Value, event: &VersionRecord| -> Result<Value, BoxError> {
        Ok(apply_revision(state, event))
    })
}
