//! Pure derivation of event facts from one recorded operation.

use serde_json::Value;
use thiserror::Error;

use crate::{
    event::{
        EventFact, EventInfo, EventInfoBase, FragmentRegisterInfo, LinkChangeInfo, NodeChangeInfo,
    },
    types::{NodeRef, SchemaVersion},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("{role} node has an empty {field}")]
    BlankIdentity { role: &'static str, field: &'static str },
    #[error("edge {index} links {node} to itself")]
    SelfLink { index: usize, node: NodeRef },
    #[error("{node} cannot be registered as a fragment of itself")]
    SelfFragment { node: NodeRef },
}

/// An edge touching the recorded node, as reported by the `edges` extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdge {
    pub from: NodeRef,
    pub to: NodeRef,
}

impl LinkEdge {
    pub fn new(from: NodeRef, to: NodeRef) -> Self {
        Self { from, to }
    }
}

fn check_identity(role: &'static str, node: &NodeRef) -> Result<(), ExtractionError> {
    if node.node_name.trim().is_empty() {
        return Err(ExtractionError::BlankIdentity {
            role,
            field: "nodeName",
        });
    }
    if node.node_id.trim().is_empty() {
        return Err(ExtractionError::BlankIdentity {
            role,
            field: "nodeId",
        });
    }
    Ok(())
}

/// The node-change event every recorded operation produces.
pub fn node_change_event(
    base: &EventInfoBase,
    revision_data: Value,
    node_schema_version: SchemaVersion,
) -> Result<EventInfo, ExtractionError> {
    check_identity("recorded", &base.node)?;
    Ok(EventInfo {
        base: base.clone(),
        fact: EventFact::NodeChange(NodeChangeInfo {
            revision_data,
            node_schema_version,
            snapshot: None,
        }),
    })
}

/// Two link-change events per edge, one anchored at each end, sharing the
/// base timestamp.
pub fn link_change_events(
    base: &EventInfoBase,
    edges: &[LinkEdge],
) -> Result<Vec<EventInfo>, ExtractionError> {
    let mut out = Vec::with_capacity(edges.len() * 2);
    for (index, edge) in edges.iter().enumerate() {
        check_identity("edge source", &edge.from)?;
        check_identity("edge target", &edge.to)?;
        if edge.from == edge.to {
            return Err(ExtractionError::SelfLink {
                index,
                node: edge.from.clone(),
            });
        }
        for (anchor, link_node) in [(&edge.from, &edge.to), (&edge.to, &edge.from)] {
            out.push(EventInfo {
                base: EventInfoBase {
                    node: anchor.clone(),
                    ..base.clone()
                },
                fact: EventFact::LinkChange(LinkChangeInfo {
                    link_node: link_node.clone(),
                }),
            });
        }
    }
    Ok(out)
}

/// Registers the recorded node as a fragment of `parent`. The event is
/// anchored at the child.
pub fn fragment_register_event(
    base: &EventInfoBase,
    parent: Option<NodeRef>,
) -> Result<Option<EventInfo>, ExtractionError> {
    let Some(parent) = parent else {
        return Ok(None);
    };
    check_identity("parent", &parent)?;
    if parent == base.node {
        return Err(ExtractionError::SelfFragment { node: parent });
    }
    Ok(Some(EventInfo {
        base: base.clone(),
        fact: EventFact::FragmentRegister(FragmentRegisterInfo {
            parent,
            child: base.node.clone(),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base(node: NodeRef) -> EventInfoBase {
        EventInfoBase {
            created_at: 1_000,
            user_id: "u1".to_string(),
            node,
            resolver_operation: "edgeCreate".to_string(),
            user_roles: vec!["admin".to_string()],
            snapshot_frequency: 10,
        }
    }

    #[test]
    fn every_edge_yields_a_mirrored_pair() {
        let user = NodeRef::new("user", 7);
        let team = NodeRef::new("team", 3);
        let events =
            link_change_events(&base(user.clone()), &[LinkEdge::new(user.clone(), team.clone())])
                .expect("edges");

        assert_eq!(events.len(), 2);
        let pairs: Vec<_> = events
            .iter()
            .map(|e| match &e.fact {
                EventFact::LinkChange(link) => (e.base.node.clone(), link.link_node.clone()),
                other => panic!("unexpected fact {other:?}"),
            })
            .collect();
        assert_eq!(pairs, vec![(user.clone(), team.clone()), (team, user)]);
        assert!(events.iter().all(|e| e.base.created_at == 1_000));
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let node = NodeRef::new("todo", 1);
        let blank = NodeRef::new("team", "");
        assert_eq!(
            link_change_events(&base(node.clone()), &[LinkEdge::new(node.clone(), blank)]),
            Err(ExtractionError::BlankIdentity {
                role: "edge target",
                field: "nodeId"
            })
        );
        assert!(matches!(
            link_change_events(&base(node.clone()), &[LinkEdge::new(node.clone(), node.clone())]),
            Err(ExtractionError::SelfLink { index: 0, .. })
        ));
        assert!(matches!(
            fragment_register_event(&base(node.clone()), Some(node)),
            Err(ExtractionError::SelfFragment { .. })
        ));
    }

    #[test]
    fn fragment_event_is_anchored_at_the_child() {
        let child = NodeRef::new("address", 9);
        let parent = NodeRef::new("user", 7);
        let event = fragment_register_event(&base(child.clone()), Some(parent.clone()))
            .expect("fragment")
            .expect("registered");
        assert_eq!(event.base.node, child);
        assert_eq!(
            event.fact,
            EventFact::FragmentRegister(FragmentRegisterInfo { parent, child })
        );
        assert_eq!(fragment_register_event(&base(NodeRef::new("a", 1)), None), Ok(None));
    }

    #[test]
    fn node_change_starts_without_snapshot() {
        let event = node_change_event(&base(NodeRef::new("todo", 1)), json!({"title": "x"}), 2)
            .expect("node change");
        assert_eq!(event.fact.implementor_type(), crate::types::ImplementorType::NodeChange);
        assert!(matches!(event.fact, EventFact::NodeChange(NodeChangeInfo { snapshot: None, .. })));
    }
}
