//! Commit-time integrity checks shared by every store
//!
//! A store calls [`verify_reads`] and [`verify_batch`] against its current
//! state before applying a [`WriteBatch`](super::repository::WriteBatch).
//! Both functions only look at the rows a batch touches, their parents and
//! their direct children, so the cost is proportional to the batch.

use std::collections::HashMap;

use super::flow_node::{FlowId, FlowNode};
use super::repository::{ReadGuard, WriteOp};
use crate::CoreError;

/// Read access to the pre-commit state of a store
pub trait NodeLookup {
    /// Current row for `id`
    fn node(&self, id: &FlowId) -> Option<&FlowNode>;

    /// Identifiers of the rows whose `parent_id` is `id`
    fn child_ids(&self, id: &FlowId) -> Vec<FlowId>;
}

/// Owned lookup over an arbitrary set of rows
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    nodes: HashMap<FlowId, FlowNode>,
    children: HashMap<FlowId, Vec<FlowId>>,
}

impl Snapshot {
    /// Index the given rows
    pub fn from_nodes(nodes: impl IntoIterator<Item = FlowNode>) -> Self {
        let mut snapshot = Self::default();
        for node in nodes {
            if let Some(parent_id) = &node.parent_id {
                snapshot
                    .children
                    .entry(parent_id.clone())
                    .or_default()
                    .push(node.id.clone());
            }
            snapshot.nodes.insert(node.id.clone(), node);
        }
        snapshot
    }

    /// Number of indexed rows
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no rows are indexed
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeLookup for Snapshot {
    fn node(&self, id: &FlowId) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    fn child_ids(&self, id: &FlowId) -> Vec<FlowId> {
        self.children.get(id).cloned().unwrap_or_default()
    }
}

/// Fail with `ConcurrentModification` if any guarded row changed or vanished
pub fn verify_reads(state: &impl NodeLookup, reads: &[ReadGuard]) -> Result<(), CoreError> {
    for guard in reads {
        match state.node(&guard.id) {
            Some(current) if current.version == guard.version => {}
            Some(current) => {
                return Err(CoreError::ConcurrentModification(format!(
                    "{} changed (read version {}, now {})",
                    guard.id, guard.version, current.version
                )))
            }
            None => {
                return Err(CoreError::ConcurrentModification(format!(
                    "{} was removed",
                    guard.id
                )))
            }
        }
    }
    Ok(())
}

/// Fail if applying `writes` on top of `state` would break the hierarchy invariants.
///
/// Problems caused by rows the batch does not touch are reported as
/// `ConcurrentModification`; a batch that contradicts itself is reported as
/// `StructuralCorruption`.
pub fn verify_batch(state: &impl NodeLookup, writes: &[WriteOp]) -> Result<(), CoreError> {
    let mut overlay: HashMap<&FlowId, Option<&FlowNode>> = HashMap::with_capacity(writes.len());
    for write in writes {
        match write {
            WriteOp::Upsert(node) => overlay.insert(&node.id, Some(node)),
            WriteOp::Delete(id) => overlay.insert(id, None),
        };
    }

    let post = |id: &FlowId| -> Option<&FlowNode> {
        match overlay.get(id) {
            Some(written) => *written,
            None => state.node(id),
        }
    };
    let blame = |culprit: &FlowId, message: String| {
        if overlay.contains_key(culprit) {
            CoreError::StructuralCorruption(message)
        } else {
            CoreError::ConcurrentModification(message)
        }
    };

    for (id, written) in &overlay {
        match *written {
            Some(node) => {
                node.id.validate()?;
                if node.ancestor_ids().contains(&node.id) {
                    return Err(CoreError::StructuralCorruption(format!(
                        "{} would become its own ancestor",
                        node.id
                    )));
                }

                let parent = node.parent_id.as_ref().and_then(|p| post(p));
                if let Err(message) = node.check_placement(parent) {
                    let culprit = node.parent_id.as_ref().unwrap_or(&node.id);
                    return Err(blame(culprit, message));
                }
                for ancestor in node.ancestor_ids() {
                    if post(ancestor).is_none() {
                        return Err(blame(
                            ancestor,
                            format!("ancestor {} of {} would not exist", ancestor, node.id),
                        ));
                    }
                }

                for child_id in state.child_ids(id) {
                    if overlay.contains_key(&child_id) {
                        continue;
                    }
                    if let Some(child) = state.node(&child_id) {
                        child.check_placement(Some(node)).map_err(|message| {
                            CoreError::ConcurrentModification(format!(
                                "untouched child {} no longer fits: {}",
                                child_id, message
                            ))
                        })?;
                    }
                }
            }
            None => {
                if let Some(orphan) = state
                    .child_ids(id)
                    .into_iter()
                    .find(|child_id| !overlay.contains_key(child_id))
                {
                    return Err(CoreError::ConcurrentModification(format!(
                        "deleting {} would orphan {}",
                        id, orphan
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_node::{FlowType, NewFlow};
    use chrono::Utc;

    fn node(id: &str, parent: Option<&FlowNode>) -> FlowNode {
        let mut request = NewFlow::new(id, FlowType::Task);
        request.parent_id = parent.map(|p| p.id.clone());
        FlowNode::from_request(FlowId::from(id), &request, parent, Utc::now())
    }

    fn chain() -> (FlowNode, FlowNode, FlowNode) {
        let g1 = node("g1", None);
        let p1 = node("p1", Some(&g1));
        let t1 = node("t1", Some(&p1));
        (g1, p1, t1)
    }

    #[test]
    fn test_reads_detect_version_change() {
        let (g1, mut p1, t1) = chain();
        let guard = ReadGuard::of(&p1);
        p1.version += 1;
        let state = Snapshot::from_nodes([g1, p1, t1]);

        assert!(matches!(
            verify_reads(&state, &[guard]),
            Err(CoreError::ConcurrentModification(_))
        ));
    }

    #[test]
    fn test_reads_detect_removal() {
        let (g1, p1, _) = chain();
        let guard = ReadGuard::of(&p1);
        let state = Snapshot::from_nodes([g1]);
        assert!(verify_reads(&state, &[guard]).is_err());
    }

    #[test]
    fn test_valid_create_passes() {
        let (g1, p1, t1) = chain();
        let state = Snapshot::from_nodes([g1, p1.clone()]);
        assert!(verify_batch(&state, &[WriteOp::Upsert(t1)]).is_ok());
    }

    #[test]
    fn test_create_under_missing_parent_is_a_conflict() {
        let (g1, _p1, t1) = chain();
        let state = Snapshot::from_nodes([g1]);
        assert!(matches!(
            verify_batch(&state, &[WriteOp::Upsert(t1)]),
            Err(CoreError::ConcurrentModification(_))
        ));
    }

    #[test]
    fn test_moving_parent_without_children_is_rejected() {
        let (g1, p1, t1) = chain();
        let g2 = node("g2", None);
        let state = Snapshot::from_nodes([g1, p1.clone(), t1, g2.clone()]);

        let mut moved = p1;
        moved.place_under(Some(&g2));
        assert!(matches!(
            verify_batch(&state, &[WriteOp::Upsert(moved)]),
            Err(CoreError::ConcurrentModification(_))
        ));
    }

    #[test]
    fn test_moving_whole_subtree_passes() {
        let (g1, p1, t1) = chain();
        let g2 = node("g2", None);
        let state = Snapshot::from_nodes([g1, p1.clone(), t1.clone(), g2.clone()]);

        let mut moved_p1 = p1;
        moved_p1.place_under(Some(&g2));
        let mut moved_t1 = t1;
        moved_t1.place_under(Some(&moved_p1));

        assert!(verify_batch(
            &state,
            &[WriteOp::Upsert(moved_p1), WriteOp::Upsert(moved_t1)]
        )
        .is_ok());
    }

    #[test]
    fn test_delete_leaving_orphan_is_rejected() {
        let (g1, p1, t1) = chain();
        let state = Snapshot::from_nodes([g1, p1.clone(), t1.clone()]);

        assert!(verify_batch(&state, &[WriteOp::Delete(p1.id.clone())]).is_err());
        assert!(verify_batch(
            &state,
            &[WriteOp::Delete(p1.id.clone()), WriteOp::Delete(t1.id.clone())]
        )
        .is_ok());
    }

    #[test]
    fn test_self_inconsistent_batch_is_corruption() {
        let (g1, p1, t1) = chain();
        let state = Snapshot::from_nodes([g1, p1.clone(), t1.clone()]);

        assert!(matches!(
            verify_batch(
                &state,
                &[WriteOp::Delete(p1.id.clone()), WriteOp::Upsert(t1)]
            ),
            Err(CoreError::StructuralCorruption(_))
        ));
    }

    #[test]
    fn test_cycle_in_path_is_corruption() {
        let (g1, p1, t1) = chain();
        let state = Snapshot::from_nodes([g1.clone(), p1.clone(), t1.clone()]);

        let mut looped = g1;
        looped.parent_id = Some(t1.id.clone());
        looped.path = vec![
            FlowId::from("g1"),
            FlowId::from("p1"),
            FlowId::from("t1"),
            FlowId::from("g1"),
        ];
        looped.depth = 3;
        assert!(matches!(
            verify_batch(&state, &[WriteOp::Upsert(looped)]),
            Err(CoreError::StructuralCorruption(_))
        ));
    }
}
