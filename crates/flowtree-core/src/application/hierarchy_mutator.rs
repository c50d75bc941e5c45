//! Structural writes: create, update, move, delete and duplicate
//!
//! Every operation computes its complete plan (the rows to rewrite, insert
//! or remove) before touching storage and commits it through a single
//! [`FlowStore::apply`] call guarded by the versions it read. Writers on the
//! same tree additionally serialize on an advisory lock keyed by `root_id`.

use crate::{
    application::query_engine::QueryEngine,
    config::{CoreConfig, OrphanPolicy},
    domain::flow_node::{validate_name, FlowId, FlowNode, FlowPatch, FlowType, NewFlow},
    domain::repository::{FlowStore, WriteBatch},
    CoreError,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const LOCK_ATTEMPTS: usize = 8;

/// Advisory per-tree locks
#[derive(Clone, Default)]
pub struct RootLocks {
    locks: Arc<DashMap<FlowId, Arc<Mutex<()>>>>,
}

/// Held locks for one or more trees; released on drop
pub struct TreeGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl RootLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every listed tree, always in sorted order
    pub async fn acquire(&self, mut roots: Vec<FlowId>) -> TreeGuard {
        roots.sort();
        roots.dedup();
        let mut guards = Vec::with_capacity(roots.len());
        for root in roots {
            let mutex = self.locks.entry(root).or_default().clone();
            guards.push(mutex.lock_owned().await);
        }
        TreeGuard { _guards: guards }
    }

    /// Drop table entries nobody holds or waits for
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of trees with a table entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Result of a move
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// The moved node as committed
    pub node: FlowNode,
    /// Parent before the move
    pub from_parent: Option<FlowId>,
    /// Number of rows rewritten, zero for a no-op
    pub rewritten: usize,
}

/// Result of a delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOutcome {
    /// Removed rows
    pub deleted: Vec<FlowId>,
    /// Rows moved up a level by the reparent policy
    pub reparented: Vec<FlowId>,
}

/// Result of a duplicate
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateOutcome {
    /// The cloned subtree root as committed
    pub root: FlowNode,
    /// Original id to copy id
    pub id_map: HashMap<FlowId, FlowId>,
}

/// Create, move, delete and duplicate flow nodes while keeping the hierarchy consistent
#[derive(Clone)]
pub struct HierarchyMutator {
    store: Arc<dyn FlowStore>,
    query: QueryEngine,
    config: CoreConfig,
    locks: RootLocks,
}

impl HierarchyMutator {
    /// Create a hierarchy mutator
    pub fn new(store: Arc<dyn FlowStore>, query: QueryEngine, config: CoreConfig) -> Self {
        Self {
            store,
            query,
            config,
            locks: RootLocks::new(),
        }
    }

    /// Lock table, shared by clones of this mutator
    pub fn locks(&self) -> &RootLocks {
        &self.locks
    }

    /// Create a node under `request.parent_id`, or a new root
    pub async fn create(&self, request: &NewFlow) -> Result<FlowNode, CoreError> {
        validate_name(&request.name)?;
        let id = FlowId::generate();
        let mut batch = WriteBatch::new();

        let node = match &request.parent_id {
            Some(parent_id) => {
                let (mut locked, _guard) = self.lock_trees(&[parent_id]).await?;
                let parent = locked.remove(0);
                self.check_type_order(Some(&parent), request.flow_type)?;
                let node = FlowNode::from_request(id.clone(), request, Some(&parent), Utc::now());
                batch.read(&parent).upsert(node.clone());
                self.store.apply(batch).await?;
                node
            }
            None => {
                let node = FlowNode::from_request(id.clone(), request, None, Utc::now());
                batch.upsert(node.clone());
                self.store.apply(batch).await?;
                node
            }
        };

        tracing::info!(
            flow_id = %node.id,
            root_id = %node.root_id,
            depth = node.depth,
            "Flow created"
        );
        self.store.get(&id).await
    }

    /// Change non-structural fields of a node
    pub async fn update(&self, id: &FlowId, patch: &FlowPatch) -> Result<FlowNode, CoreError> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        let current = self.store.get(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut updated = current.clone();
        updated.apply_patch(patch);
        let mut batch = WriteBatch::new();
        batch.read(&current).upsert(updated);
        self.store.apply(batch).await?;

        tracing::info!(flow_id = %id, "Flow updated");
        self.store.get(id).await
    }

    /// Reparent `id` under `new_parent_id`, or make it a root
    pub async fn move_node(
        &self,
        id: &FlowId,
        new_parent_id: Option<&FlowId>,
    ) -> Result<MoveOutcome, CoreError> {
        let mut targets = vec![id];
        targets.extend(new_parent_id);
        let (mut locked, guard) = self.lock_trees(&targets).await?;
        let node = locked.remove(0);
        let new_parent = locked.pop();

        if node.parent_id.as_ref() == new_parent_id {
            tracing::debug!(flow_id = %id, "Move to current parent is a no-op");
            return Ok(MoveOutcome {
                from_parent: node.parent_id.clone(),
                node,
                rewritten: 0,
            });
        }
        if let Some(parent) = &new_parent {
            if parent.id == node.id || parent.path.contains(&node.id) {
                return Err(CoreError::Cycle {
                    node: node.id.0.clone(),
                    target: parent.id.0.clone(),
                });
            }
        }
        self.check_type_order(new_parent.as_ref(), node.flow_type)?;

        let from_parent = node.parent_id.clone();
        let was_root = node.is_root();
        let subtree = self.query.subtree_of(node).await?;
        let rewritten = Self::plan_move(&subtree, new_parent.as_ref())?;

        let mut batch = WriteBatch::new();
        if let Some(parent) = &new_parent {
            batch.read(parent);
        }
        for original in &subtree {
            batch.read(original);
        }
        let count = rewritten.len();
        for row in rewritten {
            batch.upsert(row);
        }
        self.store.apply(batch).await?;
        drop(guard);
        if was_root {
            // The moved root's tree no longer exists
            self.locks.prune();
        }

        tracing::info!(
            flow_id = %id,
            from_parent = ?from_parent.as_ref().map(FlowId::as_str),
            to_parent = ?new_parent_id.map(FlowId::as_str),
            moved = count,
            "Flow moved"
        );
        Ok(MoveOutcome {
            node: self.store.get(id).await?,
            from_parent,
            rewritten: count,
        })
    }

    /// Remove `id`, its whole subtree when `cascade` is set
    pub async fn delete(&self, id: &FlowId, cascade: bool) -> Result<DeleteOutcome, CoreError> {
        let (mut locked, guard) = self.lock_trees(&[id]).await?;
        let node = locked.remove(0);
        let descendants = self.query.descendants_of(&node).await?;

        let mut batch = WriteBatch::new();
        batch.read(&node);
        for descendant in &descendants {
            batch.read(descendant);
        }

        let outcome = if cascade || descendants.is_empty() {
            let mut deleted = Vec::with_capacity(descendants.len() + 1);
            deleted.push(node.id.clone());
            deleted.extend(descendants.iter().map(|d| d.id.clone()));
            for removed in &deleted {
                batch.delete(removed.clone());
            }
            DeleteOutcome {
                deleted,
                reparented: Vec::new(),
            }
        } else {
            match self.config.orphan_policy {
                OrphanPolicy::Reject => {
                    return Err(CoreError::HasChildren(id.0.clone()));
                }
                OrphanPolicy::Reparent => {
                    if let Some(parent_id) = &node.parent_id {
                        let parent = self.store.get(parent_id).await?;
                        batch.read(&parent);
                    }
                    let rewritten = Self::plan_reparent(&node, &descendants)?;
                    let reparented = rewritten
                        .iter()
                        .filter(|row| row.parent_id == node.parent_id)
                        .map(|row| row.id.clone())
                        .collect();
                    batch.delete(node.id.clone());
                    for row in rewritten {
                        batch.upsert(row);
                    }
                    DeleteOutcome {
                        deleted: vec![node.id.clone()],
                        reparented,
                    }
                }
            }
        };

        self.store.apply(batch).await?;
        drop(guard);
        if node.is_root() {
            self.locks.prune();
        }

        tracing::info!(
            flow_id = %id,
            cascade,
            deleted = outcome.deleted.len(),
            reparented = outcome.reparented.len(),
            "Flow deleted"
        );
        Ok(outcome)
    }

    /// Clone `id` (and its subtree when `include_children`) under
    /// `new_parent_id`, defaulting to the original's parent
    pub async fn duplicate(
        &self,
        id: &FlowId,
        include_children: bool,
        new_parent_id: Option<&FlowId>,
    ) -> Result<DuplicateOutcome, CoreError> {
        let (source, destination, _guard) = self.lock_duplicate(id, new_parent_id).await?;
        self.check_type_order(destination.as_ref(), source.flow_type)?;

        let originals = if include_children {
            self.query.subtree_of(source).await?
        } else {
            vec![source]
        };
        let (copies, id_map) = Self::plan_duplicate(
            &originals,
            destination.as_ref(),
            Utc::now(),
            self.config.remap_customization_refs,
        )?;

        let mut batch = WriteBatch::new();
        if let Some(parent) = &destination {
            batch.read(parent);
        }
        for original in &originals {
            batch.read(original);
        }
        let copy_root = copies[0].id.clone();
        for copy in copies {
            batch.upsert(copy);
        }
        self.store.apply(batch).await?;

        tracing::info!(
            flow_id = %id,
            copy_id = %copy_root,
            nodes = id_map.len(),
            "Flow duplicated"
        );
        Ok(DuplicateOutcome {
            root: self.store.get(&copy_root).await?,
            id_map,
        })
    }

    /// Rewrite a subtree (root first) so that its root sits under `new_parent`
    pub fn plan_move(
        subtree: &[FlowNode],
        new_parent: Option<&FlowNode>,
    ) -> Result<Vec<FlowNode>, CoreError> {
        let Some(moved) = subtree.first() else {
            return Ok(Vec::new());
        };
        let old_prefix = moved.ancestor_ids().to_vec();
        let new_prefix = new_parent.map(|p| p.path.clone()).unwrap_or_default();
        let new_root = new_parent
            .map(|p| p.root_id.clone())
            .unwrap_or_else(|| moved.id.clone());

        let mut rewritten = Vec::with_capacity(subtree.len());
        for (index, original) in subtree.iter().enumerate() {
            let mut row = original.clone();
            row.rebase(&old_prefix, &new_prefix, &new_root)?;
            if index == 0 {
                row.parent_id = new_parent.map(|p| p.id.clone());
            }
            rewritten.push(row);
        }
        Ok(rewritten)
    }

    /// Rewrite the descendants of `removed` one level up
    pub fn plan_reparent(
        removed: &FlowNode,
        descendants: &[FlowNode],
    ) -> Result<Vec<FlowNode>, CoreError> {
        let old_prefix = removed.path.as_slice();
        let new_prefix = removed.ancestor_ids();

        let mut rewritten = Vec::with_capacity(descendants.len());
        for original in descendants {
            let new_root = match removed.parent_id {
                Some(_) => removed.root_id.clone(),
                None => original.path.get(old_prefix.len()).cloned().ok_or_else(|| {
                    CoreError::StructuralCorruption(format!(
                        "{} is not below {}",
                        original.id, removed.id
                    ))
                })?,
            };
            let mut row = original.clone();
            row.rebase(old_prefix, new_prefix, &new_root)?;
            if original.parent_id.as_ref() == Some(&removed.id) {
                row.parent_id = removed.parent_id.clone();
            }
            rewritten.push(row);
        }
        Ok(rewritten)
    }

    /// Clone `originals` (subtree root first, parents before children) under `destination`
    pub fn plan_duplicate(
        originals: &[FlowNode],
        destination: Option<&FlowNode>,
        now: DateTime<Utc>,
        remap_references: bool,
    ) -> Result<(Vec<FlowNode>, HashMap<FlowId, FlowId>), CoreError> {
        let id_map: HashMap<FlowId, FlowId> = originals
            .iter()
            .map(|original| (original.id.clone(), FlowId::generate()))
            .collect();
        let string_map: HashMap<String, String> = if remap_references {
            id_map
                .iter()
                .map(|(old, new)| (old.0.clone(), new.0.clone()))
                .collect()
        } else {
            HashMap::new()
        };

        // Copies share one timestamp base; offsets keep the original sibling order.
        let mut order: Vec<usize> = (0..originals.len()).collect();
        order.sort_by(|&a, &b| {
            originals[a]
                .created_at
                .cmp(&originals[b].created_at)
                .then_with(|| originals[a].id.cmp(&originals[b].id))
        });
        let mut rank = vec![0i64; originals.len()];
        for (position, &index) in order.iter().enumerate() {
            rank[index] = position as i64;
        }

        let mut copies: Vec<FlowNode> = Vec::with_capacity(originals.len());
        let mut positions: HashMap<FlowId, usize> = HashMap::with_capacity(originals.len());
        for (index, original) in originals.iter().enumerate() {
            let parent = if index == 0 {
                destination
            } else {
                let parent_id = original.parent_id.as_ref().ok_or_else(|| {
                    CoreError::StructuralCorruption(format!(
                        "{} has no parent inside the copied subtree",
                        original.id
                    ))
                })?;
                let position = positions.get(parent_id).copied().ok_or_else(|| {
                    CoreError::StructuralCorruption(format!(
                        "parent {} of {} was not copied first",
                        parent_id, original.id
                    ))
                })?;
                Some(&copies[position])
            };

            let mut copy = original.clone();
            copy.id = id_map[&original.id].clone();
            copy.created_at = now + Duration::microseconds(rank[index]);
            copy.updated_at = copy.created_at;
            copy.version = 0;
            copy.place_under(parent);
            if remap_references {
                for value in copy.customizations.values_mut() {
                    value.remap_references(&string_map);
                }
            }

            positions.insert(original.id.clone(), copies.len());
            copies.push(copy);
        }
        Ok((copies, id_map))
    }

    fn check_type_order(
        &self,
        parent: Option<&FlowNode>,
        child_type: FlowType,
    ) -> Result<(), CoreError> {
        match parent {
            Some(parent) if self.config.enforce_type_order && !parent.flow_type.admits(child_type) => {
                Err(CoreError::Validation(format!(
                    "a {} cannot be placed under a {}",
                    child_type.as_str(),
                    parent.flow_type.as_str()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Lock the source of a duplicate together with its destination.
    ///
    /// The default destination is the source's parent, which can change
    /// before the lock is granted; it is re-read under the lock and the
    /// acquisition repeated until both agree.
    async fn lock_duplicate(
        &self,
        id: &FlowId,
        new_parent_id: Option<&FlowId>,
    ) -> Result<(FlowNode, Option<FlowNode>, TreeGuard), CoreError> {
        for attempt in 1..=LOCK_ATTEMPTS {
            let destination_id = match new_parent_id {
                Some(parent_id) => Some(parent_id.clone()),
                None => self.store.get(id).await?.parent_id,
            };
            let mut targets = vec![id];
            targets.extend(destination_id.as_ref());

            let (mut locked, guard) = self.lock_trees(&targets).await?;
            let source = locked.remove(0);
            if new_parent_id.is_some() || source.parent_id == destination_id {
                return Ok((source, locked.pop(), guard));
            }
            tracing::debug!(attempt, flow_id = %id, "Duplicate source moved while waiting for its lock");
        }
        Err(CoreError::ConcurrentModification(format!(
            "{} kept moving while locking for duplicate",
            id
        )))
    }

    /// Fetch `ids` with the locks of their trees held.
    ///
    /// A node can change tree while we wait, so the roots are re-checked
    /// after locking and the whole acquisition repeated if any moved.
    async fn lock_trees(&self, ids: &[&FlowId]) -> Result<(Vec<FlowNode>, TreeGuard), CoreError> {
        for attempt in 1..=LOCK_ATTEMPTS {
            let mut roots = Vec::with_capacity(ids.len());
            for id in ids {
                roots.push(self.store.get(id).await?.root_id);
            }
            let guard = self.locks.acquire(roots.clone()).await;

            let mut fresh = Vec::with_capacity(ids.len());
            for id in ids {
                fresh.push(self.store.get(id).await?);
            }
            if fresh.iter().zip(&roots).all(|(node, root)| &node.root_id == root) {
                return Ok((fresh, guard));
            }
            tracing::debug!(attempt, "Tree changed root while waiting for its lock");
        }
        Err(CoreError::ConcurrentModification(format!(
            "trees of {:?} kept moving while locking",
            ids
        )))
    }
}
