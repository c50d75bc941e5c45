//! In-memory flow store for Flowtree
//!
//! This crate provides an indexed, process-local implementation of the
//! `FlowStore` contract defined in flowtree-core. It is primarily useful for
//! development, testing, and deployments where persistence is not required.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use flowtree_core::{
    domain::integrity::{verify_batch, verify_reads, NodeLookup},
    domain::path,
    CoreError, FlowId, FlowNode, FlowStore, WriteBatch, WriteOp,
};

#[derive(Default)]
struct State {
    nodes: HashMap<FlowId, FlowNode>,
    // encoded path -> id, ordered for prefix range scans
    path_index: BTreeMap<String, FlowId>,
    children: HashMap<FlowId, BTreeSet<FlowId>>,
}

impl State {
    fn upsert(&mut self, node: FlowNode) {
        let previous = self.remove(&node.id).map(|p| p.version).unwrap_or(0);
        self.insert(node, previous);
    }

    fn insert(&mut self, mut node: FlowNode, previous_version: u64) {
        node.version = previous_version + 1;
        node.updated_at = Utc::now();

        self.path_index
            .insert(path::encode(&node.path), node.id.clone());
        if let Some(parent_id) = &node.parent_id {
            self.children
                .entry(parent_id.clone())
                .or_default()
                .insert(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    fn remove(&mut self, id: &FlowId) -> Option<FlowNode> {
        let node = self.nodes.remove(id)?;
        self.path_index.remove(&path::encode(&node.path));
        if let Some(parent_id) = &node.parent_id {
            if let Some(siblings) = self.children.get_mut(parent_id) {
                siblings.remove(id);
                if siblings.is_empty() {
                    self.children.remove(parent_id);
                }
            }
        }
        Some(node)
    }

    fn scan_prefix(&self, prefix: &[FlowId]) -> Vec<FlowNode> {
        if prefix.is_empty() {
            return self.scan_ordered();
        }
        let lower = path::encode(prefix);
        let upper = path::prefix_upper_bound(&lower);
        self.path_index
            .range(lower..upper)
            .filter_map(|(_, id)| self.nodes.get(id).cloned())
            .collect()
    }

    fn scan_ordered(&self) -> Vec<FlowNode> {
        self.path_index
            .values()
            .filter_map(|id| self.nodes.get(id).cloned())
            .collect()
    }
}

impl NodeLookup for State {
    fn node(&self, id: &FlowId) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    fn child_ids(&self, id: &FlowId) -> Vec<FlowId> {
        self.children
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// In-memory flow store with an ordered path index
#[derive(Clone, Default)]
pub struct InMemoryFlowStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryFlowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `nodes`, stamped as version 1
    pub async fn seeded(nodes: impl IntoIterator<Item = FlowNode>) -> Result<Self, CoreError> {
        let store = Self::new();
        for node in nodes {
            store.put(&node).await?;
        }
        Ok(store)
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    /// Whether the store holds no rows
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.nodes.is_empty()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowNode>, CoreError> {
        Ok(self.state.read().await.nodes.get(id).cloned())
    }

    async fn put(&self, node: &FlowNode) -> Result<(), CoreError> {
        node.id.validate()?;
        self.state.write().await.upsert(node.clone());
        debug!(flow_id = %node.id, "Row written");
        Ok(())
    }

    async fn delete(&self, id: &FlowId) -> Result<(), CoreError> {
        if self.state.write().await.remove(id).is_some() {
            debug!(flow_id = %id, "Row removed");
        }
        Ok(())
    }

    async fn scan_by_path_prefix(&self, prefix: &[FlowId]) -> Result<Vec<FlowNode>, CoreError> {
        Ok(self.state.read().await.scan_prefix(prefix))
    }

    async fn scan_roots(&self) -> Result<Vec<FlowNode>, CoreError> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .filter(|node| node.is_root())
            .cloned()
            .collect())
    }

    async fn scan_all(&self) -> Result<Vec<FlowNode>, CoreError> {
        Ok(self.state.read().await.scan_ordered())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        verify_reads(&*state, &batch.reads)?;
        verify_batch(&*state, &batch.writes)?;

        // Removals first so that rewritten paths never collide in the index
        let mut versions = HashMap::with_capacity(batch.writes.len());
        for write in &batch.writes {
            if let Some(old) = state.remove(write.id()) {
                versions.insert(old.id, old.version);
            }
        }
        let writes = batch.writes.len();
        for write in batch.writes {
            if let WriteOp::Upsert(node) = write {
                let previous = versions.get(&node.id).copied().unwrap_or(0);
                state.insert(node, previous);
            }
        }

        debug!(writes, reads = batch.reads.len(), "Batch applied");
        Ok(())
    }
}
