//! Store contract for the Flowtree core
//!
//! This module defines the `FlowStore` trait that every persistence backend
//! implements, together with the batch types consumed by its atomic commit
//! primitive. External crates implement the trait to provide different
//! persistence mechanisms.

use async_trait::async_trait;

use super::flow_node::{FlowId, FlowNode};
use crate::CoreError;

/// Version a batch expects a row to still have at commit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGuard {
    /// Row identifier
    pub id: FlowId,
    /// Version observed when the row was fetched
    pub version: u64,
}

impl ReadGuard {
    /// Guard the given node at its current version
    pub fn of(node: &FlowNode) -> Self {
        Self {
            id: node.id.clone(),
            version: node.version,
        }
    }
}

/// One write of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or overwrite the row
    Upsert(FlowNode),
    /// Remove the row
    Delete(FlowId),
}

impl WriteOp {
    /// Identifier of the row this write touches
    pub fn id(&self) -> &FlowId {
        match self {
            WriteOp::Upsert(node) => &node.id,
            WriteOp::Delete(id) => id,
        }
    }
}

/// Reads to re-verify and writes to apply, all or nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Rows whose versions must be unchanged at commit time
    pub reads: Vec<ReadGuard>,
    /// Writes in application order
    pub writes: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard a node at its current version
    pub fn read(&mut self, node: &FlowNode) -> &mut Self {
        self.reads.push(ReadGuard::of(node));
        self
    }

    /// Queue an upsert
    pub fn upsert(&mut self, node: FlowNode) -> &mut Self {
        self.writes.push(WriteOp::Upsert(node));
        self
    }

    /// Queue a delete
    pub fn delete(&mut self, id: FlowId) -> &mut Self {
        self.writes.push(WriteOp::Delete(id));
        self
    }

    /// Whether the batch writes nothing
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Authoritative collection of flow nodes
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Find a node by ID
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowNode>, CoreError>;

    /// Get a node by ID, failing with `NotFound` when absent
    async fn get(&self, id: &FlowId) -> Result<FlowNode, CoreError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.0.clone()))
    }

    /// Insert or overwrite a single row without batch checks
    async fn put(&self, node: &FlowNode) -> Result<(), CoreError>;

    /// Remove a single row without batch checks
    async fn delete(&self, id: &FlowId) -> Result<(), CoreError>;

    /// Every node whose path begins with `prefix`, in path order
    async fn scan_by_path_prefix(&self, prefix: &[FlowId]) -> Result<Vec<FlowNode>, CoreError>;

    /// Every node without a parent
    async fn scan_roots(&self) -> Result<Vec<FlowNode>, CoreError>;

    /// Every node in the store
    async fn scan_all(&self) -> Result<Vec<FlowNode>, CoreError>;

    /// Commit a batch atomically.
    ///
    /// Fails without any effect when a guarded row changed since it was read
    /// or when the resulting state would break the hierarchy invariants.
    async fn apply(&self, batch: WriteBatch) -> Result<(), CoreError>;

    /// Cheap reachability check for health endpoints
    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Simple in-memory store, mainly for tests and embedding.
///
/// Scans are linear; use `flowtree-state-inmemory` for an indexed store.
pub mod memory {
    use super::*;
    use crate::domain::integrity::{verify_batch, verify_reads, Snapshot};
    use crate::domain::path;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// In-memory flow store over a single locked map
    #[derive(Clone, Default)]
    pub struct MemoryFlowStore {
        nodes: Arc<RwLock<HashMap<FlowId, FlowNode>>>,
    }

    impl MemoryFlowStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of stored rows
        pub async fn len(&self) -> usize {
            self.nodes.read().await.len()
        }

        /// Whether the store holds no rows
        pub async fn is_empty(&self) -> bool {
            self.nodes.read().await.is_empty()
        }
    }

    fn stamp(node: &mut FlowNode, previous_version: Option<u64>) {
        node.version = previous_version.unwrap_or(0) + 1;
        node.updated_at = Utc::now();
    }

    fn sorted_by_path(mut nodes: Vec<FlowNode>) -> Vec<FlowNode> {
        nodes.sort_by_cached_key(|node| path::encode(&node.path));
        nodes
    }

    #[async_trait]
    impl FlowStore for MemoryFlowStore {
        async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowNode>, CoreError> {
            Ok(self.nodes.read().await.get(id).cloned())
        }

        async fn put(&self, node: &FlowNode) -> Result<(), CoreError> {
            node.id.validate()?;
            let mut nodes = self.nodes.write().await;
            let mut row = node.clone();
            stamp(&mut row, nodes.get(&node.id).map(|row| row.version));
            nodes.insert(row.id.clone(), row);
            Ok(())
        }

        async fn delete(&self, id: &FlowId) -> Result<(), CoreError> {
            self.nodes.write().await.remove(id);
            Ok(())
        }

        async fn scan_by_path_prefix(
            &self,
            prefix: &[FlowId],
        ) -> Result<Vec<FlowNode>, CoreError> {
            let nodes = self.nodes.read().await;
            Ok(sorted_by_path(
                nodes
                    .values()
                    .filter(|node| path::starts_with(&node.path, prefix))
                    .cloned()
                    .collect(),
            ))
        }

        async fn scan_roots(&self) -> Result<Vec<FlowNode>, CoreError> {
            let nodes = self.nodes.read().await;
            Ok(sorted_by_path(
                nodes.values().filter(|node| node.is_root()).cloned().collect(),
            ))
        }

        async fn scan_all(&self) -> Result<Vec<FlowNode>, CoreError> {
            let nodes = self.nodes.read().await;
            Ok(sorted_by_path(nodes.values().cloned().collect()))
        }

        async fn apply(&self, batch: WriteBatch) -> Result<(), CoreError> {
            let mut nodes = self.nodes.write().await;
            let snapshot = Snapshot::from_nodes(nodes.values().cloned());
            verify_reads(&snapshot, &batch.reads)?;
            verify_batch(&snapshot, &batch.writes)?;

            for write in batch.writes {
                match write {
                    WriteOp::Upsert(mut node) => {
                        let previous = nodes.get(&node.id).map(|row| row.version);
                        stamp(&mut node, previous);
                        nodes.insert(node.id.clone(), node);
                    }
                    WriteOp::Delete(id) => {
                        nodes.remove(&id);
                    }
                }
            }
            Ok(())
        }
    }
}
