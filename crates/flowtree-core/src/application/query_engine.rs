use crate::{
    domain::flow_node::{FlowId, FlowNode},
    domain::repository::FlowStore,
    CoreError,
};
use std::sync::Arc;

/// Ancestor, descendant and subtree lookups over the path index
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn FlowStore>,
}

impl QueryEngine {
    /// Create a query engine over the given store
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Ancestors of `id`, ordered from the root down to the immediate parent
    pub async fn ancestors(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        let node = self.store.get(id).await?;
        let mut ancestors = Vec::with_capacity(node.depth as usize);
        for ancestor_id in node.ancestor_ids() {
            let ancestor = self.store.find_by_id(ancestor_id).await?.ok_or_else(|| {
                CoreError::StructuralCorruption(format!(
                    "ancestor {} of {} is missing",
                    ancestor_id, id
                ))
            })?;
            ancestors.push(ancestor);
        }
        Ok(ancestors)
    }

    /// Every node strictly below `id`, in path order
    pub async fn descendants(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        let node = self.store.get(id).await?;
        self.descendants_of(&node).await
    }

    /// Descendants of an already fetched node
    pub async fn descendants_of(&self, node: &FlowNode) -> Result<Vec<FlowNode>, CoreError> {
        let mut scanned = self.store.scan_by_path_prefix(&node.path).await?;
        scanned.retain(|candidate| candidate.id != node.id);
        Ok(scanned)
    }

    /// Direct children of `id`, oldest first
    pub async fn children(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        let node = self.store.get(id).await?;
        let mut children: Vec<FlowNode> = self
            .descendants_of(&node)
            .await?
            .into_iter()
            .filter(|candidate| candidate.depth == node.depth + 1)
            .collect();
        sort_siblings(&mut children);
        Ok(children)
    }

    /// `id` followed by all of its descendants
    pub async fn subtree(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        let node = self.store.get(id).await?;
        self.subtree_of(node).await
    }

    /// Subtree of an already fetched node, node first
    pub async fn subtree_of(&self, node: FlowNode) -> Result<Vec<FlowNode>, CoreError> {
        let descendants = self.descendants_of(&node).await?;
        let mut subtree = Vec::with_capacity(descendants.len() + 1);
        subtree.push(node);
        subtree.extend(descendants);
        Ok(subtree)
    }

    /// Every root node, oldest first
    pub async fn roots(&self) -> Result<Vec<FlowNode>, CoreError> {
        let mut roots = self.store.scan_roots().await?;
        sort_siblings(&mut roots);
        Ok(roots)
    }
}

/// Order siblings by creation time, ties broken by id
pub fn sort_siblings(nodes: &mut [FlowNode]) {
    nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
