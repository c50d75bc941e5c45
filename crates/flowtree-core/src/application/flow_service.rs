use crate::{
    application::hierarchy_mutator::HierarchyMutator,
    application::progress_aggregator::ProgressAggregator,
    application::query_engine::QueryEngine,
    application::tree_builder::TreeBuilder,
    config::CoreConfig,
    domain::events::HierarchyEvent,
    domain::flow_node::{FlowId, FlowNode, FlowPatch, FlowType, NewFlow},
    domain::repository::FlowStore,
    domain::tree_view::TreeView,
    CoreError,
};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Facade over the hierarchy services; the single entry point for callers
#[derive(Clone)]
pub struct FlowService {
    store: Arc<dyn FlowStore>,
    query: QueryEngine,
    trees: TreeBuilder,
    progress: ProgressAggregator,
    mutator: HierarchyMutator,
    config: CoreConfig,
    events: broadcast::Sender<HierarchyEvent>,
}

impl FlowService {
    /// Wire every service over one store
    pub fn new(store: Arc<dyn FlowStore>, config: CoreConfig) -> Self {
        let query = QueryEngine::new(store.clone());
        let trees = TreeBuilder::new(store.clone(), query.clone());
        let progress = ProgressAggregator::new(trees.clone());
        let mutator = HierarchyMutator::new(store.clone(), query.clone(), config.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            store,
            query,
            trees,
            progress,
            mutator,
            config,
            events,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Receive every hierarchy change committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.events.subscribe()
    }

    /// Create a flow node
    pub async fn create_flow(
        &self,
        name: &str,
        description: Option<&str>,
        flow_type: FlowType,
        parent_id: Option<&FlowId>,
    ) -> Result<FlowNode, CoreError> {
        let mut request = NewFlow::new(name, flow_type);
        request.description = description.map(str::to_string);
        request.parent_id = parent_id.cloned();
        self.create(&request).await
    }

    /// Create a flow node from a full request
    #[tracing::instrument(skip(self, request), fields(parent_id = ?request.parent_id))]
    pub async fn create(&self, request: &NewFlow) -> Result<FlowNode, CoreError> {
        let node = self
            .with_retry("create", || self.mutator.create(request))
            .await?;
        self.publish(HierarchyEvent::Created {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(node)
    }

    /// Fetch a flow node
    pub async fn get_flow(&self, id: &FlowId) -> Result<FlowNode, CoreError> {
        self.store.get(id).await
    }

    /// Change non-structural fields of a flow node
    #[tracing::instrument(skip(self, patch), fields(flow_id = %id))]
    pub async fn update_flow(&self, id: &FlowId, patch: &FlowPatch) -> Result<FlowNode, CoreError> {
        let node = self
            .with_retry("update", || self.mutator.update(id, patch))
            .await?;
        self.publish(HierarchyEvent::Updated {
            id: node.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(node)
    }

    /// Reparent a flow node with its subtree
    #[tracing::instrument(skip(self), fields(flow_id = %id))]
    pub async fn move_flow(
        &self,
        id: &FlowId,
        new_parent_id: Option<&FlowId>,
    ) -> Result<FlowNode, CoreError> {
        let outcome = self
            .with_retry("move", || self.mutator.move_node(id, new_parent_id))
            .await?;
        if outcome.rewritten > 0 {
            self.publish(HierarchyEvent::Moved {
                id: outcome.node.id.clone(),
                from_parent: outcome.from_parent.clone(),
                to_parent: outcome.node.parent_id.clone(),
                rewritten: outcome.rewritten,
                timestamp: Utc::now(),
            });
        }
        Ok(outcome.node)
    }

    /// Delete a flow node, with its subtree when `cascade` is set
    #[tracing::instrument(skip(self), fields(flow_id = %id))]
    pub async fn delete_flow(&self, id: &FlowId, cascade: bool) -> Result<(), CoreError> {
        let outcome = self
            .with_retry("delete", || self.mutator.delete(id, cascade))
            .await?;
        self.publish(HierarchyEvent::Deleted {
            ids: outcome.deleted,
            reparented: outcome.reparented,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Clone a flow node, optionally with its subtree
    #[tracing::instrument(skip(self), fields(flow_id = %id))]
    pub async fn duplicate_flow(
        &self,
        id: &FlowId,
        include_children: bool,
        new_parent_id: Option<&FlowId>,
    ) -> Result<FlowNode, CoreError> {
        let outcome = self
            .with_retry("duplicate", || {
                self.mutator.duplicate(id, include_children, new_parent_id)
            })
            .await?;
        self.publish(HierarchyEvent::Duplicated {
            source: id.clone(),
            copy: outcome.root.id.clone(),
            nodes: outcome.id_map.len(),
            timestamp: Utc::now(),
        });
        Ok(outcome.root)
    }

    /// Nested view of one tree, or of the whole forest
    pub async fn get_tree(&self, root_id: Option<&FlowId>) -> Result<Vec<TreeView>, CoreError> {
        self.trees.build_tree(root_id).await
    }

    /// Ancestors ordered from the root down to the parent
    pub async fn get_ancestors(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        self.query.ancestors(id).await
    }

    /// Direct children, oldest first
    pub async fn get_children(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        self.query.children(id).await
    }

    /// Every node below `id`
    pub async fn get_descendants(&self, id: &FlowId) -> Result<Vec<FlowNode>, CoreError> {
        self.query.descendants(id).await
    }

    /// Every root node, oldest first
    pub async fn list_roots(&self) -> Result<Vec<FlowNode>, CoreError> {
        self.query.roots().await
    }

    /// Completion percentage of a node
    pub async fn get_progress(&self, id: &FlowId) -> Result<f64, CoreError> {
        self.progress.progress(id).await
    }

    /// Completion percentage of every node of a tree, or of every node
    pub async fn progress_map(
        &self,
        root_id: Option<&FlowId>,
    ) -> Result<HashMap<FlowId, f64>, CoreError> {
        self.progress.progress_map(root_id).await
    }

    /// Check the store is reachable
    pub async fn ping(&self) -> Result<(), CoreError> {
        self.store.ping().await
    }

    fn publish(&self, event: HierarchyEvent) {
        // No receivers is not an error
        if self.events.send(event).is_err() {
            tracing::trace!("Hierarchy event dropped, no subscribers");
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut run: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut retries = 0u32;
        loop {
            match run().await {
                Err(err) if err.is_retryable() && retries < self.config.max_commit_retries => {
                    retries += 1;
                    tracing::warn!(
                        operation,
                        attempt = retries,
                        error = %err,
                        "Commit conflict, retrying"
                    );
                    tokio::time::sleep(self.config.backoff(retries)).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(operation, retries, error = %err, "Giving up after conflicts");
                    }
                    return Err(err);
                }
                ok => return ok,
            }
        }
    }
}
