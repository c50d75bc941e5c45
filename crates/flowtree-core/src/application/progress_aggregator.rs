use crate::{
    application::tree_builder::TreeBuilder,
    domain::flow_node::FlowId,
    domain::tree_view::TreeView,
    CoreError,
};
use std::collections::HashMap;

/// Bottom-up completion percentages
#[derive(Clone)]
pub struct ProgressAggregator {
    trees: TreeBuilder,
}

impl ProgressAggregator {
    /// Create a progress aggregator
    pub fn new(trees: TreeBuilder) -> Self {
        Self { trees }
    }

    /// Completion of `id` in [0, 100]
    pub async fn progress(&self, id: &FlowId) -> Result<f64, CoreError> {
        let memo = self.progress_map(Some(id)).await?;
        memo.get(id)
            .copied()
            .ok_or_else(|| CoreError::NotFound(id.0.clone()))
    }

    /// Completion of every node under `root_id`, or of every node when absent
    pub async fn progress_map(
        &self,
        root_id: Option<&FlowId>,
    ) -> Result<HashMap<FlowId, f64>, CoreError> {
        let forest = self.trees.build_tree(root_id).await?;
        let mut memo = HashMap::new();
        for tree in &forest {
            Self::rollup(tree, &mut memo);
        }
        Ok(memo)
    }

    /// Post-order pass recording every node's completion in `memo`
    pub fn rollup(view: &TreeView, memo: &mut HashMap<FlowId, f64>) -> f64 {
        // (view, children already pushed)
        let mut stack = vec![(view, false)];
        while let Some((current, expanded)) = stack.pop() {
            if memo.contains_key(&current.node.id) {
                continue;
            }
            if current.children.is_empty() {
                memo.insert(current.node.id.clone(), current.node.leaf_progress());
            } else if expanded {
                let sum: f64 = current
                    .children
                    .iter()
                    .map(|child| memo.get(&child.node.id).copied().unwrap_or(0.0))
                    .sum();
                memo.insert(
                    current.node.id.clone(),
                    sum / current.children.len() as f64,
                );
            } else {
                stack.push((current, true));
                stack.extend(current.children.iter().map(|child| (child, false)));
            }
        }
        memo.get(&view.node.id).copied().unwrap_or(0.0)
    }
}
