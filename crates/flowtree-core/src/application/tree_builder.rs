use crate::{
    application::query_engine::{sort_siblings, QueryEngine},
    domain::flow_node::{FlowId, FlowNode},
    domain::repository::FlowStore,
    domain::tree_view::TreeView,
    CoreError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Assembles flat node sets into nested display trees
#[derive(Clone)]
pub struct TreeBuilder {
    store: Arc<dyn FlowStore>,
    query: QueryEngine,
}

impl TreeBuilder {
    /// Create a tree builder
    pub fn new(store: Arc<dyn FlowStore>, query: QueryEngine) -> Self {
        Self { store, query }
    }

    /// Build the subtree under `root_id`, or the whole forest when absent
    pub async fn build_tree(&self, root_id: Option<&FlowId>) -> Result<Vec<TreeView>, CoreError> {
        let nodes = match root_id {
            Some(id) => self.query.subtree(id).await?,
            None => self.store.scan_all().await?,
        };
        let forest = Self::assemble(nodes, root_id)?;

        tracing::debug!(
            root_id = ?root_id.map(|id| id.as_str()),
            trees = forest.len(),
            "Tree assembled"
        );
        Ok(forest)
    }

    /// Nest `nodes` under the node `root_id`, or under every parentless node.
    ///
    /// Every node must end up in the result; a child whose depth is not its
    /// parent's plus one, or a node that no root reaches, is corruption.
    pub fn assemble(
        nodes: Vec<FlowNode>,
        root_id: Option<&FlowId>,
    ) -> Result<Vec<TreeView>, CoreError> {
        let total = nodes.len();
        let max_depth = nodes.iter().map(|node| node.depth).max().unwrap_or(0);

        let mut roots = Vec::new();
        let mut by_parent: HashMap<FlowId, Vec<FlowNode>> = HashMap::new();
        for node in nodes {
            let is_root = match root_id {
                Some(root_id) => &node.id == root_id,
                None => node.parent_id.is_none(),
            };
            if is_root {
                roots.push(node);
            } else if let Some(parent_id) = node.parent_id.clone() {
                by_parent.entry(parent_id).or_default().push(node);
            } else {
                return Err(CoreError::StructuralCorruption(format!(
                    "{} has no parent but is not the subtree root",
                    node.id
                )));
            }
        }
        if let Some(root_id) = root_id {
            if roots.len() != 1 {
                return Err(CoreError::NotFound(root_id.0.clone()));
            }
        }
        sort_siblings(&mut roots);

        let mut placed = 0usize;
        let mut forest = Vec::with_capacity(roots.len());
        for root in roots {
            forest.push(attach(root, &mut by_parent, max_depth, &mut placed)?);
        }

        if placed != total {
            let mut stranded: Vec<&FlowId> = by_parent
                .values()
                .flatten()
                .map(|node| &node.id)
                .collect();
            stranded.sort();
            return Err(CoreError::StructuralCorruption(format!(
                "{} node(s) unreachable from any root: {:?}",
                total - placed,
                stranded
            )));
        }
        Ok(forest)
    }
}

struct Frame {
    node: FlowNode,
    /// Children still to visit, oldest last
    pending: Vec<FlowNode>,
    built: Vec<TreeView>,
}

impl Frame {
    fn open(node: FlowNode, by_parent: &mut HashMap<FlowId, Vec<FlowNode>>) -> Self {
        let mut pending = by_parent.remove(&node.id).unwrap_or_default();
        sort_siblings(&mut pending);
        pending.reverse();
        let built = Vec::with_capacity(pending.len());
        Self {
            node,
            pending,
            built,
        }
    }
}

/// Depth-first build of the view rooted at `root` on an explicit stack
fn attach(
    root: FlowNode,
    by_parent: &mut HashMap<FlowId, Vec<FlowNode>>,
    max_depth: u32,
    placed: &mut usize,
) -> Result<TreeView, CoreError> {
    *placed += 1;
    let mut current = Frame::open(root, by_parent);
    let mut ancestors: Vec<Frame> = Vec::new();
    loop {
        if let Some(child) = current.pending.pop() {
            if child.depth != current.node.depth + 1 || child.depth > max_depth {
                return Err(CoreError::StructuralCorruption(format!(
                    "{} sits at depth {} under {} at depth {}",
                    child.id, child.depth, current.node.id, current.node.depth
                )));
            }
            *placed += 1;
            let next = Frame::open(child, by_parent);
            ancestors.push(std::mem::replace(&mut current, next));
            continue;
        }

        let view = TreeView::new(current.node, current.built);
        match ancestors.pop() {
            Some(parent) => {
                current = parent;
                current.built.push(view);
            }
            None => return Ok(view),
        }
    }
}
