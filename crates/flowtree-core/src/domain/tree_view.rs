use std::io::Write;

use super::flow_node::{FlowId, FlowNode};
use crate::CoreError;

/// A flow node with its children attached, as consumed by display layers.
///
/// Trees may be arbitrarily deep, so every walk over a view (length, search,
/// JSON output and drop) runs on an explicit stack. The JSON form is the
/// node's own fields followed by `has_children` and `children`.
#[derive(Debug)]
pub struct TreeView {
    /// The node itself
    pub node: FlowNode,

    /// Child views ordered by creation time
    pub children: Vec<TreeView>,

    /// Whether `children` is non-empty
    pub has_children: bool,
}

enum JsonStep<'a> {
    Open(&'a TreeView),
    Comma,
    Close,
}

impl TreeView {
    /// Wrap a node with the given children
    pub fn new(node: FlowNode, children: Vec<TreeView>) -> Self {
        let has_children = !children.is_empty();
        Self {
            node,
            children,
            has_children,
        }
    }

    /// Number of nodes in this view, itself included
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(view) = pending.pop() {
            count += 1;
            pending.extend(view.children.iter());
        }
        count
    }

    /// Always false; a view holds at least its own node
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Depth-first search for a node by id
    pub fn find(&self, id: &FlowId) -> Option<&TreeView> {
        let mut pending = vec![self];
        while let Some(view) = pending.pop() {
            if &view.node.id == id {
                return Some(view);
            }
            pending.extend(view.children.iter().rev());
        }
        None
    }

    /// Write this view as one JSON object
    pub fn write_json<W: Write>(&self, out: &mut W) -> Result<(), CoreError> {
        let mut steps = vec![JsonStep::Open(self)];
        while let Some(step) = steps.pop() {
            match step {
                JsonStep::Open(view) => {
                    let mut fields = serde_json::to_vec(&view.node)?;
                    // Reopen the node object to append the nesting fields
                    fields.pop();
                    out.write_all(&fields).map_err(io_error)?;
                    write!(
                        out,
                        ",\"has_children\":{},\"children\":[",
                        view.has_children
                    )
                    .map_err(io_error)?;

                    steps.push(JsonStep::Close);
                    for (index, child) in view.children.iter().enumerate().rev() {
                        steps.push(JsonStep::Open(child));
                        if index > 0 {
                            steps.push(JsonStep::Comma);
                        }
                    }
                }
                JsonStep::Comma => out.write_all(b",").map_err(io_error)?,
                JsonStep::Close => out.write_all(b"]}").map_err(io_error)?,
            }
        }
        Ok(())
    }

    /// JSON array of every tree in `forest`
    pub fn forest_to_json(forest: &[TreeView]) -> Result<Vec<u8>, CoreError> {
        let mut out = Vec::new();
        out.push(b'[');
        for (index, tree) in forest.iter().enumerate() {
            if index > 0 {
                out.push(b',');
            }
            tree.write_json(&mut out)?;
        }
        out.push(b']');
        Ok(out)
    }
}

impl Drop for TreeView {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut view) = pending.pop() {
            pending.append(&mut view.children);
        }
    }
}

fn io_error(err: std::io::Error) -> CoreError {
    CoreError::SerializationError(format!("Error writing tree: {}", err))
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

    #[test]
    fn test_json_keeps_node_fields_and_nesting() {
        let g1 = node("g1", None);
        let a = node("a", Some(&g1));
        let b = node("b", Some(&g1));
        let leaf = node("leaf", Some(&a));
        let tree = TreeView::new(
            g1,
            vec![
                TreeView::new(a, vec![TreeView::new(leaf, Vec::new())]),
                TreeView::new(b, Vec::new()),
            ],
        );

        let bytes = TreeView::forest_to_json(std::slice::from_ref(&tree)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json[0]["id"], "g1");
        assert_eq!(json[0]["depth"], 0);
        assert_eq!(json[0]["has_children"], true);
        assert_eq!(json[0]["children"][0]["id"], "a");
        assert_eq!(json[0]["children"][0]["children"][0]["id"], "leaf");
        assert_eq!(json[0]["children"][0]["children"][0]["has_children"], false);
        assert_eq!(json[0]["children"][1]["id"], "b");
        assert_eq!(json[0]["children"][1]["children"], serde_json::json!([]));
    }

    #[test]
    fn test_empty_forest_is_an_empty_array() {
        assert_eq!(TreeView::forest_to_json(&[]).unwrap(), b"[]".to_vec());
    }

    #[test]
    fn test_find_visits_children_in_order() {
        let g1 = node("g1", None);
        let a = node("a", Some(&g1));
        let tree = TreeView::new(g1, vec![TreeView::new(a, Vec::new())]);
        assert_eq!(tree.len(), 2);
        assert!(tree.find(&FlowId::from("a")).is_some());
        assert!(tree.find(&FlowId::from("zz")).is_none());
    }
}
