use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::flow_node::FlowId;

/// Committed change to the hierarchy, published after the batch landed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HierarchyEvent {
    /// A node was created
    Created {
        /// New node
        id: FlowId,
        /// Its parent, if any
        parent_id: Option<FlowId>,
        /// When the event was recorded
        timestamp: DateTime<Utc>,
    },

    /// Non-structural fields of a node changed
    Updated {
        /// Updated node
        id: FlowId,
        /// When the event was recorded
        timestamp: DateTime<Utc>,
    },

    /// A subtree was reparented
    Moved {
        /// Subtree root
        id: FlowId,
        /// Parent before the move
        from_parent: Option<FlowId>,
        /// Parent after the move
        to_parent: Option<FlowId>,
        /// Number of rows rewritten
        rewritten: usize,
        /// When the event was recorded
        timestamp: DateTime<Utc>,
    },

    /// Nodes were removed
    Deleted {
        /// Removed node identifiers
        ids: Vec<FlowId>,
        /// Children that were reparented instead of removed
        reparented: Vec<FlowId>,
        /// When the event was recorded
        timestamp: DateTime<Utc>,
    },

    /// A subtree was cloned
    Duplicated {
        /// Original subtree root
        source: FlowId,
        /// Cloned subtree root
        copy: FlowId,
        /// Number of rows created
        nodes: usize,
        /// When the event was recorded
        timestamp: DateTime<Utc>,
    },
}

impl HierarchyEvent {
    /// Node the event is primarily about
    pub fn subject(&self) -> Option<&FlowId> {
        match self {
            HierarchyEvent::Created { id, .. }
            | HierarchyEvent::Updated { id, .. }
            | HierarchyEvent::Moved { id, .. } => Some(id),
            HierarchyEvent::Deleted { ids, .. } => ids.first(),
            HierarchyEvent::Duplicated { copy, .. } => Some(copy),
        }
    }

    /// Short name of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            HierarchyEvent::Created { .. } => "created",
            HierarchyEvent::Updated { .. } => "updated",
            HierarchyEvent::Moved { .. } => "moved",
            HierarchyEvent::Deleted { .. } => "deleted",
            HierarchyEvent::Duplicated { .. } => "duplicated",
        }
    }
}
