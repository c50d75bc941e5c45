use crate::{
    domain::path::{self, PATH_SEPARATOR},
    types::Customizations,
    CoreError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Value object: Flow node ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub String);

impl FlowId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        FlowId(Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject identifiers that cannot be stored in a materialized path
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.0.is_empty() {
            return Err(CoreError::Validation("flow id must not be empty".to_string()));
        }
        if self.0.contains(PATH_SEPARATOR) {
            return Err(CoreError::Validation(format!(
                "flow id '{}' must not contain '{}'",
                self.0, PATH_SEPARATOR
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowId {
    fn from(s: &str) -> Self {
        FlowId(s.to_string())
    }
}

/// Soft hierarchy hint for a flow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    /// Top-level objective
    Goal,
    /// Body of work under a goal
    Project,
    /// Unit of work
    Task,
    /// Breakdown of a task
    Subtask,
}

impl FlowType {
    /// Position in the goal ⊇ project ⊇ task ⊇ subtask ordering
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            FlowType::Goal => 0,
            FlowType::Project => 1,
            FlowType::Task => 2,
            FlowType::Subtask => 3,
        }
    }

    /// Whether a node of type `child` may sit under a node of this type
    #[inline]
    pub fn admits(self, child: FlowType) -> bool {
        child.rank() >= self.rank()
    }

    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            FlowType::Goal => "goal",
            FlowType::Project => "project",
            FlowType::Task => "task",
            FlowType::Subtask => "subtask",
        }
    }
}

impl FromStr for FlowType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "goal" => Ok(FlowType::Goal),
            "project" => Ok(FlowType::Project),
            "task" => Ok(FlowType::Task),
            "subtask" => Ok(FlowType::Subtask),
            other => Err(CoreError::Validation(format!("unknown flow type: {}", other))),
        }
    }
}

/// Lifecycle status of a flow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Not started
    #[default]
    Draft,
    /// In progress
    Active,
    /// Done
    Completed,
    /// Put away
    Archived,
}

impl FromStr for FlowStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(FlowStatus::Draft),
            "active" => Ok(FlowStatus::Active),
            "completed" => Ok(FlowStatus::Completed),
            "archived" => Ok(FlowStatus::Archived),
            other => Err(CoreError::Validation(format!("unknown flow status: {}", other))),
        }
    }
}

/// Aggregate: one item of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique identifier
    pub id: FlowId,

    /// Display label
    pub name: String,

    /// Optional free text
    #[serde(default)]
    pub description: Option<String>,

    /// Hierarchy hint
    pub flow_type: FlowType,

    /// Lifecycle status
    #[serde(default)]
    pub status: FlowStatus,

    /// Parent node, absent for roots
    #[serde(default)]
    pub parent_id: Option<FlowId>,

    /// Top-most ancestor (self for roots)
    pub root_id: FlowId,

    /// Number of ancestors
    pub depth: u32,

    /// Ancestor identifiers from the root down to self, inclusive
    pub path: Vec<FlowId>,

    /// Index of the step currently being worked on
    #[serde(default)]
    pub current_step: u32,

    /// Indices of finished steps
    #[serde(default)]
    pub completed_steps: Vec<u32>,

    /// Number of steps a leaf needs to finish
    #[serde(default)]
    pub total_steps: u32,

    /// Caller-owned values
    #[serde(default)]
    pub customizations: Customizations,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last write timestamp, stamped by the store
    pub updated_at: DateTime<Utc>,

    /// Row version, stamped by the store; the optimistic concurrency token
    #[serde(default)]
    pub version: u64,
}

impl FlowNode {
    /// Build a node positioned under `parent` (or as a root) from a creation request.
    ///
    /// The store assigns `version` and the final `updated_at` on commit.
    pub fn from_request(
        id: FlowId,
        request: &NewFlow,
        parent: Option<&FlowNode>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut node = Self {
            id: id.clone(),
            name: request.name.trim().to_string(),
            description: request.description.clone().filter(|d| !d.is_empty()),
            flow_type: request.flow_type,
            status: request.status.unwrap_or_default(),
            parent_id: None,
            root_id: id.clone(),
            depth: 0,
            path: vec![id],
            current_step: 0,
            completed_steps: Vec::new(),
            total_steps: request.total_steps.unwrap_or(0),
            customizations: request.customizations.clone().unwrap_or_default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        node.place_under(parent);
        node
    }

    /// Whether the node has no parent
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Path without the node itself (the ancestor identifiers)
    #[inline]
    pub fn ancestor_ids(&self) -> &[FlowId] {
        match self.path.split_last() {
            Some((_, ancestors)) => ancestors,
            None => &[],
        }
    }

    /// Recompute `parent_id`, `root_id`, `depth` and `path` for a single node
    pub fn place_under(&mut self, parent: Option<&FlowNode>) {
        match parent {
            Some(parent) => {
                self.parent_id = Some(parent.id.clone());
                self.root_id = parent.root_id.clone();
                self.depth = parent.depth + 1;
                self.path = parent.path.clone();
                self.path.push(self.id.clone());
            }
            None => {
                self.parent_id = None;
                self.root_id = self.id.clone();
                self.depth = 0;
                self.path = vec![self.id.clone()];
            }
        }
    }

    /// Check depth, path and root consistency against the node's actual parent.
    ///
    /// Returns a description of the first broken rule.
    pub fn check_placement(&self, parent: Option<&FlowNode>) -> Result<(), String> {
        if self.path.last() != Some(&self.id) {
            return Err(format!("path of {} does not end with itself", self.id));
        }
        if self.path.len() != self.depth as usize + 1 {
            return Err(format!(
                "{} has depth {} but a path of length {}",
                self.id,
                self.depth,
                self.path.len()
            ));
        }
        match (&self.parent_id, parent) {
            (None, _) => {
                if self.root_id != self.id {
                    return Err(format!("root {} names {} as its root", self.id, self.root_id));
                }
            }
            (Some(parent_id), Some(parent)) => {
                if parent.id != *parent_id {
                    return Err(format!("{} checked against wrong parent {}", self.id, parent.id));
                }
                if self.root_id != parent.root_id {
                    return Err(format!(
                        "{} has root {} but its parent {} has root {}",
                        self.id, self.root_id, parent.id, parent.root_id
                    ));
                }
                if self.depth != parent.depth + 1 || self.ancestor_ids() != parent.path.as_slice() {
                    return Err(format!(
                        "path of {} is not its parent's path plus itself",
                        self.id
                    ));
                }
            }
            (Some(parent_id), None) => {
                return Err(format!("parent {} of {} does not exist", parent_id, self.id));
            }
        }
        Ok(())
    }

    /// Rewrite a subtree member after its subtree root moved.
    ///
    /// `old_prefix` is the moved root's ancestor path before the move and
    /// `new_prefix` the one after it.
    pub fn rebase(
        &mut self,
        old_prefix: &[FlowId],
        new_prefix: &[FlowId],
        new_root: &FlowId,
    ) -> Result<(), CoreError> {
        let rebased = path::is_strict_extension(&self.path, old_prefix)
            .then(|| path::rebase(&self.path, old_prefix, new_prefix))
            .flatten()
            .ok_or_else(|| {
                CoreError::StructuralCorruption(format!(
                    "path of {} does not extend the moved subtree's prefix",
                    self.id
                ))
            })?;
        self.depth = (rebased.len() - 1) as u32;
        self.root_id = new_root.clone();
        self.path = rebased;
        Ok(())
    }

    /// Completion of this node considered as a leaf, in [0, 100]
    pub fn leaf_progress(&self) -> f64 {
        if self.status == FlowStatus::Completed {
            return 100.0;
        }
        let total = self.total_steps.max(1) as f64;
        (self.completed_steps.len() as f64 / total * 100.0).min(100.0)
    }

    /// Apply a non-structural patch
    pub fn apply_patch(&mut self, patch: &FlowPatch) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = if description.is_empty() {
                None
            } else {
                Some(description.clone())
            };
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(customizations) = &patch.customizations {
            self.customizations = customizations.clone();
        }
        if let Some(current_step) = patch.current_step {
            self.current_step = current_step;
        }
        if let Some(completed_steps) = &patch.completed_steps {
            self.completed_steps = completed_steps.clone();
        }
        if let Some(total_steps) = patch.total_steps {
            self.total_steps = total_steps;
        }
    }
}

/// Request to create a flow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlow {
    /// Display label
    pub name: String,
    /// Optional free text
    #[serde(default)]
    pub description: Option<String>,
    /// Hierarchy hint
    pub flow_type: FlowType,
    /// Parent node, absent to create a root
    #[serde(default)]
    pub parent_id: Option<FlowId>,
    /// Initial status (draft when absent)
    #[serde(default)]
    pub status: Option<FlowStatus>,
    /// Number of steps for leaf progress
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Initial customizations
    #[serde(default)]
    pub customizations: Option<Customizations>,
}

impl NewFlow {
    /// Request for a node with the given name and type
    pub fn new(name: impl Into<String>, flow_type: FlowType) -> Self {
        Self {
            name: name.into(),
            description: None,
            flow_type,
            parent_id: None,
            status: None,
            total_steps: None,
            customizations: None,
        }
    }

    /// Place the new node under `parent_id`
    pub fn under(mut self, parent_id: FlowId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the number of steps
    pub fn with_total_steps(mut self, total_steps: u32) -> Self {
        self.total_steps = Some(total_steps);
        self
    }

    /// Set the customizations
    pub fn with_customizations(mut self, customizations: Customizations) -> Self {
        self.customizations = Some(customizations);
        self
    }
}

/// Non-structural field update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowPatch {
    /// New display label
    #[serde(default)]
    pub name: Option<String>,
    /// New description; an empty string clears it
    #[serde(default)]
    pub description: Option<String>,
    /// New status
    #[serde(default)]
    pub status: Option<FlowStatus>,
    /// Replacement customizations
    #[serde(default)]
    pub customizations: Option<Customizations>,
    /// New current step
    #[serde(default)]
    pub current_step: Option<u32>,
    /// Replacement list of completed steps
    #[serde(default)]
    pub completed_steps: Option<Vec<u32>>,
    /// New step count
    #[serde(default)]
    pub total_steps: Option<u32>,
}

impl FlowPatch {
    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self == &FlowPatch::default()
    }
}

/// Reject names that are empty after trimming
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}
