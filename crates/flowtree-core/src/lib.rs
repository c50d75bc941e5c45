//!
//! Flowtree Core - hierarchical flow store engine
//!
//! This crate defines the flow node model, the `FlowStore` contract every
//! persistence backend implements, and the services that query and mutate
//! the hierarchy while keeping depth, root and path consistent.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow nodes, paths, store contract and integrity rules
pub mod domain;

/// Application services - queries, tree assembly, progress and mutations
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

// Re-export key types
pub use config::{CoreConfig, OrphanPolicy};
pub use error::CoreError;
pub use types::{CustomValue, Customizations};

// Re-export main API types for easy use
pub use domain::events::HierarchyEvent;
pub use domain::flow_node::{FlowId, FlowNode, FlowPatch, FlowStatus, FlowType, NewFlow};
pub use domain::repository::{FlowStore, ReadGuard, WriteBatch, WriteOp};
pub use domain::tree_view::TreeView;

pub use application::flow_service::FlowService;
pub use application::hierarchy_mutator::HierarchyMutator;
pub use application::progress_aggregator::ProgressAggregator;
pub use application::query_engine::QueryEngine;
pub use application::tree_builder::TreeBuilder;
