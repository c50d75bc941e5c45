/// Flow node domain model
pub mod flow_node;

/// Materialized path encoding and rewriting
pub mod path;

/// Nested display view
pub mod tree_view;

/// Store contract
pub mod repository;

/// Commit-time invariant checks
pub mod integrity;

/// Hierarchy change events
pub mod events;
