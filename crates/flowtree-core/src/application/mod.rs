/// Ancestor, descendant and subtree lookups
pub mod query_engine;

/// Nested tree assembly
pub mod tree_builder;

/// Bottom-up progress rollup
pub mod progress_aggregator;

/// Structural writes
pub mod hierarchy_mutator;

/// Facade used by external callers
pub mod flow_service;
