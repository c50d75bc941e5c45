//! Flowtree
//!
//! A hierarchical store for work items: goals contain projects, projects
//! contain tasks, tasks contain subtasks, to any depth. Nodes keep their
//! materialized path, depth and root, and every restructuring operation
//! (move, cascading delete, duplicate) commits as one atomic batch.
//!
//! This crate bundles the engine with both flow stores:
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowtree::{CoreConfig, FlowService, FlowType, InMemoryFlowStore};
//!
//! # async fn demo() -> Result<(), flowtree::CoreError> {
//! let service = FlowService::new(Arc::new(InMemoryFlowStore::new()), CoreConfig::default());
//! let goal = service.create_flow("Launch", None, FlowType::Goal, None).await?;
//! service.create_flow("Website", None, FlowType::Project, Some(&goal.id)).await?;
//! let tree = service.get_tree(Some(&goal.id)).await?;
//! assert_eq!(tree[0].len(), 2);
//! # Ok(())
//! # }
//! ```

pub use flowtree_core::*;
pub use flowtree_state_inmemory::InMemoryFlowStore;
pub use flowtree_state_sqlite::{SqliteConfig, SqliteFlowStore};
