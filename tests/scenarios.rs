//! End-to-end hierarchy scenarios, run against every flow store

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use flowtree::{
    CoreConfig, CoreError, FlowId, FlowNode, FlowPatch, FlowService, FlowStatus, FlowStore,
    FlowType, InMemoryFlowStore, SqliteFlowStore, TreeView,
};
use pretty_assertions::assert_eq;

fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("flowtree_core=debug".parse().unwrap()),
        )
        .with_test_writer()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn stores() -> Vec<(&'static str, Arc<dyn FlowStore>)> {
    init_test_tracing();
    let sqlite = SqliteFlowStore::in_memory()
        .await
        .expect("in-memory sqlite");
    vec![
        ("in-memory", Arc::new(InMemoryFlowStore::new()) as Arc<dyn FlowStore>),
        ("sqlite", Arc::new(sqlite) as Arc<dyn FlowStore>),
    ]
}

struct Fixture {
    service: FlowService,
    g1: FlowNode,
    p1: FlowNode,
    t1: FlowNode,
}

/// G1 -> P1 -> T1
async fn fixture(store: Arc<dyn FlowStore>) -> Result<Fixture, CoreError> {
    let service = FlowService::new(store, CoreConfig::default());
    let g1 = service.create_flow("G1", None, FlowType::Goal, None).await?;
    let p1 = service
        .create_flow("P1", None, FlowType::Project, Some(&g1.id))
        .await?;
    let t1 = service
        .create_flow("T1", None, FlowType::Task, Some(&p1.id))
        .await?;
    Ok(Fixture { service, g1, p1, t1 })
}

async fn assert_invariants(label: &str, store: &Arc<dyn FlowStore>) -> Result<(), CoreError> {
    for node in store.scan_all().await? {
        assert_eq!(node.path.len(), node.depth as usize + 1, "{label}: {}", node.id);
        assert_eq!(node.path.last(), Some(&node.id), "{label}");
        match &node.parent_id {
            Some(parent_id) => {
                let parent = store.get(parent_id).await?;
                assert_eq!(node.ancestor_ids(), parent.path.as_slice(), "{label}");
                assert_eq!(node.root_id, parent.root_id, "{label}");
            }
            None => {
                assert_eq!(node.root_id, node.id, "{label}");
                assert_eq!(node.depth, 0, "{label}");
            }
        }
    }
    Ok(())
}

fn shape(view: &TreeView) -> Vec<(String, u32, usize)> {
    let mut out = Vec::new();
    let mut pending = vec![view];
    while let Some(current) = pending.pop() {
        out.push((
            current.node.name.clone(),
            current.node.depth - view.node.depth,
            current.children.len(),
        ));
        pending.extend(current.children.iter().rev());
    }
    out
}

fn ids(nodes: &[FlowNode]) -> BTreeSet<FlowId> {
    nodes.iter().map(|n| n.id.clone()).collect()
}

#[tokio::test]
async fn test_scenario_create_and_tree() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store.clone()).await?;

        assert_eq!(f.g1.depth, 0);
        assert_eq!(f.g1.path, vec![f.g1.id.clone()]);
        assert_eq!(f.p1.depth, 1);
        assert_eq!(f.p1.path, vec![f.g1.id.clone(), f.p1.id.clone()]);
        assert_eq!(f.t1.depth, 2);
        assert_eq!(
            f.t1.path,
            vec![f.g1.id.clone(), f.p1.id.clone(), f.t1.id.clone()]
        );

        let tree = f.service.get_tree(Some(&f.g1.id)).await?;
        assert_eq!(tree.len(), 1, "{label}");
        assert_eq!(tree[0].node.id, f.g1.id);
        assert_eq!(tree[0].children[0].node.id, f.p1.id);
        assert_eq!(tree[0].children[0].children[0].node.id, f.t1.id);
        assert!(tree[0].children[0].children[0].children.is_empty());
        assert_invariants(label, &store).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_scenario_move_duplicate_delete() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store.clone()).await?;
        let g2 = f.service.create_flow("G2", None, FlowType::Goal, None).await?;

        // Move P1 under G2
        let moved = f.service.move_flow(&f.p1.id, Some(&g2.id)).await?;
        assert_eq!(moved.path, vec![g2.id.clone(), f.p1.id.clone()], "{label}");
        assert_eq!(moved.root_id, g2.id);
        let t1 = f.service.get_flow(&f.t1.id).await?;
        assert_eq!(t1.path, vec![g2.id.clone(), f.p1.id.clone(), f.t1.id.clone()]);
        assert_eq!(t1.root_id, g2.id);
        assert!(f.service.get_children(&f.g1.id).await?.is_empty());
        assert_invariants(label, &store).await?;

        // Duplicate P1 with its child under G1
        let copy = f
            .service
            .duplicate_flow(&f.p1.id, true, Some(&f.g1.id))
            .await?;
        assert_ne!(copy.id, f.p1.id);
        assert_eq!(copy.name, "P1");
        assert_eq!(copy.parent_id.as_ref(), Some(&f.g1.id));
        let copied_children = f.service.get_children(&copy.id).await?;
        assert_eq!(copied_children.len(), 1, "{label}");
        assert_ne!(copied_children[0].id, f.t1.id);
        assert_eq!(copied_children[0].name, "T1");
        assert_eq!(copied_children[0].root_id, f.g1.id);
        assert_invariants(label, &store).await?;

        // Cascade delete of P1 leaves G2 empty and the copy untouched
        f.service.delete_flow(&f.p1.id, true).await?;
        assert!(f.service.get_children(&g2.id).await?.is_empty(), "{label}");
        assert!(matches!(
            f.service.get_flow(&f.t1.id).await,
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(f.service.get_descendants(&f.g1.id).await?.len(), 2);
        assert_invariants(label, &store).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_scenario_cycle_leaves_store_unchanged() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store.clone()).await?;
        let before = store.scan_all().await?;

        let result = f.service.move_flow(&f.g1.id, Some(&f.t1.id)).await;
        assert!(matches!(result, Err(CoreError::Cycle { .. })), "{label}: {result:?}");
        let result = f.service.move_flow(&f.p1.id, Some(&f.p1.id)).await;
        assert!(matches!(result, Err(CoreError::Cycle { .. })), "{label}");

        assert_eq!(store.scan_all().await?, before, "{label}");
    }
    Ok(())
}

#[tokio::test]
async fn test_scenario_progress_rollup() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store).await?;
        assert_eq!(f.service.get_progress(&f.g1.id).await?, 0.0, "{label}");

        let done = FlowPatch {
            status: Some(FlowStatus::Completed),
            ..Default::default()
        };
        f.service.update_flow(&f.t1.id, &done).await?;
        assert_eq!(f.service.get_progress(&f.g1.id).await?, 100.0, "{label}");
        assert_eq!(f.service.get_progress(&f.p1.id).await?, 100.0);
    }
    Ok(())
}

#[tokio::test]
async fn test_move_rewrites_every_descendant() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store.clone()).await?;
        let s1 = f
            .service
            .create_flow("S1", None, FlowType::Subtask, Some(&f.t1.id))
            .await?;
        let t2 = f
            .service
            .create_flow("T2", None, FlowType::Task, Some(&f.p1.id))
            .await?;
        let target = f.service.create_flow("G2", None, FlowType::Goal, None).await?;
        let deep = f
            .service
            .create_flow("P9", None, FlowType::Project, Some(&target.id))
            .await?;

        let before: HashMap<FlowId, FlowNode> = f
            .service
            .get_descendants(&f.p1.id)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        assert_eq!(before.len(), 3, "{label}");

        // P1 moves from depth 1 to depth 2
        f.service.move_flow(&f.p1.id, Some(&deep.id)).await?;
        let after = f.service.get_descendants(&f.p1.id).await?;
        assert_eq!(ids(&after), before.keys().cloned().collect(), "{label}");
        for node in &after {
            let old = &before[&node.id];
            assert_eq!(node.depth, old.depth + 1, "{label}");
            assert_eq!(node.root_id, target.id);
            assert_eq!(&node.path[..3], &[target.id.clone(), deep.id.clone(), f.p1.id.clone()]);
            assert_eq!(&node.path[3..], &old.path[2..]);
        }
        assert!(after.iter().any(|n| n.id == s1.id));
        assert!(after.iter().any(|n| n.id == t2.id));
        assert_invariants(label, &store).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_duplicate_is_isomorphic_with_disjoint_ids() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store.clone()).await?;
        for name in ["T2", "T3"] {
            let task = f
                .service
                .create_flow(name, None, FlowType::Task, Some(&f.p1.id))
                .await?;
            f.service
                .create_flow("S", None, FlowType::Subtask, Some(&task.id))
                .await?;
        }

        let copy = f.service.duplicate_flow(&f.p1.id, true, None).await?;
        let original_tree = f.service.get_tree(Some(&f.g1.id)).await?;
        let original = original_tree[0].find(&f.p1.id).expect("original");
        let copied = original_tree[0].find(&copy.id).expect("copy");
        assert_eq!(shape(original), shape(copied), "{label}");

        let mut original_ids = ids(&f.service.get_descendants(&f.p1.id).await?);
        original_ids.insert(f.p1.id.clone());
        let mut copy_ids = ids(&f.service.get_descendants(&copy.id).await?);
        copy_ids.insert(copy.id.clone());
        assert_eq!(original_ids.len(), copy_ids.len());
        assert!(original_ids.is_disjoint(&copy_ids), "{label}");
        assert_invariants(label, &store).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_cascade_delete_removes_exactly_the_subtree() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store.clone()).await?;
        let p2 = f
            .service
            .create_flow("P2", None, FlowType::Project, Some(&f.g1.id))
            .await?;
        f.service
            .create_flow("T9", None, FlowType::Task, Some(&p2.id))
            .await?;

        let everything = ids(&store.scan_all().await?);
        let mut doomed = ids(&f.service.get_descendants(&f.p1.id).await?);
        doomed.insert(f.p1.id.clone());

        f.service.delete_flow(&f.p1.id, true).await?;
        let remaining = ids(&store.scan_all().await?);
        let expected: BTreeSet<FlowId> = everything.difference(&doomed).cloned().collect();
        assert_eq!(remaining, expected, "{label}");
        assert_invariants(label, &store).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_progress_is_complete_iff_every_leaf_is() -> Result<(), CoreError> {
    for (label, store) in stores().await {
        let f = fixture(store).await?;
        let t2 = f
            .service
            .create_flow("T2", None, FlowType::Task, Some(&f.p1.id))
            .await?;
        let done = FlowPatch {
            status: Some(FlowStatus::Completed),
            ..Default::default()
        };

        f.service.update_flow(&f.t1.id, &done).await?;
        let partial = f.service.get_progress(&f.g1.id).await?;
        assert!(partial < 100.0, "{label}: {partial}");
        assert_eq!(partial, 50.0);

        f.service.update_flow(&t2.id, &done).await?;
        assert_eq!(f.service.get_progress(&f.g1.id).await?, 100.0, "{label}");

        let map = f.service.progress_map(Some(&f.g1.id)).await?;
        assert_eq!(map.len(), 4);
        assert!(map.values().all(|p| *p == 100.0));
    }
    Ok(())
}
