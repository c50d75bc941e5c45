use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use flowtree_server::{build_server, ServerConfig};

fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("flowtree_server=debug".parse().unwrap()),
        )
        .with_test_writer()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn test_router(store_url: &str) -> Router {
    init_test_tracing();
    let config = ServerConfig {
        store_url: store_url.to_string(),
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    build_server(config).await.expect("server").router()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, name: &str, flow_type: &str, parent: Option<&str>) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/v1/flows",
        Some(json!({ "name": name, "flow_type": flow_type, "parent_id": parent })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = test_router("memory://").await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert_eq!(body["dependencies"]["store"]["status"], "UP");
}

#[tokio::test]
async fn test_create_get_and_tree() {
    let app = test_router("memory://").await;
    let g1 = create(&app, "G1", "goal", None).await;
    let p1 = create(&app, "P1", "project", Some(&g1)).await;
    let t1 = create(&app, "T1", "task", Some(&p1)).await;

    let (status, node) = send(&app, Method::GET, &format!("/v1/flows/{t1}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(node["depth"], 2);
    assert_eq!(node["root_id"], g1.as_str());
    assert_eq!(node["path"], json!([g1, p1, t1]));

    let (status, tree) = send(&app, Method::GET, &format!("/v1/tree?root_id={g1}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree[0]["id"], g1.as_str());
    assert_eq!(tree[0]["has_children"], true);
    assert_eq!(tree[0]["children"][0]["children"][0]["id"], t1.as_str());

    let (_, ancestors) = send(&app, Method::GET, &format!("/v1/flows/{t1}/ancestors"), None).await;
    let ids: Vec<&str> = ancestors
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![g1.as_str(), p1.as_str()]);

    let (_, children) = send(&app, Method::GET, &format!("/v1/flows/{g1}/children"), None).await;
    assert_eq!(children.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_and_progress() {
    let app = test_router("memory://").await;
    let g1 = create(&app, "G1", "goal", None).await;
    let t1 = create(&app, "T1", "task", Some(&g1)).await;
    create(&app, "T2", "task", Some(&g1)).await;

    let (status, updated) = send(
        &app,
        Method::PATCH,
        &format!("/v1/flows/{t1}"),
        Some(json!({ "status": "completed", "name": "Done" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Done");
    assert_eq!(updated["status"], "completed");

    let (status, progress) = send(&app, Method::GET, &format!("/v1/flows/{g1}/progress"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["progress"], 50.0);
}

#[tokio::test]
async fn test_move_and_cycle_rejection() {
    let app = test_router("memory://").await;
    let g1 = create(&app, "G1", "goal", None).await;
    let g2 = create(&app, "G2", "goal", None).await;
    let p1 = create(&app, "P1", "project", Some(&g1)).await;
    let t1 = create(&app, "T1", "task", Some(&p1)).await;

    let (status, moved) = send(
        &app,
        Method::POST,
        &format!("/v1/flows/{p1}/move"),
        Some(json!({ "new_parent_id": g2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moved["root_id"], g2.as_str());

    let (_, child) = send(&app, Method::GET, &format!("/v1/flows/{t1}"), None).await;
    assert_eq!(child["path"], json!([g2, p1, t1]));

    let (status, error) = send(
        &app,
        Method::POST,
        &format!("/v1/flows/{g2}/move"),
        Some(json!({ "new_parent_id": t1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "CYCLE");
}

#[tokio::test]
async fn test_duplicate_and_delete() {
    let app = test_router("memory://").await;
    let g1 = create(&app, "G1", "goal", None).await;
    let p1 = create(&app, "P1", "project", Some(&g1)).await;
    create(&app, "T1", "task", Some(&p1)).await;

    let (status, copy) = send(
        &app,
        Method::POST,
        &format!("/v1/flows/{p1}/duplicate"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(copy["id"], p1.as_str());
    assert_eq!(copy["name"], "P1");
    assert_eq!(copy["parent_id"], g1.as_str());

    let (status, error) = send(&app, Method::DELETE, &format!("/v1/flows/{p1}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "HAS_CHILDREN");

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/v1/flows/{p1}?cascade=true"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) = send(&app, Method::GET, &format!("/v1/flows/{p1}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "NOT_FOUND");

    let (_, tree) = send(&app, Method::GET, "/v1/tree", None).await;
    let root = &tree[0];
    assert_eq!(root["children"].as_array().unwrap().len(), 1);
    assert_eq!(root["children"][0]["children"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_requests_use_the_envelope() {
    let app = test_router("memory://").await;

    let (status, error) = send(
        &app,
        Method::POST,
        "/v1/flows",
        Some(json!({ "name": "  ", "flow_type": "goal" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "VALIDATION_ERROR");

    let (status, error) = send(
        &app,
        Method::POST,
        "/v1/flows",
        Some(json!({ "name": "X", "flow_type": "epic" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "BAD_REQUEST");

    let (status, error) = send(
        &app,
        Method::POST,
        "/v1/flows",
        Some(json!({ "name": "Orphan", "flow_type": "task", "parent_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error["error"]["message"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_routes_over_sqlite() {
    let app = test_router("sqlite::memory:").await;
    let g1 = create(&app, "G1", "goal", None).await;
    let p1 = create(&app, "P1", "project", Some(&g1)).await;

    let (status, tree) = send(&app, Method::GET, "/v1/tree", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree[0]["children"][0]["id"], p1.as_str());
}
