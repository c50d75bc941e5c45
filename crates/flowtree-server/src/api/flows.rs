//! Flow hierarchy handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use flowtree_core::{FlowId, FlowNode, FlowPatch, NewFlow, TreeView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::errors::ApiError;
use crate::server::FlowtreeServer;

type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /v1/flows/:id/move`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveRequest {
    /// New parent, absent or null to make the node a root
    #[serde(default)]
    pub new_parent_id: Option<FlowId>,
}

/// Body of `POST /v1/flows/:id/duplicate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRequest {
    /// Copy the whole subtree (default) or the node alone
    #[serde(default = "default_include_children")]
    pub include_children: bool,
    /// Destination parent, the original's parent when absent
    #[serde(default)]
    pub new_parent_id: Option<FlowId>,
}

fn default_include_children() -> bool {
    true
}

/// Query of `DELETE /v1/flows/:id`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteParams {
    /// Remove the whole subtree
    #[serde(default)]
    pub cascade: bool,
}

/// Query of `GET /v1/tree`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreeParams {
    /// Restrict the view to one tree
    #[serde(default)]
    pub root_id: Option<FlowId>,
}

/// Body of `GET /v1/flows/:id/progress`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    /// Node the percentage belongs to
    pub id: FlowId,
    /// Completion percentage between 0 and 100
    pub progress: f64,
}

/// Create a flow node
pub async fn create_flow(
    State(server): State<Arc<FlowtreeServer>>,
    body: Result<Json<NewFlow>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FlowNode>)> {
    let Json(request) = body?;
    let node = server.service().create(&request).await?;
    info!(flow_id = %node.id, "Flow created");
    Ok((StatusCode::CREATED, Json(node)))
}

/// Fetch one flow node
pub async fn get_flow(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
) -> ApiResult<Json<FlowNode>> {
    Ok(Json(server.service().get_flow(&FlowId(id)).await?))
}

/// Change non-structural fields
pub async fn update_flow(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
    body: Result<Json<FlowPatch>, JsonRejection>,
) -> ApiResult<Json<FlowNode>> {
    let Json(patch) = body?;
    Ok(Json(server.service().update_flow(&FlowId(id), &patch).await?))
}

/// Reparent a node with its subtree
pub async fn move_flow(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
    body: Result<Json<MoveRequest>, JsonRejection>,
) -> ApiResult<Json<FlowNode>> {
    let Json(request) = body?;
    let node = server
        .service()
        .move_flow(&FlowId(id), request.new_parent_id.as_ref())
        .await?;
    Ok(Json(node))
}

/// Delete a node; `?cascade=true` removes the subtree
pub async fn delete_flow(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> ApiResult<StatusCode> {
    let Query(params) = params?;
    server
        .service()
        .delete_flow(&FlowId(id), params.cascade)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clone a node, with its subtree unless `include_children` is false
pub async fn duplicate_flow(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
    body: Result<Json<DuplicateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FlowNode>)> {
    let Json(request) = body?;
    let copy = server
        .service()
        .duplicate_flow(
            &FlowId(id),
            request.include_children,
            request.new_parent_id.as_ref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// Nested view of one tree, or of the whole forest
pub async fn get_tree(
    State(server): State<Arc<FlowtreeServer>>,
    params: Result<Query<TreeParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) = params?;
    let forest = server.service().get_tree(params.root_id.as_ref()).await?;
    // Depth is unbounded, so the body is written without a recursive serializer
    let body = TreeView::forest_to_json(&forest)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Ancestors from the root down to the parent
pub async fn get_ancestors(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<FlowNode>>> {
    Ok(Json(server.service().get_ancestors(&FlowId(id)).await?))
}

/// Direct children, oldest first
pub async fn get_children(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<FlowNode>>> {
    Ok(Json(server.service().get_children(&FlowId(id)).await?))
}

/// Completion percentage of a node
pub async fn get_progress(
    State(server): State<Arc<FlowtreeServer>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProgressResponse>> {
    let id = FlowId(id);
    let progress = server.service().get_progress(&id).await?;
    Ok(Json(ProgressResponse { id, progress }))
}
