//! Health check endpoint for the Flowtree Server

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::server::FlowtreeServer;

/// Health check handler
///
/// Reports liveness together with the reachability of the flow store.
/// Answers 503 when the store cannot be reached.
pub async fn health_check(State(server): State<Arc<FlowtreeServer>>) -> impl IntoResponse {
    debug!("Health check requested");

    let (status, store_status) = match server.service().ping().await {
        Ok(()) => (StatusCode::OK, "UP"),
        Err(e) => {
            warn!(error = %e, "Flow store is unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "DOWN")
        }
    };

    let response = json!({
        "status": if status == StatusCode::OK { "UP" } else { "DOWN" },
        "version": env!("CARGO_PKG_VERSION"),
        "dependencies": {
            "store": { "status": store_status },
        },
    });

    (status, Json(response))
}
