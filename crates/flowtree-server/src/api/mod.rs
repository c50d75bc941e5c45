//! API module for the Flowtree Server
//!
//! This module contains the API routes and handlers for the Flowtree Server.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod errors;
pub mod flows;
pub mod health;

use crate::server::FlowtreeServer;

pub use errors::ApiError;

/// Build the router for API endpoints
pub fn build_router(server: Arc<FlowtreeServer>) -> Router {
    Router::new()
        // Flow management
        .route("/v1/flows", post(flows::create_flow))
        .route(
            "/v1/flows/:id",
            get(flows::get_flow)
                .patch(flows::update_flow)
                .delete(flows::delete_flow),
        )
        .route("/v1/flows/:id/move", post(flows::move_flow))
        .route("/v1/flows/:id/duplicate", post(flows::duplicate_flow))

        // Hierarchy reads
        .route("/v1/tree", get(flows::get_tree))
        .route("/v1/flows/:id/ancestors", get(flows::get_ancestors))
        .route("/v1/flows/:id/children", get(flows::get_children))
        .route("/v1/flows/:id/progress", get(flows::get_progress))

        // Health check
        .route("/health", get(health::health_check))

        .layer(TraceLayer::new_for_http())
        // Shared state
        .with_state(server)
}
