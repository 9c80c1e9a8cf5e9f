//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use postdrop_storage::DatabasePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

/// Create the API router
pub fn create_router(db_pool: DatabasePool, domain: String) -> Router {
    let state = Arc::new(AppState { db_pool, domain });

    let api_routes = Router::new()
        .route("/addresses", post(handlers::generate_address))
        .route("/inbox/:local", get(handlers::inbox))
        .route("/messages/:id", get(handlers::get_message));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::readiness))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
