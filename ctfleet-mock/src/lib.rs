//! In-memory stand-in for the hypervisor resource API.
//!
//! Serves the same routes `ctfleet` talks to, keeps resources in memory and
//! can inject per-resource HTTP failures and delayed state transitions.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

pub mod routes;
pub mod state;

pub use state::{AppState, Resource, ResourceStatus};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/nodes/{node}/resources", post(routes::create_resource))
        .route("/nodes/{node}/resources/{id}", delete(routes::delete_resource))
        .route("/nodes/{node}/resources/{id}/status", get(routes::get_status))
        .route("/nodes/{node}/resources/{id}/config", get(routes::get_config))
        .route("/nodes/{node}/resources/{id}/start", post(routes::start_resource))
        .route("/nodes/{node}/resources/{id}/stop", post(routes::stop_resource))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
