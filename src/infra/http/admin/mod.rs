mod cache;
mod state;

pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::health::health;
use super::middleware::{log_responses, set_request_context};

/// Operational endpoints, served on the admin listener only.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/cache/stats", get(cache::cache_stats))
        .route("/admin/cache/clear", post(cache::clear_cache))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
