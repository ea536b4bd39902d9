pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::RouterState;
use crate::infra::http::health::health;
use crate::infra::http::middleware::{log_responses, set_request_context};

const MIN_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;
const ENVELOPE_SLACK_BYTES: usize = 64 * 1024;

/// Largest request body the event routes buffer. Leaves room for an event whose payload
/// sits at the configured limit but is sent with escapes or indentation.
pub fn body_limit_bytes(max_payload_bytes: usize) -> usize {
    max_payload_bytes
        .saturating_mul(2)
        .saturating_add(ENVELOPE_SLACK_BYTES)
        .max(MIN_BODY_LIMIT_BYTES)
}

/// Public listener: event write and read API plus a liveness probe.
pub fn build_router(state: RouterState) -> Router {
    let rate_state = state.api.clone();
    let body_limit = body_limit_bytes(state.api.ingest.max_payload_bytes());

    let events = Router::new()
        .route(
            "/events",
            get(handlers::list_events).post(handlers::ingest_event),
        )
        .route("/events/batch", post(handlers::ingest_batch))
        .route("/events/export", get(handlers::export_events))
        .route("/events/{dedup_key}", get(handlers::get_event))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            middleware::api_rate_limit,
        ));

    events
        .route("/health", get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_never_drops_below_the_default() {
        assert_eq!(body_limit_bytes(64 * 1024), MIN_BODY_LIMIT_BYTES);
        assert_eq!(
            body_limit_bytes(3 * 1024 * 1024),
            6 * 1024 * 1024 + ENVELOPE_SLACK_BYTES
        );
        assert_eq!(body_limit_bytes(usize::MAX), usize::MAX);
    }
}
