use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eventgate_api_types::CacheClearResponse;
use tracing::info;

use crate::application::error::ErrorReport;
use crate::infra::http::api::models::cache_stats_to_api;

use super::AdminState;

pub(super) async fn cache_stats(State(state): State<AdminState>) -> Response {
    let stats = state.cache.cache().stats();
    Json(cache_stats_to_api(stats, state.cache.circuit())).into_response()
}

pub(super) async fn clear_cache(State(state): State<AdminState>) -> Response {
    let cache = state.cache.cache();
    match cache.clear().await {
        Ok(removed) => {
            info!(
                target = "eventgate::http::admin::cache",
                backend = cache.backend_name(),
                removed,
                "cache cleared"
            );
            Json(CacheClearResponse { removed }).into_response()
        }
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::admin::cache",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
