mod admin;
pub mod api;
mod health;
mod middleware;

pub use admin::{AdminState, build_admin_router};
pub use api::rate_limit::ApiRateLimiter;
pub use api::{ApiState, build_router};
pub use health::HealthProbe;

use axum::extract::FromRef;

#[derive(Clone)]
pub struct RouterState {
    pub api: ApiState,
    pub health: HealthProbe,
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

impl FromRef<RouterState> for HealthProbe {
    fn from_ref(state: &RouterState) -> Self {
        state.health.clone()
    }
}
