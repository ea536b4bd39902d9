use axum::extract::FromRef;

use crate::application::cache_access::CacheAccess;
use crate::infra::http::HealthProbe;

#[derive(Clone)]
pub struct AdminState {
    pub health: HealthProbe,
    pub cache: CacheAccess,
}

impl FromRef<AdminState> for HealthProbe {
    fn from_ref(state: &AdminState) -> Self {
        state.health.clone()
    }
}
