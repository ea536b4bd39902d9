use std::sync::Arc;

use crate::application::ingest::IngestionCoordinator;
use crate::application::query::QueryService;

use super::rate_limit::ApiRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub ingest: Arc<IngestionCoordinator>,
    pub query: QueryService,
    pub rate_limiter: Arc<ApiRateLimiter>,
}
