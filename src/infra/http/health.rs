use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eventgate_api_types::{ComponentHealth, HealthResponse, HealthStatus};

use crate::application::cache_access::CacheAccess;
use crate::application::error::ErrorReport;
use crate::application::circuit_breaker::CircuitState;
use crate::application::repos::EventsRepo;
use crate::infra::http::api::models::circuit_to_api;

/// Checks both backing stores. Only persistence decides the HTTP status; a failing cache,
/// or one whose circuit is not closed, is reported as degraded.
#[derive(Clone)]
pub struct HealthProbe {
    repo: Arc<dyn EventsRepo>,
    cache: CacheAccess,
}

impl HealthProbe {
    pub fn new(repo: Arc<dyn EventsRepo>, cache: CacheAccess) -> Self {
        Self { repo, cache }
    }

    pub async fn check(&self) -> Response {
        let persistence = self.repo.health_check().await;
        let cache = self.cache.ping().await;
        let circuit = self.cache.circuit();
        let backend = self.cache.cache().backend_name();

        let cache_health = match &cache {
            Ok(()) if circuit.state == CircuitState::Closed => {
                component(HealthStatus::Healthy, None)
            }
            Ok(()) => component(
                HealthStatus::Degraded,
                Some(format!("{backend}: circuit {}", circuit.state.as_str())),
            ),
            Err(err) => component(HealthStatus::Degraded, Some(format!("{backend}: {err}"))),
        };
        let cache_healthy = cache_health.status == HealthStatus::Healthy;
        let cache_circuit = circuit_to_api(circuit);

        match persistence {
            Ok(()) => {
                let status = if cache_healthy {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                };
                let body = HealthResponse {
                    status,
                    persistence: component(HealthStatus::Healthy, None),
                    cache: cache_health,
                    cache_circuit,
                };
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(err) => {
                let body = HealthResponse {
                    status: HealthStatus::Unhealthy,
                    persistence: component(
                        HealthStatus::Unhealthy,
                        Some(format!("{}: {err}", self.repo.backend_name())),
                    ),
                    cache: cache_health,
                    cache_circuit,
                };
                let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
                ErrorReport::from_error(
                    "infra::http::health",
                    StatusCode::SERVICE_UNAVAILABLE,
                    &err,
                )
                .attach(&mut response);
                response
            }
        }
    }
}

fn component(status: HealthStatus, detail: Option<String>) -> ComponentHealth {
    ComponentHealth { status, detail }
}

pub(super) async fn health(State(probe): State<HealthProbe>) -> Response {
    probe.check().await
}
