use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::error::ApiError;
use super::state::ApiState;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Limits write requests per client; reads pass through untouched.
pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let key = client_key(request.headers());

    let (allowed, remaining) = state.rate_limiter.allow(&key, &path);
    if !allowed {
        debug!(
            target = "eventgate::api::ratelimit",
            client = %key,
            path = %path,
            limit = state.rate_limiter.limit(),
            "write rate limit exceeded"
        );
        return ApiError::rate_limited(state.rate_limiter.retry_after_secs());
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("x-ratelimit-remaining", remaining.into());
    response
}

/// `x-client-id` when present, else the first `x-forwarded-for` hop.
pub fn client_key(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(id) = header(CLIENT_ID_HEADER) {
        return id.to_string();
    }

    header(FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_wins_over_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, "ingestor-7".parse().unwrap());
        headers.insert(FORWARDED_FOR_HEADER, "10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers), "ingestor-7");
    }

    #[test]
    fn first_forwarded_hop_is_used() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            " 203.0.113.5 , 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(client_key(&headers), "203.0.113.5");
    }

    #[test]
    fn falls_back_to_anonymous() {
        assert_eq!(client_key(&HeaderMap::new()), ANONYMOUS_CLIENT);
    }
}
