use crate::application::error::ErrorReport;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INVALID_CURSOR: &str = "invalid_cursor";
    pub const PERSISTENCE_UNAVAILABLE: &str = "persistence_unavailable";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    chain: Vec<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            chain: Vec::new(),
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn invalid_cursor(hint: String) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_CURSOR,
            "invalid cursor",
            Some(hint),
        )
    }

    /// Keeps the full error chain for the response logger; the client only sees the code.
    pub fn persistence_unavailable(error: &dyn std::error::Error) -> Self {
        let report = ErrorReport::from_error(
            "infra::http::api",
            StatusCode::SERVICE_UNAVAILABLE,
            error,
        );
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: codes::PERSISTENCE_UNAVAILABLE,
            message: "persistence layer unavailable, retry later",
            hint: None,
            chain: report.messages,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: codes::RATE_LIMITED.to_string(),
                message: "Rate limit exceeded".to_string(),
                hint: Some(format!("Retry after {retry_after} seconds")),
            },
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        )
        .attach(&mut response);
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = if self.chain.is_empty() {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.hint.as_deref().unwrap_or(self.message)
                ),
            )
        } else {
            ErrorReport {
                source: "infra::http::api",
                status: self.status,
                messages: self.chain,
            }
        };
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}
