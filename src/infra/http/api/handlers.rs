use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use eventgate_api_types::{
    BatchIngestRequest, BatchIngestResponse, EventListResponse, IngestResponse, IngestStatus,
};
use futures::StreamExt;
use serde_json::Value;

use crate::application::error::ErrorReport;
use crate::application::query::{ListEventsQuery, QueryError};
use crate::domain::error::ValidationError;
use crate::domain::events::DedupKey;

use super::body_limit_bytes;
use super::error::ApiError;
use super::models::*;
use super::state::ApiState;

const MAX_BATCH_EVENTS: usize = 1_000;

pub async fn ingest_event(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(value) = match payload {
        Ok(value) => value,
        Err(rejection) => return Ok(unreadable_body(&state, &rejection)),
    };

    let result = state
        .ingest
        .ingest_value(value)
        .await
        .map_err(|err| ApiError::persistence_unavailable(&err))?;

    let status = ingest_status_code(&result);
    Ok((status, Json(ingest_result_to_api(result))).into_response())
}

pub async fn ingest_batch(
    State(state): State<ApiState>,
    payload: Result<Json<BatchIngestRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(batch) = payload.map_err(|rejection| {
        ApiError::bad_request("invalid batch body", Some(rejection.body_text()))
    })?;

    if batch.events.len() > MAX_BATCH_EVENTS {
        return Err(ApiError::bad_request(
            "batch too large",
            Some(format!("at most {MAX_BATCH_EVENTS} events per batch")),
        ));
    }

    let results = state
        .ingest
        .ingest_batch(batch.events)
        .await
        .into_iter()
        .map(|outcome| match outcome {
            Ok(result) => ingest_result_to_api(result),
            Err(err) => ingest_failure_to_api(&err),
        })
        .collect();

    Ok(Json(BatchIngestResponse { results }).into_response())
}

pub async fn get_event(
    State(state): State<ApiState>,
    Path(dedup_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .query
        .get_event(&DedupKey::new(dedup_key))
        .await
        .map_err(query_to_api)?;

    Ok(Json(event_to_api(record)))
}

pub async fn list_events(
    State(state): State<ApiState>,
    Query(query): Query<EventListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let source_id = required_source_id(query.source_id)?;

    let page = state
        .query
        .list_events(&ListEventsQuery {
            source_id,
            after_sequence: query.after,
            up_to_sequence: query.until,
            cursor: query.cursor,
            limit: query.limit,
        })
        .await
        .map_err(query_to_api)?;

    Ok(Json(EventListResponse {
        items: page.items.into_iter().map(event_to_api).collect(),
        next_cursor: page.next_cursor,
    }))
}

/// Newline-delimited JSON of every event of a source, paged from persistence as the
/// client reads.
pub async fn export_events(
    State(state): State<ApiState>,
    Query(query): Query<EventListQuery>,
) -> Result<Response, ApiError> {
    let source_id = required_source_id(query.source_id)?;

    let lines = state
        .query
        .stream_events(source_id, query.after, query.until)
        .map(|item| {
            item.and_then(|record| {
                let mut line = serde_json::to_vec(&event_to_api(record))
                    .map_err(|err| QueryError::Encoding(err.to_string()))?;
                line.push(b'\n');
                Ok(line)
            })
        });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(lines))
        .map_err(|_| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to build response",
                None,
            )
        })
}

fn required_source_id(source_id: Option<String>) -> Result<String, ApiError> {
    source_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("source_id is required", None))
}

/// A body over the transport limit is reported like an oversized payload; anything else
/// the JSON extractor refuses is malformed.
fn unreadable_body(state: &ApiState, rejection: &JsonRejection) -> Response {
    let (code, detail) = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let limit = body_limit_bytes(state.ingest.max_payload_bytes());
        let code = ValidationError::PayloadTooLarge { size: limit, limit }.code();
        (code, format!("request body exceeds {limit} bytes"))
    } else {
        (ValidationError::Malformed.code(), rejection.body_text())
    };

    let body = IngestResponse {
        status: IngestStatus::Rejected,
        dedup_key: None,
        sequence: None,
        reason: Some(code.to_string()),
        detail: Some(detail.clone()),
    };
    let mut response = (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
    ErrorReport::from_message(
        "infra::http::api::ingest",
        StatusCode::UNPROCESSABLE_ENTITY,
        format!("{code}: {detail}"),
    )
    .attach(&mut response);
    response
}

fn query_to_api(err: QueryError) -> ApiError {
    match err {
        QueryError::NotFound => ApiError::not_found("event not found"),
        QueryError::InvalidCursor(err) => ApiError::invalid_cursor(err.to_string()),
        QueryError::Encoding(detail) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "failed to encode event",
            Some(detail),
        ),
        other @ QueryError::PersistenceUnavailable(_) => ApiError::persistence_unavailable(&other),
    }
}
