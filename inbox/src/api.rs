use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::cursor::CursorError;
use crate::store::{Event, StoreError};
use crate::token::InvalidTokenReason;

/// Body of `POST /events`.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub event_type: String,
    pub payload: Value,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Body returned for an accepted event. Identical for fresh and duplicate
/// submissions: deduplication is invisible to the sender.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub event_id: Uuid,
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub status: String,
    pub event_id: Uuid,
    pub timestamp: String,
    pub event_type: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub delivered: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxEventItem {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl From<Event> for InboxEventItem {
    fn from(event: Event) -> Self {
        InboxEventItem {
            event_id: event.event_id,
            event_type: event.event_type,
            payload: event.payload,
            timestamp: event.occurred_at,
            source: event.source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Lower bound: the number of undelivered events known from this page.
    pub total_undelivered: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxResponse {
    pub events: Vec<InboxEventItem>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("event_type must not be empty")]
    EmptyEventType,
    #[error("event_type must be at most {max} characters")]
    EventTypeTooLong { max: usize },
    #[error("payload exceeds the maximum size of {max} bytes")]
    PayloadTooLarge { max: usize },
    #[error("failed to encode payload: {0}")]
    PayloadEncoding(#[from] serde_json::Error),
    #[error("limit must be at most {max}")]
    LimitTooLarge { max: usize },
    #[error("invalid or expired cursor")]
    InvalidCursor(#[from] CursorError),

    #[error("missing Authorization header")]
    MissingToken,
    #[error("invalid Authorization header format, expected 'Bearer <api_key>'")]
    MalformedAuthHeader,
    #[error("API key is not valid: {0}")]
    InvalidToken(#[from] InvalidTokenReason),
    #[error("API key not found or inactive")]
    UnknownToken,

    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("event not found")]
    EventNotFound,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::EmptyEventType
            | ApiError::EventTypeTooLong { .. }
            | ApiError::PayloadEncoding(_)
            | ApiError::LimitTooLarge { .. }
            | ApiError::InvalidCursor(_) => "VALIDATION_ERROR",
            ApiError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ApiError::MissingToken
            | ApiError::MalformedAuthHeader
            | ApiError::InvalidToken(_)
            | ApiError::UnknownToken => "UNAUTHORIZED",
            ApiError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::EventNotFound => "NOT_FOUND",
            ApiError::Storage(_) => "SERVICE_UNAVAILABLE",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::EmptyEventType
            | ApiError::EventTypeTooLong { .. }
            | ApiError::PayloadEncoding(_)
            | ApiError::LimitTooLarge { .. }
            | ApiError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MissingToken
            | ApiError::MalformedAuthHeader
            | ApiError::InvalidToken(_)
            | ApiError::UnknownToken => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::EventNotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Actionable details for the caller: which field, what limit.
    fn details(&self) -> Value {
        match self {
            ApiError::EmptyEventType => json!({"field": "event_type"}),
            ApiError::EventTypeTooLong { max } => {
                json!({"field": "event_type", "max_length": max})
            }
            ApiError::PayloadTooLarge { max } => json!({"field": "payload", "max_bytes": max}),
            ApiError::PayloadEncoding(_) => json!({"field": "payload"}),
            ApiError::LimitTooLarge { max } => json!({"field": "limit", "max": max}),
            ApiError::InvalidCursor(_) => json!({"field": "cursor"}),
            ApiError::RateLimited { retry_after } => json!({"retry_after": retry_after}),
            _ => json!({}),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "error_code": self.error_code(),
            "message": self.to_string(),
            "details": self.details(),
        });

        let mut response = (self.status_code(), Json(body)).into_response();

        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::ApiError;
    use crate::cursor::CursorError;

    #[test]
    fn validation_errors_are_bad_requests() {
        let response = ApiError::EmptyEventType.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::InvalidCursor(CursorError::InvalidEncoding).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn oversized_payload_is_413() {
        let response = ApiError::PayloadTooLarge { max: 262_144 }.into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn rate_limit_carries_retry_after_header() {
        let response = ApiError::RateLimited { retry_after: 42 }.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[test]
    fn auth_errors_are_unauthorized() {
        for err in [ApiError::MissingToken, ApiError::UnknownToken] {
            assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
        }
    }
}
