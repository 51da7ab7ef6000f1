use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use metrics::counter;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::api::{
    ApiError, CreateEventRequest, EventResponse, InboxEventItem, InboxResponse, IngestResponse,
    PaginationInfo, StatusResponse,
};
use crate::auth::ApiKey;
use crate::prometheus::report_dropped_events;
use crate::router;

pub static APP_START: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Deserialize, Default)]
pub struct InboxQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Events are addressed by their composite `(event_id, occurred_at)` key.
#[derive(Deserialize)]
pub struct EventKeyQuery {
    pub occurred_at: String,
}

#[instrument(skip_all, fields(key_id = %key.key_id, event_type = %request.event_type))]
pub async fn create_event(
    State(state): State<router::State>,
    Extension(key): Extension<ApiKey>,
    Json(request): Json<CreateEventRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    counter!("inbox_events_received_total").increment(1);

    let outcome = match state.service.ingest(request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            report_dropped_events(err.error_code(), 1);
            tracing::debug!("rejected event submission: {}", err);
            return Err(err);
        }
    };

    // Deliberately the same body whether or not the submission was a
    // duplicate; deduplication is invisible to the sender.
    Ok(Json(IngestResponse {
        status: "accepted".to_string(),
        event_id: outcome.event_id,
        timestamp: outcome.occurred_at,
        message: "event successfully ingested".to_string(),
    }))
}

#[instrument(skip_all, fields(key_id = %key.key_id, limit = ?query.limit))]
pub async fn get_inbox(
    State(state): State<router::State>,
    Extension(key): Extension<ApiKey>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<InboxResponse>, ApiError> {
    let page = state
        .service
        .list_inbox(query.limit, query.cursor.as_deref())
        .await?;

    // Lower bound only: a full count would need a second index scan.
    let total_undelivered = page.events.len() + usize::from(page.has_more);

    Ok(Json(InboxResponse {
        events: page.events.into_iter().map(InboxEventItem::from).collect(),
        pagination: PaginationInfo {
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            total_undelivered,
        },
    }))
}

#[instrument(skip_all, fields(key_id = %key.key_id, event_id = %event_id))]
pub async fn get_event(
    State(state): State<router::State>,
    Extension(key): Extension<ApiKey>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<EventKeyQuery>,
) -> Result<Json<EventResponse>, ApiError> {
    let event = state
        .service
        .get(event_id, &query.occurred_at)
        .await?
        .ok_or(ApiError::EventNotFound)?;

    Ok(Json(EventResponse {
        status: "success".to_string(),
        event_id: event.event_id,
        timestamp: event.occurred_at,
        event_type: event.event_type,
        payload: event.payload,
        source: event.source,
        delivered: event.delivered,
    }))
}

/// Acknowledge an event: mark it delivered so it leaves the inbox.
/// Idempotent; acknowledging an already-delivered event also returns 204.
#[instrument(skip_all, fields(key_id = %key.key_id, event_id = %event_id))]
pub async fn ack_event(
    State(state): State<router::State>,
    Extension(key): Extension<ApiKey>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<EventKeyQuery>,
) -> Result<StatusCode, ApiError> {
    let found = state
        .service
        .acknowledge(event_id, &query.occurred_at)
        .await?;

    if !found {
        return Err(ApiError::EventNotFound);
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Unauthenticated health check for monitors and load balancers.
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: APP_START.elapsed().as_secs(),
    })
}
