use std::sync::Arc;

use metrics::{counter, histogram};
use time::Duration;
use uuid::Uuid;

use crate::api::{ApiError, CreateEventRequest};
use crate::cursor::Cursor;
use crate::dedup::{DedupCache, DedupOutcome};
use crate::store::{Event, EventStore, StartAfter};
use crate::time::{format_timestamp, TimeSource};

pub const MAX_EVENT_TYPE_LEN: usize = 255;

/// Tunables the service and router read from config.
#[derive(Clone)]
pub struct ServiceSettings {
    /// Serialized payload ceiling, checked by the service.
    pub max_payload_bytes: usize,
    /// Whole-request body ceiling, enforced at the HTTP layer.
    pub max_request_bytes: usize,
    pub default_inbox_limit: usize,
    pub max_inbox_limit: usize,
    pub retention: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            max_payload_bytes: 256 * 1024,
            max_request_bytes: 512 * 1024,
            default_inbox_limit: 50,
            max_inbox_limit: 200,
            retention: Duration::days(30),
        }
    }
}

pub struct IngestOutcome {
    pub event_id: Uuid,
    pub occurred_at: String,
    pub is_duplicate: bool,
}

pub struct InboxPage {
    pub events: Vec<Event>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Orchestrates idempotent ingestion, inbox pagination and acknowledgment
/// over the store. Owns no locking of its own: the dedup cache is the one
/// shared structure and guards itself.
pub struct EventService {
    store: Arc<dyn EventStore + Send + Sync>,
    dedup: Arc<DedupCache>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    settings: ServiceSettings,
}

impl EventService {
    pub fn new(
        store: Arc<dyn EventStore + Send + Sync>,
        dedup: Arc<DedupCache>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        settings: ServiceSettings,
    ) -> Self {
        EventService {
            store,
            dedup,
            timesource,
            settings,
        }
    }

    /// Idempotent event creation. Identical content submitted within the
    /// dedup window collapses to the first stored event; the sender cannot
    /// tell the difference.
    pub async fn ingest(&self, request: CreateEventRequest) -> Result<IngestOutcome, ApiError> {
        if request.event_type.is_empty() {
            return Err(ApiError::EmptyEventType);
        }
        if request.event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(ApiError::EventTypeTooLong {
                max: MAX_EVENT_TYPE_LEN,
            });
        }
        let payload_bytes = serde_json::to_vec(&request.payload)?;
        if payload_bytes.len() > self.settings.max_payload_bytes {
            return Err(ApiError::PayloadTooLarge {
                max: self.settings.max_payload_bytes,
            });
        }

        let event_id = Uuid::now_v7();
        let now = self.timesource.now();
        let occurred_at = format_timestamp(now);

        match self
            .dedup
            .check_and_reserve(&request.event_type, &request.payload, event_id, Some(now))
        {
            DedupOutcome::Duplicate(existing_id) => {
                counter!("inbox_events_duplicate_total").increment(1);
                tracing::debug!(event_id = %existing_id, "collapsed duplicate submission");

                Ok(IngestOutcome {
                    event_id: existing_id,
                    occurred_at,
                    is_duplicate: true,
                })
            }
            DedupOutcome::Fresh => {
                let event = Event {
                    event_id,
                    occurred_at: occurred_at.clone(),
                    event_type: request.event_type.clone(),
                    payload: request.payload.clone(),
                    source: request.source,
                    metadata: request.metadata,
                    delivered: false,
                    created_at: occurred_at.clone(),
                    updated_at: occurred_at.clone(),
                    ttl: None,
                };

                if let Err(err) = self.store.put(event).await {
                    // Nothing was stored; don't let a later retry of the
                    // same content be answered with this id.
                    self.dedup
                        .release(&request.event_type, &request.payload, event_id);
                    return Err(err.into());
                }

                counter!("inbox_events_ingested_total").increment(1);
                Ok(IngestOutcome {
                    event_id,
                    occurred_at,
                    is_duplicate: false,
                })
            }
        }
    }

    /// One page of undelivered events in ascending
    /// `(occurred_at, event_id)` order. Limits above the configured maximum
    /// are rejected rather than silently clamped; the lower bound clamps
    /// to 1.
    pub async fn list_inbox(
        &self,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<InboxPage, ApiError> {
        let limit = match limit {
            None => self.settings.default_inbox_limit,
            Some(value) if value > self.settings.max_inbox_limit => {
                return Err(ApiError::LimitTooLarge {
                    max: self.settings.max_inbox_limit,
                })
            }
            Some(value) => value.max(1),
        };

        let start_after = match cursor {
            Some(token) => {
                let cursor = Cursor::decode(token)?;
                Some(StartAfter {
                    occurred_at: cursor.occurred_at,
                    event_id: cursor.event_id,
                })
            }
            None => None,
        };

        let page = self.store.list_undelivered(limit, start_after).await?;

        let next_cursor = page.last_key.as_ref().map(|key| {
            Cursor::new(key.occurred_at.clone(), key.event_id).encode()
        });
        let has_more = next_cursor.is_some();

        histogram!("inbox_page_size").record(page.events.len() as f64);

        Ok(InboxPage {
            events: page.events,
            next_cursor,
            has_more,
        })
    }

    pub async fn get(&self, event_id: Uuid, occurred_at: &str) -> Result<Option<Event>, ApiError> {
        Ok(self.store.get(event_id, occurred_at).await?)
    }

    /// Flip `delivered` once, stamping the retention TTL. Acknowledging an
    /// already-delivered event is a no-op success; returns false only when
    /// the event does not exist.
    pub async fn acknowledge(&self, event_id: Uuid, occurred_at: &str) -> Result<bool, ApiError> {
        let now = self.timesource.now();
        let updated_at = format_timestamp(now);
        let ttl = (now + self.settings.retention).unix_timestamp();

        let found = self
            .store
            .mark_delivered(event_id, occurred_at, updated_at, ttl)
            .await?;

        if found {
            counter!("inbox_events_acknowledged_total").increment(1);
        }
        Ok(found)
    }
}
