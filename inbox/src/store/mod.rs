use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;

pub use memory::MemoryStore;

/// A stored event record.
///
/// `occurred_at` is a fixed-width ISO-8601 string assigned at creation and
/// doubles as the sort key of the undelivered index; it is immutable once
/// set. `delivered` flips false to true exactly once, via acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub occurred_at: String,
    pub event_type: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub delivered: bool,
    pub created_at: String,
    pub updated_at: String,
    /// Unix seconds after which the store may expire the record. Stamped on
    /// acknowledgment; retention itself is the store's business.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

/// Exclusive resume position in the undelivered index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAfter {
    pub occurred_at: String,
    pub event_id: Uuid,
}

/// One page from the undelivered index, in ascending
/// `(occurred_at, event_id)` order. `last_key` is the store's continuation
/// signal: present exactly when more undelivered items exist beyond this
/// page.
#[derive(Debug, Clone)]
pub struct Page {
    pub events: Vec<Event>,
    pub last_key: Option<StartAfter>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Interface to the external key-value/document store. Events are addressed
/// by the composite `(event_id, occurred_at)` key; undelivered events are
/// additionally reachable through an ordered secondary index.
///
/// Implementations are expected to be internally synchronized; callers add
/// no locking of their own around store calls.
#[async_trait]
pub trait EventStore {
    async fn put(&self, event: Event) -> Result<(), StoreError>;

    async fn get(&self, event_id: Uuid, occurred_at: &str) -> Result<Option<Event>, StoreError>;

    /// Flip `delivered` to true, stamping `updated_at` and `ttl`. Returns
    /// whether the record existed; flipping an already-delivered record is
    /// a no-op success, never an error.
    async fn mark_delivered(
        &self,
        event_id: Uuid,
        occurred_at: &str,
        updated_at: String,
        ttl: i64,
    ) -> Result<bool, StoreError>;

    /// Return up to `limit` undelivered events strictly after `start_after`
    /// (or from the beginning), ascending by `(occurred_at, event_id)`.
    async fn list_undelivered(
        &self,
        limit: usize,
        start_after: Option<StartAfter>,
    ) -> Result<Page, StoreError>;
}
