use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Event, EventStore, Page, StartAfter, StoreError};

type IndexKey = (String, String);

/// In-memory store keyed by `(occurred_at, event_id)`, so an ordered scan
/// is exactly the undelivered secondary index. Suitable for tests and
/// single-instance deployments that accept process-local durability.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<IndexKey, Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    fn lock_items(&self) -> MutexGuard<'_, BTreeMap<IndexKey, Event>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn index_key(occurred_at: &str, event_id: &uuid::Uuid) -> IndexKey {
    (occurred_at.to_owned(), event_id.to_string())
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn put(&self, event: Event) -> Result<(), StoreError> {
        let key = index_key(&event.occurred_at, &event.event_id);
        self.lock_items().insert(key, event);
        Ok(())
    }

    async fn get(
        &self,
        event_id: uuid::Uuid,
        occurred_at: &str,
    ) -> Result<Option<Event>, StoreError> {
        let key = index_key(occurred_at, &event_id);
        Ok(self.lock_items().get(&key).cloned())
    }

    async fn mark_delivered(
        &self,
        event_id: uuid::Uuid,
        occurred_at: &str,
        updated_at: String,
        ttl: i64,
    ) -> Result<bool, StoreError> {
        let key = index_key(occurred_at, &event_id);
        let mut items = self.lock_items();

        match items.get_mut(&key) {
            Some(event) => {
                if !event.delivered {
                    event.delivered = true;
                    event.updated_at = updated_at;
                    event.ttl = Some(ttl);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_undelivered(
        &self,
        limit: usize,
        start_after: Option<StartAfter>,
    ) -> Result<Page, StoreError> {
        let items = self.lock_items();

        let lower = match &start_after {
            Some(key) => Bound::Excluded(index_key(&key.occurred_at, &key.event_id)),
            None => Bound::Unbounded,
        };

        // Probe one item past the limit so the continuation signal never
        // reports a false "no more".
        let mut events: Vec<Event> = items
            .range((lower, Bound::Unbounded))
            .map(|(_, event)| event)
            .filter(|event| !event.delivered)
            .take(limit + 1)
            .cloned()
            .collect();

        let last_key = if events.len() > limit {
            events.truncate(limit);
            events.last().map(|event| StartAfter {
                occurred_at: event.occurred_at.clone(),
                event_id: event.event_id,
            })
        } else {
            None
        };

        Ok(Page { events, last_key })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn event(occurred_at: &str) -> Event {
        Event {
            event_id: Uuid::now_v7(),
            occurred_at: occurred_at.to_string(),
            event_type: "user.signup".to_string(),
            payload: json!({"user_id": "123"}),
            source: None,
            metadata: None,
            delivered: false,
            created_at: occurred_at.to_string(),
            updated_at: occurred_at.to_string(),
            ttl: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let stored = event("2025-11-11T12:00:00.000000Z");

        store.put(stored.clone()).await.unwrap();
        let found = store
            .get(stored.event_id, &stored.occurred_at)
            .await
            .unwrap();

        assert_eq!(found, Some(stored));
    }

    #[tokio::test]
    async fn get_unknown_key_is_none() {
        let store = MemoryStore::new();

        let found = store
            .get(Uuid::now_v7(), "2025-11-11T12:00:00.000000Z")
            .await
            .unwrap();

        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn lists_in_ascending_order() {
        let store = MemoryStore::new();
        for ts in [
            "2025-11-11T12:00:02.000000Z",
            "2025-11-11T12:00:00.000000Z",
            "2025-11-11T12:00:01.000000Z",
        ] {
            store.put(event(ts)).await.unwrap();
        }

        let page = store.list_undelivered(10, None).await.unwrap();

        let timestamps: Vec<&str> = page
            .events
            .iter()
            .map(|e| e.occurred_at.as_str())
            .collect();
        assert_eq!(
            timestamps,
            vec![
                "2025-11-11T12:00:00.000000Z",
                "2025-11-11T12:00:01.000000Z",
                "2025-11-11T12:00:02.000000Z",
            ]
        );
        assert!(page.last_key.is_none());
    }

    #[tokio::test]
    async fn start_after_is_exclusive() {
        let store = MemoryStore::new();
        let first = event("2025-11-11T12:00:00.000000Z");
        let second = event("2025-11-11T12:00:01.000000Z");
        store.put(first.clone()).await.unwrap();
        store.put(second.clone()).await.unwrap();

        let page = store
            .list_undelivered(
                10,
                Some(StartAfter {
                    occurred_at: first.occurred_at.clone(),
                    event_id: first.event_id,
                }),
            )
            .await
            .unwrap();

        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].event_id, second.event_id);
    }

    #[tokio::test]
    async fn continuation_signal_only_when_more_exist() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .put(event(&format!("2025-11-11T12:00:0{i}.000000Z")))
                .await
                .unwrap();
        }

        let full = store.list_undelivered(2, None).await.unwrap();
        assert_eq!(full.events.len(), 2);
        assert!(full.last_key.is_some());

        // A page that drains the index exactly carries no continuation.
        let rest = store.list_undelivered(1, full.last_key).await.unwrap();
        assert_eq!(rest.events.len(), 1);
        assert!(rest.last_key.is_none());
    }

    #[tokio::test]
    async fn delivered_events_leave_the_index() {
        let store = MemoryStore::new();
        let stored = event("2025-11-11T12:00:00.000000Z");
        store.put(stored.clone()).await.unwrap();

        let found = store
            .mark_delivered(
                stored.event_id,
                &stored.occurred_at,
                "2025-11-11T12:05:00.000000Z".to_string(),
                1_765_000_000,
            )
            .await
            .unwrap();
        assert!(found);

        let page = store.list_undelivered(10, None).await.unwrap();
        assert!(page.events.is_empty());

        let record = store
            .get(stored.event_id, &stored.occurred_at)
            .await
            .unwrap()
            .unwrap();
        assert!(record.delivered);
        assert_eq!(record.ttl, Some(1_765_000_000));
        assert_eq!(record.updated_at, "2025-11-11T12:05:00.000000Z");
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let store = MemoryStore::new();
        let stored = event("2025-11-11T12:00:00.000000Z");
        store.put(stored.clone()).await.unwrap();

        store
            .mark_delivered(
                stored.event_id,
                &stored.occurred_at,
                "2025-11-11T12:05:00.000000Z".to_string(),
                100,
            )
            .await
            .unwrap();
        let again = store
            .mark_delivered(
                stored.event_id,
                &stored.occurred_at,
                "2025-11-11T12:06:00.000000Z".to_string(),
                200,
            )
            .await
            .unwrap();

        assert!(again);
        let record = store
            .get(stored.event_id, &stored.occurred_at)
            .await
            .unwrap()
            .unwrap();
        // The first acknowledgment wins; the repeat is a no-op.
        assert_eq!(record.ttl, Some(100));
        assert_eq!(record.updated_at, "2025-11-11T12:05:00.000000Z");
    }

    #[tokio::test]
    async fn mark_delivered_unknown_event_reports_missing() {
        let store = MemoryStore::new();

        let found = store
            .mark_delivered(
                Uuid::now_v7(),
                "2025-11-11T12:00:00.000000Z",
                "2025-11-11T12:05:00.000000Z".to_string(),
                100,
            )
            .await
            .unwrap();

        assert!(!found);
    }
}
