use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::fingerprint::fingerprint;

/// Result of an atomic check-and-reserve against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// No live entry existed; the candidate id is now reserved and the
    /// caller should persist a new event under it.
    Fresh,
    /// A live entry existed; the caller must not create a new event and
    /// returns the existing id instead.
    Duplicate(Uuid),
}

struct Entry {
    event_id: Uuid,
    expires_at: OffsetDateTime,
}

/// In-memory cache collapsing identical-content submissions within a
/// trailing window to a single stored event.
///
/// Process-local by design: two service instances do not share state. The
/// map grows with the number of unique fingerprints seen per window;
/// expired entries are dropped lazily on lookup and by [`sweep`].
///
/// [`sweep`]: DedupCache::sweep
pub struct DedupCache {
    window: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        DedupCache {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check for a live entry and reserve the candidate id if none exists,
    /// as a single atomic step. Entries past their expiry are treated as
    /// absent and overwritten.
    ///
    /// `now` is only passed by tests; production callers pass `None`.
    pub fn check_and_reserve(
        &self,
        event_type: &str,
        payload: &Value,
        candidate_id: Uuid,
        now: Option<OffsetDateTime>,
    ) -> DedupOutcome {
        let now = now.unwrap_or_else(OffsetDateTime::now_utc);
        let key = fingerprint(event_type, payload);

        let mut entries = self.lock_entries();

        if let Some(entry) = entries.get(&key) {
            if entry.expires_at > now {
                return DedupOutcome::Duplicate(entry.event_id);
            }
        }

        entries.insert(
            key,
            Entry {
                event_id: candidate_id,
                expires_at: now + self.window,
            },
        );
        DedupOutcome::Fresh
    }

    /// Drop a reservation that was never persisted, so a retry of the same
    /// content is not answered with an id that has no stored event. Only
    /// removes the entry if it still maps to `candidate_id`.
    pub fn release(&self, event_type: &str, payload: &Value, candidate_id: Uuid) {
        let key = fingerprint(event_type, payload);
        let mut entries = self.lock_entries();

        if entries
            .get(&key)
            .is_some_and(|entry| entry.event_id == candidate_id)
        {
            entries.remove(&key);
        }
    }

    /// Prune expired entries. Memory hygiene only: correctness comes from
    /// the lazy expiry check in [`check_and_reserve`].
    ///
    /// [`check_and_reserve`]: DedupCache::check_and_reserve
    pub fn sweep(&self, now: Option<OffsetDateTime>) -> usize {
        let now = now.unwrap_or_else(OffsetDateTime::now_utc);
        let mut entries = self.lock_entries();

        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
