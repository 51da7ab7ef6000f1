use std::sync::Mutex;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

pub trait TimeSource {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

// Fixed-width so that timestamp strings sort lexicographically; the inbox
// pagination order depends on this.
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&TIMESTAMP_FORMAT)
        .expect("failed to format timestamp")
}

/// Controllable clock for tests.
pub struct FixedTime {
    now: Mutex<OffsetDateTime>,
}

impl FixedTime {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += by;
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> OffsetDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn timestamps_are_fixed_width() {
        let plain = format_timestamp(datetime!(2025-11-11 12:00:00 UTC));
        let fractional = format_timestamp(datetime!(2025-11-11 12:00:00.5 UTC));

        assert_eq!(plain, "2025-11-11T12:00:00.000000Z");
        assert_eq!(fractional, "2025-11-11T12:00:00.500000Z");
        assert_eq!(plain.len(), fractional.len());
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let earlier = format_timestamp(datetime!(2025-11-11 12:00:00.25 UTC));
        let later = format_timestamp(datetime!(2025-11-11 12:00:00.5 UTC));
        let whole = format_timestamp(datetime!(2025-11-11 12:00:01 UTC));

        assert!(earlier < later);
        assert!(later < whole);
    }
}
