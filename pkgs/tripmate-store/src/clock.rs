//! Store-side timestamps

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Source of the timestamps written by the stores
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never hands out the same millisecond twice.
///
/// Writes issued through one context are therefore totally ordered by their
/// `created_at`/`updated_at` values, even when they land within the same
/// millisecond.
#[derive(Debug, Default)]
pub struct ServerClock {
    last_millis: AtomicI64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ServerClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_millis();
        let mut previous = self.last_millis.load(Ordering::Relaxed);
        loop {
            let next = wall.max(previous + 1);
            match self.last_millis.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return from_millis(next),
                Err(current) => previous = current,
            }
        }
    }
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let clock = ServerClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn never_behind_wall_clock() {
        let clock = ServerClock::new();
        let before = Utc::now().timestamp_millis();
        assert!(clock.now().timestamp_millis() >= before);
    }
}
