//! Time source for backoff gates and queue ordering

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::util::duration_millis;

/// Source of wall-clock time in Unix milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);

        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
