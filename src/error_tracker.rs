//! Rate-limited failure logging for the retry loop.
//!
//! An unreachable command retries every few seconds, potentially for hours.
//! Logs warn on the first failure and every 6th after that (roughly one line
//! per minute at the default retry interval), and reports the failure count
//! and outage duration once an attempt finally succeeds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Log the 1st failure and every LOG_EVERY-th after that.
const LOG_EVERY: u32 = 6;

/// Summary of a run of failures, returned when an attempt succeeds again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    pub failures: u32,
    pub outage: Option<Duration>,
}

/// Shared failure tracker — cheap to clone, backed by atomics.
#[derive(Clone)]
pub struct ConsecutiveFailureTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    consecutive: AtomicU32,
    /// Timestamp of the first failure in the current run.
    first_failure_at: Mutex<Option<Instant>>,
}

impl ConsecutiveFailureTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                consecutive: AtomicU32::new(0),
                first_failure_at: Mutex::new(None),
            }),
        }
    }

    /// Call on each failed attempt. Returns true if this failure should be
    /// logged (warn).
    pub fn record_failure(&self) -> bool {
        let n = self.inner.consecutive.fetch_add(1, Ordering::Relaxed);

        if n == 0 {
            if let Ok(mut guard) = self.inner.first_failure_at.lock() {
                *guard = Some(Instant::now());
            }
        }

        n == 0 || (n + 1) % LOG_EVERY == 0
    }

    /// Call on a successful attempt. Returns `Some(Recovery)` if this success
    /// ends a run of failures (should emit info).
    pub fn record_success(&self) -> Option<Recovery> {
        let failures = self.inner.consecutive.swap(0, Ordering::Relaxed);
        if failures == 0 {
            return None;
        }
        let outage = self
            .inner
            .first_failure_at
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .map(|started| started.elapsed());
        Some(Recovery { failures, outage })
    }

    /// Current consecutive failure count.
    pub fn consecutive_count(&self) -> u32 {
        self.inner.consecutive.load(Ordering::Relaxed)
    }
}

impl Default for ConsecutiveFailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_rate_limits() {
        let tracker = ConsecutiveFailureTracker::new();

        // First failure should log
        assert!(tracker.record_failure(), "1st failure should log");

        // 2nd through 5th should NOT log
        for i in 1..5 {
            let should_log = tracker.record_failure();
            assert!(!should_log, "failure {} should be suppressed", i + 1);
        }

        // 6th should log again
        assert!(tracker.record_failure(), "6th failure should log");

        // 7th-11th suppressed, 12th logs
        for i in 6..11 {
            let should_log = tracker.record_failure();
            assert!(!should_log, "failure {} should be suppressed", i + 1);
        }
        assert!(tracker.record_failure(), "12th failure should log");
    }

    #[test]
    fn test_tracker_recovery() {
        let tracker = ConsecutiveFailureTracker::new();

        tracker.record_failure();
        tracker.record_failure();
        tracker.record_failure();
        assert_eq!(tracker.consecutive_count(), 3);

        let recovered = tracker.record_success().expect("should report recovery");
        assert_eq!(recovered.failures, 3);
        assert!(recovered.outage.is_some());
        assert_eq!(tracker.consecutive_count(), 0);

        // Subsequent success returns None
        assert_eq!(tracker.record_success(), None);
    }

    #[test]
    fn test_tracker_no_false_recovery() {
        let tracker = ConsecutiveFailureTracker::new();

        // Success with no prior failures → None
        assert_eq!(tracker.record_success(), None);
    }
}
