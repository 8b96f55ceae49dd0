//! Per-container restart frequency tracking.
//!
//! Process-local sliding-window counters used to distinguish a one-off
//! restart from a restart storm. Counters live only as long as the process;
//! the persisted restart count on the container record is updated separately.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
struct RestartStat {
    count: u32,
    last_seen: DateTime<Utc>,
}

pub struct RestartTracker {
    window: chrono::Duration,
    inner: Mutex<HashMap<String, RestartStat>>,
}

impl RestartTracker {
    pub fn new(window: Duration) -> Self {
        RestartTracker {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero()),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a restart observed at `at` and return the count within the
    /// current window. A container idle longer than the window starts a
    /// fresh window at count 1.
    pub fn record(&self, container_id: &str, at: DateTime<Utc>) -> u32 {
        let mut inner = self.inner.lock().expect("restart tracker mutex poisoned");
        let stat = inner
            .entry(container_id.to_string())
            .and_modify(|stat| {
                if at - stat.last_seen > self.window {
                    stat.count = 1;
                } else {
                    stat.count += 1;
                }
                stat.last_seen = at;
            })
            .or_insert(RestartStat { count: 1, last_seen: at });
        stat.count
    }

    pub fn record_now(&self, container_id: &str) -> u32 {
        self.record(container_id, Utc::now())
    }

    /// Drop the counter when the container is destroyed.
    pub fn remove(&self, container_id: &str) {
        self.inner
            .lock()
            .expect("restart tracker mutex poisoned")
            .remove(container_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn increments_within_the_window() {
        let tracker = RestartTracker::new(Duration::from_secs(300));
        assert_eq!(tracker.record("c1", at(0)), 1);
        assert_eq!(tracker.record("c1", at(1)), 2);
        assert_eq!(tracker.record("c1", at(120)), 3);
    }

    #[test]
    fn resets_after_idle_beyond_the_window() {
        let tracker = RestartTracker::new(Duration::from_secs(300));
        assert_eq!(tracker.record("c1", at(0)), 1);
        assert_eq!(tracker.record("c1", at(1)), 2);
        // 400s of silence exceeds the 5 minute window.
        assert_eq!(tracker.record("c1", at(400)), 1);
    }

    #[test]
    fn counters_are_per_container() {
        let tracker = RestartTracker::new(Duration::from_secs(300));
        assert_eq!(tracker.record("c1", at(0)), 1);
        assert_eq!(tracker.record("c2", at(0)), 1);
        assert_eq!(tracker.record("c1", at(1)), 2);
        assert_eq!(tracker.record("c2", at(1)), 2);
    }

    #[test]
    fn remove_clears_history() {
        let tracker = RestartTracker::new(Duration::from_secs(300));
        tracker.record("c1", at(0));
        tracker.record("c1", at(1));
        tracker.remove("c1");
        assert_eq!(tracker.record("c1", at(2)), 1);
    }
}
