//! Rate limit state tables.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

use super::clock::Millis;

/// Consecutive violations for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffenseRecord {
    /// Violations since the last silence gap
    pub count: u32,
    /// When the most recent violation happened
    pub last_offense_ms: Millis,
}

impl OffenseRecord {
    /// Record a violation at `now` and return the new count.
    ///
    /// The count starts over when more than `reset_window_ms` has passed since
    /// the previous violation.
    pub fn register(&mut self, now: Millis, reset_window_ms: Millis) -> u32 {
        if now - self.last_offense_ms > reset_window_ms {
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.last_offense_ms = now;
        self.count
    }
}

/// Counts of entries removed by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub request_logs: usize,
    pub offenses: usize,
    pub cooldowns: usize,
}

impl SweepStats {
    /// Total entries removed.
    pub fn total(&self) -> usize {
        self.request_logs + self.offenses + self.cooldowns
    }
}

/// The three per-key tables.
#[derive(Debug, Default)]
pub struct Tables {
    /// Accepted request timestamps inside the current window
    pub requests: HashMap<String, Vec<Millis>>,
    /// Offense history
    pub offenses: HashMap<String, OffenseRecord>,
    /// Cooldown expiry instants
    pub cooldowns: HashMap<String, Millis>,
}

impl Tables {
    /// Drop the timestamps of `key` older than the window and return the rest.
    pub fn trim_window(&mut self, key: &str, now: Millis, window_ms: Millis) -> &mut Vec<Millis> {
        let log = self.requests.entry(key.to_string()).or_default();
        log.retain(|ts| now - *ts < window_ms);
        log
    }

    /// Remove entries that no longer influence any decision.
    pub fn sweep(&mut self, now: Millis, window_ms: Millis, reset_window_ms: Millis) -> SweepStats {
        let mut stats = SweepStats::default();

        let before = self.requests.len();
        self.requests.retain(|_, log| match log.last() {
            Some(last) => now - *last <= window_ms,
            None => false,
        });
        stats.request_logs = before - self.requests.len();

        let before = self.offenses.len();
        self.offenses
            .retain(|_, record| now - record.last_offense_ms <= reset_window_ms);
        stats.offenses = before - self.offenses.len();

        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, until| *until >= now);
        stats.cooldowns = before - self.cooldowns.len();

        stats
    }

    /// Number of distinct keys with any state.
    pub fn key_count(&self) -> usize {
        let mut keys: Vec<&String> = self
            .requests
            .keys()
            .chain(self.offenses.keys())
            .chain(self.cooldowns.keys())
            .collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }

    fn clear(&mut self) {
        self.requests.clear();
        self.offenses.clear();
        self.cooldowns.clear();
    }
}

/// Shared rate limit state: the three tables behind one mutex.
///
/// Each decision locks once, so the read-modify-write of a key's records is
/// atomic with respect to concurrent requests and the cleanup sweep.
#[derive(Debug, Default)]
pub struct RateLimitState {
    tables: Mutex<Tables>,
}

impl RateLimitState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the tables.
    pub fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock()
    }

    /// Remove all state.
    pub fn clear(&self) {
        self.tables.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Millis = 10_000;
    const RESET: Millis = 120_000;

    #[test]
    fn test_offense_increments_within_reset_window() {
        let mut record = OffenseRecord::default();
        assert_eq!(record.register(1_000, RESET), 1);
        assert_eq!(record.register(30_000, RESET), 2);
        assert_eq!(record.last_offense_ms, 30_000);
    }

    #[test]
    fn test_offense_resets_after_silence() {
        let mut record = OffenseRecord {
            count: 4,
            last_offense_ms: 1_000,
        };
        assert_eq!(record.register(1_000 + RESET + 1, RESET), 1);
    }

    #[test]
    fn test_offense_kept_at_exact_reset_boundary() {
        let mut record = OffenseRecord {
            count: 2,
            last_offense_ms: 0,
        };
        assert_eq!(record.register(RESET, RESET), 3);
    }

    #[test]
    fn test_trim_window_drops_old_timestamps() {
        let mut tables = Tables::default();
        tables
            .requests
            .insert("k".into(), vec![0, 5_000, 9_999, 10_000]);

        let log = tables.trim_window("k", 10_000, WINDOW);
        assert_eq!(*log, vec![5_000, 9_999, 10_000]);
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let mut tables = Tables::default();
        let now = 200_000;

        tables.requests.insert("stale".into(), vec![now - WINDOW - 1]);
        tables.requests.insert("fresh".into(), vec![now - 100]);
        tables.requests.insert("empty".into(), Vec::new());
        tables.offenses.insert(
            "old".into(),
            OffenseRecord {
                count: 1,
                last_offense_ms: now - RESET - 1,
            },
        );
        tables.offenses.insert(
            "recent".into(),
            OffenseRecord {
                count: 3,
                last_offense_ms: now - 1_000,
            },
        );
        tables.cooldowns.insert("expired".into(), now - 1);
        tables.cooldowns.insert("active".into(), now + 5_000);

        let stats = tables.sweep(now, WINDOW, RESET);

        assert_eq!(
            stats,
            SweepStats {
                request_logs: 2,
                offenses: 1,
                cooldowns: 1,
            }
        );
        assert_eq!(stats.total(), 4);
        assert!(tables.requests.contains_key("fresh"));
        assert!(tables.offenses.contains_key("recent"));
        assert!(tables.cooldowns.contains_key("active"));
    }

    #[test]
    fn test_key_count_deduplicates_across_tables() {
        let state = RateLimitState::new();
        {
            let mut tables = state.lock();
            tables.requests.insert("a".into(), vec![1]);
            tables.cooldowns.insert("a".into(), 5);
            tables.offenses.insert("b".into(), OffenseRecord::default());
        }
        assert_eq!(state.lock().key_count(), 2);

        state.clear();
        assert_eq!(state.lock().key_count(), 0);
    }
}
