//! Core rate limiter implementation.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::config::RateLimitingConfig;

use super::clock::{Clock, Millis, SystemClock};
use super::key::RateLimitKey;
use super::sink::{AbuseEvent, AbuseSink, NoopAbuseSink};
use super::state::{RateLimitState, SweepStats};

/// Default sliding window length.
const DEFAULT_WINDOW_MS: Millis = 10_000;
/// Default accepted requests per window.
const DEFAULT_MAX_REQUESTS: usize = 10;
/// Default silence after which offenses are forgotten.
const DEFAULT_OFFENSE_RESET_MS: Millis = 120_000;
/// Default cooldown for a first offense.
const DEFAULT_BASE_COOLDOWN_MS: Millis = 10_000;
/// Default offense count that raises an alert.
const DEFAULT_ALERT_THRESHOLD: u32 = 5;

/// Limits applied by a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitConfig {
    /// Sliding window length in milliseconds
    pub window_ms: Millis,
    /// Maximum accepted requests in the window
    pub max_requests: usize,
    /// Silence that resets the offense count
    pub offense_reset_window_ms: Millis,
    /// Cooldown for the first offense; doubled for each consecutive one
    pub base_cooldown_ms: Millis,
    /// Offense count at which alerts are raised
    pub alert_threshold: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            offense_reset_window_ms: DEFAULT_OFFENSE_RESET_MS,
            base_cooldown_ms: DEFAULT_BASE_COOLDOWN_MS,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
        }
    }
}

impl From<&RateLimitingConfig> for LimitConfig {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            window_ms: to_millis(config.window_ms),
            max_requests: config.max_requests,
            offense_reset_window_ms: to_millis(config.offense_reset_window_ms),
            base_cooldown_ms: to_millis(config.base_cooldown_ms),
            alert_threshold: config.alert_threshold,
        }
    }
}

fn to_millis(ms: u64) -> Millis {
    Millis::try_from(ms).unwrap_or(Millis::MAX)
}

impl LimitConfig {
    /// Cooldown for the given consecutive offense: `base * 2^(offenses - 1)`.
    pub fn cooldown_for(&self, offenses: u32) -> Millis {
        let factor = 1u64
            .checked_shl(offenses.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let base = u64::try_from(self.base_cooldown_ms).unwrap_or(0);
        to_millis(base.saturating_mul(factor))
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed,
    /// The key is serving a cooldown.
    CoolingDown {
        /// Whole seconds until the cooldown ends, rounded up
        wait_secs: u64,
    },
    /// The window is full; a new cooldown has started.
    LimitExceeded {
        /// Length of the new cooldown in whole seconds, rounded up
        retry_after_secs: u64,
        /// Consecutive offense count
        offense_count: u32,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Seconds the client should wait, if rejected.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Allowed => None,
            Decision::CoolingDown { wait_secs } => Some(*wait_secs),
            Decision::LimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
        }
    }

    /// Client-facing message for a rejection.
    pub fn rejection_message(&self) -> Option<String> {
        match self {
            Decision::Allowed => None,
            Decision::CoolingDown { wait_secs } => {
                Some(format!("Too many requests. Cooldown: wait {}s.", wait_secs))
            }
            Decision::LimitExceeded {
                retry_after_secs, ..
            } => Some(format!(
                "Rate limit exceeded. Try again in {}s",
                retry_after_secs
            )),
        }
    }
}

fn ceil_secs(ms: Millis) -> u64 {
    u64::try_from(ms).unwrap_or(0).div_ceil(1000)
}

/// The rate limiter deciding request admission per client key.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    config: LimitConfig,
    state: Arc<RateLimitState>,
    sink: Arc<dyn AbuseSink>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock with fresh state.
    pub fn new(config: LimitConfig, sink: Arc<dyn AbuseSink>) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    /// Create a rate limiter on a custom clock with fresh state.
    pub fn with_clock(config: LimitConfig, sink: Arc<dyn AbuseSink>, clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(config, Arc::new(RateLimitState::new()), sink, clock)
    }

    /// Create a rate limiter over existing state.
    pub fn from_parts(
        config: LimitConfig,
        state: Arc<RateLimitState>,
        sink: Arc<dyn AbuseSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            state,
            sink,
            clock,
        }
    }

    /// Check a request from `key` and update its records.
    ///
    /// An active cooldown rejects without touching any other state. Otherwise
    /// the window is trimmed; a full window registers an offense and starts a
    /// cooldown, while an accepted request is logged and clears any cooldown.
    pub fn check(&self, key: &RateLimitKey) -> Decision {
        let now = self.clock.now_ms();
        let key = key.to_string_key();

        trace!(key = %key, now = now, "Checking rate limit");

        let mut tables = self.state.lock();

        if let Some(&until) = tables.cooldowns.get(&key) {
            if now < until {
                let wait_secs = ceil_secs(until - now);
                debug!(key = %key, wait_secs = wait_secs, "Request rejected during cooldown");
                return Decision::CoolingDown { wait_secs };
            }
        }

        let log = tables.trim_window(&key, now, self.config.window_ms);
        if log.len() < self.config.max_requests {
            log.push(now);
            tables.cooldowns.remove(&key);
            return Decision::Allowed;
        }

        let offense_count = tables
            .offenses
            .entry(key.clone())
            .or_default()
            .register(now, self.config.offense_reset_window_ms);
        let cooldown = self.config.cooldown_for(offense_count);
        tables.cooldowns.insert(key.clone(), now.saturating_add(cooldown));
        drop(tables);

        debug!(
            key = %key,
            offenses = offense_count,
            cooldown_ms = cooldown,
            "Rate limit exceeded"
        );
        self.report(key, offense_count, now);

        Decision::LimitExceeded {
            retry_after_secs: ceil_secs(cooldown),
            offense_count,
        }
    }

    fn report(&self, key: String, offense_count: u32, now: Millis) {
        let event = AbuseEvent {
            at: Utc.timestamp_millis_opt(now).single().unwrap_or_else(Utc::now),
            key,
            offense_count,
        };
        self.sink.record_offense(&event);
        if offense_count >= self.config.alert_threshold {
            self.sink.raise_alert(&event);
        }
    }

    /// Remove stale entries from all three tables.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now_ms();
        let stats = self.state.lock().sweep(
            now,
            self.config.window_ms,
            self.config.offense_reset_window_ms,
        );
        info!(
            request_logs = stats.request_logs,
            offenses = stats.offenses,
            cooldowns = stats.cooldowns,
            "[Cleanup] Rate limit state swept"
        );
        stats
    }

    /// Accepted requests for `key` within the current window.
    pub fn request_count(&self, key: &RateLimitKey) -> usize {
        let now = self.clock.now_ms();
        let tables = self.state.lock();
        tables
            .requests
            .get(&key.to_string_key())
            .map(|log| {
                log.iter()
                    .filter(|ts| now - **ts < self.config.window_ms)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Stored offense count for `key`, 0 if none.
    pub fn offense_count(&self, key: &RateLimitKey) -> u32 {
        self.state
            .lock()
            .offenses
            .get(&key.to_string_key())
            .map(|record| record.count)
            .unwrap_or(0)
    }

    /// Stored cooldown expiry for `key`.
    pub fn cooldown_until(&self, key: &RateLimitKey) -> Option<Millis> {
        self.state
            .lock()
            .cooldowns
            .get(&key.to_string_key())
            .copied()
    }

    /// Number of distinct keys holding any state.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().key_count()
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.state.clear();
    }

    /// The limits in effect.
    pub fn config(&self) -> &LimitConfig {
        &self.config
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimitConfig::default(), Arc::new(NoopAbuseSink))
    }
}
