//! Periodic cleanup of rate limit state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// A background task sweeping stale rate limit state on a fixed interval.
///
/// The task stops when [`CleanupTask::shutdown`] is called or the handle is
/// dropped.
pub struct CleanupTask {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Start sweeping `limiter` every `interval`.
    ///
    /// The first sweep runs one full interval after start. Must be called
    /// from within a Tokio runtime.
    pub fn start(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "Rate limit cleanup task started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Rate limit cleanup task stopped");
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::limiter::LimitConfig;
    use crate::ratelimit::sink::NoopAbuseSink;
    use crate::ratelimit::RateLimitKey;

    fn limiter_with_clock() -> (Arc<RateLimiter>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(RateLimiter::with_clock(
            LimitConfig::default(),
            Arc::new(NoopAbuseSink),
            clock.clone(),
        ));
        (limiter, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval() {
        let (limiter, clock) = limiter_with_clock();
        limiter.check(&RateLimitKey::from_parts(None, "127.0.0.1"));
        clock.set(60_000);

        let task = CleanupTask::start(limiter.clone(), Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(limiter.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let (limiter, clock) = limiter_with_clock();
        let task = CleanupTask::start(limiter.clone(), Duration::from_secs(1));
        assert!(task.is_running());

        task.shutdown().await;

        limiter.check(&RateLimitKey::from_parts(None, "127.0.0.1"));
        clock.set(60_000);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
