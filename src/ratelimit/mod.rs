//! Rate limiting logic and state management.

mod cleanup;
mod clock;
mod key;
mod limiter;
mod sink;
mod state;

pub use cleanup::CleanupTask;
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use key::{RateLimitKey, ANONYMOUS_TOKEN};
pub use limiter::{Decision, LimitConfig, RateLimiter};
pub use sink::{AbuseEvent, AbuseSink, FileAbuseSink, MemoryAbuseSink, NoopAbuseSink};
pub use state::{OffenseRecord, RateLimitState, SweepStats};
