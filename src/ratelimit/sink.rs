//! Abuse reporting sinks.
//!
//! Offenses are reported through an [`AbuseSink`]. Reporting is best effort:
//! sinks must return immediately and swallow their own failures so the
//! admission decision never waits on I/O.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One rate limit violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbuseEvent {
    /// When the violation happened
    pub at: DateTime<Utc>,
    /// String form of the offending key
    pub key: String,
    /// Consecutive offense count after this violation
    pub offense_count: u32,
}

impl AbuseEvent {
    /// Render the abuse log line, `{ISO timestamp} | {key} | offense: {count}`.
    pub fn log_line(&self) -> String {
        format!(
            "{} | {} | offense: {}\n",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.key,
            self.offense_count
        )
    }
}

/// Destination for abuse reports.
pub trait AbuseSink: Send + Sync {
    /// Record an offense. Must not block.
    fn record_offense(&self, event: &AbuseEvent);

    /// Raise an alert for a repeat offender.
    fn raise_alert(&self, event: &AbuseEvent) {
        warn!(
            key = %event.key,
            offenses = event.offense_count,
            "[ALERT] Abuse detected"
        );
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAbuseSink;

impl AbuseSink for NoopAbuseSink {
    fn record_offense(&self, _event: &AbuseEvent) {}

    fn raise_alert(&self, _event: &AbuseEvent) {}
}

/// Sink that keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryAbuseSink {
    offenses: Mutex<Vec<AbuseEvent>>,
    alerts: Mutex<Vec<AbuseEvent>>,
}

impl MemoryAbuseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offenses recorded so far.
    pub fn offenses(&self) -> Vec<AbuseEvent> {
        self.offenses.lock().clone()
    }

    /// Alerts raised so far.
    pub fn alerts(&self) -> Vec<AbuseEvent> {
        self.alerts.lock().clone()
    }
}

impl AbuseSink for MemoryAbuseSink {
    fn record_offense(&self, event: &AbuseEvent) {
        self.offenses.lock().push(event.clone());
    }

    fn raise_alert(&self, event: &AbuseEvent) {
        self.alerts.lock().push(event.clone());
    }
}

/// Default number of abuse log lines queued ahead of the writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Sink that appends offenses to a log file from a background task.
///
/// Lines are queued on a bounded channel and written in order by a single
/// writer, so `record_offense` never touches the filesystem. Lines arriving
/// while the queue is full are dropped.
#[derive(Debug, Clone)]
pub struct FileAbuseSink {
    tx: mpsc::Sender<String>,
    path: PathBuf,
}

impl FileAbuseSink {
    /// Start the writer task for `path`.
    ///
    /// Must be called from within a Tokio runtime. The writer exits once every
    /// clone of the sink has been dropped and the queue is drained.
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(path, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start the writer task with a queue of `capacity` lines.
    pub fn spawn_with_capacity(path: impl Into<PathBuf>, capacity: usize) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(write_lines(path.clone(), rx));
        (Self { tx, path }, handle)
    }

    /// The log file this sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AbuseSink for FileAbuseSink {
    fn record_offense(&self, event: &AbuseEvent) {
        match self.tx.try_send(event.log_line()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(path = %self.path.display(), "Abuse log queue full, dropping entry");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(path = %self.path.display(), "Abuse log writer has stopped, dropping entry");
            }
        }
    }
}

async fn write_lines(path: PathBuf, mut rx: mpsc::Receiver<String>) {
    let mut dir_ready = false;

    while let Some(line) = rx.recv().await {
        if !dir_ready {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    debug!(error = %e, dir = %parent.display(), "Failed to create abuse log directory");
                }
            }
            dir_ready = true;
        }

        if let Err(e) = append_line(&path, &line).await {
            debug!(error = %e, path = %path.display(), "Failed to write abuse log entry");
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
