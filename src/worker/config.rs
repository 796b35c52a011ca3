//! Construction options for [`Worker`](super::Worker).

use std::time::Duration;

use crate::progress::{BackoffConfig, ProgressMode};

const DEFAULT_BLOCKING_SLICE: Duration = Duration::from_millis(10);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_THREAD_NAME: &str = "ucxio-progress";

/// Options fixed when a worker is created.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use ucxio::{progress::ProgressMode, worker::WorkerConfig};
///
/// let config = WorkerConfig::default()
///     .with_progress_mode(ProgressMode::Polling)
///     .with_shutdown_timeout(Duration::from_millis(50));
/// assert_eq!(config.progress_mode(), ProgressMode::Polling);
/// assert!(!config.delayed_submission());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    progress_mode: ProgressMode,
    delayed_submission: bool,
    blocking_slice: Duration,
    shutdown_timeout: Duration,
    backoff: BackoffConfig,
    thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_mode: ProgressMode::default(),
            delayed_submission: false,
            blocking_slice: DEFAULT_BLOCKING_SLICE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            backoff: BackoffConfig::default(),
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl WorkerConfig {
    /// Select the progress strategy.
    #[must_use]
    pub fn with_progress_mode(mut self, mode: ProgressMode) -> Self {
        self.progress_mode = mode;
        self
    }

    /// Route every submission through the delayed queue, even from a thread
    /// that could submit directly. Submissions made from inside a progress
    /// step still go straight to the transport.
    #[must_use]
    pub fn with_delayed_submission(mut self, enabled: bool) -> Self {
        self.delayed_submission = enabled;
        self
    }

    /// Longest time one blocking progress call may sleep on the transport.
    /// Zero is raised to one microsecond.
    #[must_use]
    pub fn with_blocking_slice(mut self, slice: Duration) -> Self {
        self.blocking_slice = slice.max(Duration::from_micros(1));
        self
    }

    /// Grace period shutdown waits for outstanding operations before
    /// cancelling them.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Idle back-off for [`ProgressMode::ThreadPolling`]. The value is
    /// normalised.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Name given to the progress thread.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Configured progress strategy.
    #[must_use]
    pub fn progress_mode(&self) -> ProgressMode { self.progress_mode }

    /// Whether every submission is forced through the delayed queue.
    #[must_use]
    pub fn delayed_submission(&self) -> bool { self.delayed_submission }

    /// Longest single blocking progress call.
    #[must_use]
    pub fn blocking_slice(&self) -> Duration { self.blocking_slice }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration { self.shutdown_timeout }

    /// Thread-polling back-off.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig { self.backoff }

    /// Progress thread name.
    #[must_use]
    pub fn thread_name(&self) -> &str { &self.thread_name }
}
