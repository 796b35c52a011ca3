//! Cooperative progress driver for async runtimes.
//!
//! Workers without a progress thread only advance when someone calls into
//! them. [`drive`] does that from a tokio task, so request futures awaited on
//! the same runtime resolve without blocking any runtime thread.

use std::sync::Arc;

use tokio::{select, task::yield_now, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::worker::Worker;

/// Progress `worker` cooperatively until `shutdown` is cancelled or the
/// worker shuts down.
///
/// Yields to the scheduler after every productive step and backs off, using
/// the worker's configured [`BackoffConfig`](crate::progress::BackoffConfig),
/// while idle. Returns immediately for workers with a progress thread.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use tokio_util::sync::CancellationToken;
/// use ucxio::{driver::drive, worker::Worker};
///
/// async fn run(worker: Arc<Worker>) {
///     let token = CancellationToken::new();
///     let task = tokio::spawn(drive(Arc::clone(&worker), token.clone()));
///     // ... issue requests and await them ...
///     token.cancel();
///     let _ = task.await;
/// }
/// ```
pub async fn drive(worker: Arc<Worker>, shutdown: CancellationToken) {
    if !worker.progress_mode().requires_external_driver() {
        tracing::debug!(mode = %worker.progress_mode(), "worker has a progress thread; driver idle");
        return;
    }
    let backoff = worker.config().backoff();
    let mut delay = backoff.initial_delay;
    while worker.is_running() {
        if worker.progress_once() {
            delay = backoff.initial_delay;
            select! {
                biased;
                () = shutdown.cancelled() => break,
                () = yield_now() => {}
            }
        } else {
            select! {
                biased;
                () = shutdown.cancelled() => break,
                () = sleep(delay) => {}
            }
            delay = backoff.next_delay(delay);
        }
    }
    tracing::debug!("progress driver stopped");
}
