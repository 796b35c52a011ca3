//! Background progress thread for the threaded strategies.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
};

use super::{BackoffConfig, ProgressEngine, ProgressMode};
use crate::panic::format_panic;

/// Handle to a running progress thread. Stopping is explicit; dropping the
/// handle without stopping detaches the thread until its engine stops.
#[derive(Debug)]
pub(crate) struct ProgressThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl ProgressThread {
    /// Spawn a thread named `name` that progresses `engine` until stopped.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub(crate) fn spawn(
        engine: &Arc<ProgressEngine>,
        name: String,
        backoff: BackoffConfig,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let engine = Arc::clone(engine);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(&engine, &flag, backoff.normalized()))?;
        let thread_id = handle.thread().id();
        Ok(Self {
            stop,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Returns `true` when called from the progress thread itself.
    pub(crate) fn is_current(&self) -> bool { thread::current().id() == self.thread_id }

    /// Ask the loop to exit, wake it, and join it unless called from the
    /// progress thread itself.
    pub(crate) fn stop(&mut self, engine: &ProgressEngine) {
        self.stop.store(true, Ordering::Release);
        engine.transport().signal();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.is_current() {
            tracing::debug!("progress thread stopping itself; not joining");
            return;
        }
        if let Err(panic) = handle.join() {
            tracing::error!(panic = %format_panic(panic), "progress thread panicked");
        }
    }
}

fn run(engine: &Arc<ProgressEngine>, stop: &AtomicBool, backoff: BackoffConfig) {
    engine.bind_progress_thread();
    let mode = engine.mode();
    tracing::info!(engine = engine.id(), %mode, "progress thread started");
    let mut delay = backoff.initial_delay;
    while !stop.load(Ordering::Acquire) {
        match mode {
            ProgressMode::ThreadPolling => {
                if mode.advance_once(engine) {
                    delay = backoff.initial_delay;
                } else {
                    thread::sleep(delay);
                    delay = backoff.next_delay(delay);
                }
            }
            _ => {
                mode.advance_blocking(engine, Some(engine.blocking_slice()));
            }
        }
    }
    tracing::info!(engine = engine.id(), "progress thread stopped");
}
