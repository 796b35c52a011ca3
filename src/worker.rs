//! Workers: one transport context plus the strategy that progresses it.
//!
//! A [`Worker`] is created from a shared [`Context`] and owns a
//! [`ProgressEngine`]. Endpoints and listeners hold the worker by `Arc`, so
//! it outlives every connection created from it.

pub mod config;

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

pub use config::WorkerConfig;

use crate::{
    context::Context,
    error::{Error, Result},
    listener::Listener,
    panic::run_guarded,
    progress::{EngineOptions, ProgressEngine, ProgressMode, ProgressThread},
    sync::lock,
    transport::{ConnRequestHandler, ConnectionRequest, WorkerAddress},
};

/// A transport worker and its progress strategy.
pub struct Worker {
    context: Arc<Context>,
    engine: Arc<ProgressEngine>,
    config: WorkerConfig,
    thread: Mutex<Option<ProgressThread>>,
    shut_down: AtomicBool,
}

impl Worker {
    /// Create a worker on `context`, spawning a progress thread when the
    /// configured mode needs one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the transport cannot create the worker
    /// context and [`Error::Spawn`] if the progress thread cannot start.
    pub fn new(context: &Arc<Context>, config: WorkerConfig) -> Result<Arc<Self>> {
        let transport = context
            .transport()
            .create_worker(context.config())
            .map_err(Error::Transport)?;
        let engine = ProgressEngine::new(
            transport,
            EngineOptions {
                mode: config.progress_mode(),
                always_delay: config.delayed_submission(),
                blocking_slice: config.blocking_slice(),
            },
        );
        let thread = if config.progress_mode().spawns_thread() {
            let thread =
                ProgressThread::spawn(&engine, config.thread_name().to_owned(), config.backoff())
                    .map_err(Error::Spawn)?;
            Some(thread)
        } else {
            None
        };
        tracing::debug!(
            worker = engine.id(),
            mode = %config.progress_mode(),
            delayed_submission = config.delayed_submission(),
            "worker created"
        );
        Ok(Arc::new(Self {
            context: Arc::clone(context),
            engine,
            config,
            thread: Mutex::new(thread),
            shut_down: AtomicBool::new(false),
        }))
    }

    /// The context this worker was created from.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> { &self.context }

    /// The options this worker was created with.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig { &self.config }

    /// The configured progress strategy.
    #[must_use]
    pub fn progress_mode(&self) -> ProgressMode { self.engine.mode() }

    /// Returns `false` once [`Worker::shutdown`] has run.
    #[must_use]
    pub fn is_running(&self) -> bool { !self.shut_down.load(Ordering::Acquire) }

    /// Engine handle for issuing work, refused after shutdown.
    pub(crate) fn engine(&self) -> Result<&Arc<ProgressEngine>> {
        if self.is_running() {
            Ok(&self.engine)
        } else {
            Err(Error::NotInitialized("worker"))
        }
    }

    /// Perform one non-blocking progress step. Returns `true` if any work
    /// happened.
    ///
    /// Does nothing while a progress thread owns the worker, when another
    /// thread is progressing, or when called from inside a progress step.
    pub fn progress_once(&self) -> bool {
        if !self.is_running() || !self.engine.requires_external_driver() {
            return false;
        }
        self.engine.mode().advance_once(&self.engine)
    }

    /// Block for up to `timeout` until the transport has work, then progress
    /// it. In polling mode this is a single non-blocking step.
    ///
    /// Does nothing while a progress thread owns the worker or when called
    /// from inside a progress step.
    pub fn progress_blocking(&self, timeout: Option<Duration>) -> bool {
        if !self.is_running() || !self.engine.requires_external_driver() {
            return false;
        }
        self.engine.mode().advance_blocking(&self.engine, timeout)
    }

    /// Address other workers can connect to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] after shutdown and
    /// [`Error::Transport`] if the transport cannot produce an address.
    pub fn address(&self) -> Result<WorkerAddress> {
        self.engine()?.transport().address().map_err(Error::Transport)
    }

    /// Listen on `port` (0 picks a free port). `on_request` runs on the
    /// progress-owning thread for every incoming connection; pass the
    /// request to [`Endpoint::accept`](crate::endpoint::Endpoint::accept).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] after shutdown and
    /// [`Error::Transport`] if the transport cannot listen.
    pub fn listen<F>(self: &Arc<Self>, port: u16, on_request: F) -> Result<Listener>
    where
        F: Fn(ConnectionRequest) + Send + Sync + 'static,
    {
        let handler: ConnRequestHandler = Arc::new(move |request| {
            run_guarded("connection request handler", || on_request(request));
        });
        let handle = self
            .engine()?
            .transport()
            .listen(port, handler)
            .map_err(Error::Transport)?;
        log::info!("listening on port {}", handle.port());
        Ok(Listener::new(Arc::clone(self), handle))
    }

    /// Run `f` on the progress-owning thread during the next progress step.
    ///
    /// Work issued from inside `f` bypasses the delayed queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] after shutdown.
    pub fn schedule<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.engine()?.schedule(Box::new(f));
        Ok(())
    }

    /// Number of requests on this worker that have not finished.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.engine
            .inflight()
            .active()
            .iter()
            .filter(|request| !request.is_completed())
            .count()
    }

    /// Cancel every unfinished request on this worker. Returns how many were
    /// cancelled.
    pub fn cancel_inflight(&self) -> usize { self.engine.inflight().cancel_all() }

    /// Returns `true` when called from this worker's progress thread.
    #[must_use]
    pub fn is_progress_thread(&self) -> bool { self.engine.is_progress_thread() }

    /// Stop the progress thread, if any. Afterwards the worker behaves like a
    /// caller-driven one: [`Worker::progress_once`] and waiting threads drive
    /// it.
    pub fn stop_progress_thread(&self) {
        let thread = lock(&self.thread).take();
        if let Some(mut thread) = thread {
            thread.stop(&self.engine);
            self.engine.release_progress_thread();
        }
    }

    /// Stop progress and release outstanding work.
    ///
    /// Drains the delayed queue, waits up to the configured shutdown timeout
    /// for operations the transport still holds, then cancels every request
    /// left. Returns the number of requests cancelled. Later calls do
    /// nothing and return 0.
    pub fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.stop_progress_thread();
        let cancelled = self.engine.shutdown(self.config.shutdown_timeout());
        tracing::info!(worker = self.engine.id(), cancelled, "worker shut down");
        cancelled
    }
}

impl Drop for Worker {
    fn drop(&mut self) { self.shutdown(); }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("engine", &self.engine)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
