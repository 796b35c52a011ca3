//! The progress engine: owner of one transport worker context.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        OnceLock,
        PoisonError,
        TryLockError,
        Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use bytes::BytesMut;

use super::ProgressMode;
use crate::{
    delayed::{Deferred, DelayedQueue, DelayedSubmission},
    error::{RequestError, TransportErrorKind},
    inflight::InflightRegistry,
    metrics,
    panic::run_guarded,
    request::{Outcome, Request},
    sync::lock,
    transport::{CloseMode, Completion, ConnectionHandle, Operation, Submission, TransportWorker},
};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

// Upper bound on follow-up steps after a blocking wait, so a steady stream of
// new work cannot pin a waiter inside one call.
const MAX_FOLLOW_UP_STEPS: usize = 64;

thread_local! {
    static PROGRESSING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as progressing an engine until dropped.
struct ProgressScope(u64);

impl ProgressScope {
    fn enter(engine: u64) -> Self {
        PROGRESSING.with(|stack| stack.borrow_mut().push(engine));
        Self(engine)
    }
}

impl Drop for ProgressScope {
    fn drop(&mut self) {
        PROGRESSING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.0) {
                stack.remove(pos);
            }
        });
    }
}

fn progressing_on_this_thread(engine: u64) -> bool {
    PROGRESSING.with(|stack| stack.borrow().contains(&engine))
}

/// Held while a non-progress caller talks to the transport directly.
enum DirectOwnership<'a> {
    /// Already inside a progress step of this engine on this thread.
    Nested,
    Locked {
        _scope: ProgressScope,
        _guard: MutexGuard<'a, ()>,
    },
}

struct ReadyCompletion {
    request: Request,
    result: Result<usize, TransportErrorKind>,
    buffer: Option<BytesMut>,
}

/// Construction parameters for a [`ProgressEngine`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct EngineOptions {
    pub(crate) mode: ProgressMode,
    pub(crate) always_delay: bool,
    pub(crate) blocking_slice: Duration,
}

/// Owns a transport worker and decides which thread may touch it.
///
/// Progress ownership is exclusive. In threaded modes the progress thread
/// is the owner; otherwise whichever thread holds the progress lock is.
/// Work issued from any other thread is parked in the delayed queue and
/// submitted by the owner at the start of its next step.
pub(crate) struct ProgressEngine {
    id: u64,
    options: EngineOptions,
    transport: Arc<dyn TransportWorker>,
    delayed: DelayedQueue,
    ready: Mutex<VecDeque<ReadyCompletion>>,
    progress_lock: Mutex<()>,
    progress_thread: OnceLock<ThreadId>,
    outstanding: AtomicUsize,
    inflight: Arc<InflightRegistry>,
    thread_released: AtomicBool,
    stopped: AtomicBool,
}

impl ProgressEngine {
    pub(crate) fn new(transport: Arc<dyn TransportWorker>, options: EngineOptions) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            options,
            transport,
            delayed: DelayedQueue::default(),
            ready: Mutex::new(VecDeque::new()),
            progress_lock: Mutex::new(()),
            progress_thread: OnceLock::new(),
            outstanding: AtomicUsize::new(0),
            inflight: Arc::new(InflightRegistry::new()),
            thread_released: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u64 { self.id }

    pub(crate) fn mode(&self) -> ProgressMode { self.options.mode }

    pub(crate) fn blocking_slice(&self) -> Duration { self.options.blocking_slice }

    pub(crate) fn transport(&self) -> &Arc<dyn TransportWorker> { &self.transport }

    pub(crate) fn inflight(&self) -> &Arc<InflightRegistry> { &self.inflight }

    /// Operations the transport has accepted and not yet reported.
    pub(crate) fn outstanding(&self) -> usize { self.outstanding.load(Ordering::Acquire) }

    /// Returns `true` when callers must drive progress themselves: always
    /// in the non-threaded modes, and in threaded modes once the progress
    /// thread has been stopped.
    pub(crate) fn requires_external_driver(&self) -> bool {
        self.options.mode.requires_external_driver() || self.thread_released.load(Ordering::Acquire)
    }

    /// Hand progress ownership back to callers after the progress thread
    /// exits.
    pub(crate) fn release_progress_thread(&self) { self.thread_released.store(true, Ordering::Release); }

    pub(crate) fn is_stopped(&self) -> bool { self.stopped.load(Ordering::Acquire) }

    /// Returns `true` while the current thread is inside a progress step of
    /// this engine.
    pub(crate) fn is_progressing_here(&self) -> bool { progressing_on_this_thread(self.id) }

    /// Returns `true` on this engine's progress thread.
    pub(crate) fn is_progress_thread(&self) -> bool {
        !self.thread_released.load(Ordering::Acquire)
            && self.progress_thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn bind_progress_thread(&self) {
        let _ = self.progress_thread.set(thread::current().id());
    }

    /// Perform one non-blocking progress step if progress ownership is
    /// free. Returns `true` if any work happened.
    pub(crate) fn progress_once(self: &Arc<Self>) -> bool {
        if self.is_progressing_here() {
            return false;
        }
        let _guard = match self.progress_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        let _scope = ProgressScope::enter(self.id);
        self.step()
    }

    /// Block until the transport has work or `timeout` elapses, then step
    /// until no immediate work remains. Returns `true` if any work happened.
    ///
    /// Queues behind any other thread that currently owns progress.
    pub(crate) fn progress_blocking(self: &Arc<Self>, timeout: Option<Duration>) -> bool {
        if self.is_progressing_here() {
            return false;
        }
        let _guard = self
            .progress_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.blocking_steps(timeout, || false)
    }

    /// [`Self::progress_blocking`] on behalf of a waiter that stops caring
    /// once `done` holds.
    ///
    /// Returns `false` at once when another thread owns progress: that
    /// thread's steps finish the waiter's request, and the waiter is woken
    /// through the request itself rather than by queueing for the lock.
    /// `done` is checked again after the lock is taken and before parking on
    /// the transport.
    pub(crate) fn progress_blocking_until<F>(
        self: &Arc<Self>,
        timeout: Option<Duration>,
        done: F,
    ) -> bool
    where
        F: Fn() -> bool,
    {
        if self.is_progressing_here() {
            return false;
        }
        let _guard = match self.progress_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if done() {
            return false;
        }
        self.blocking_steps(timeout, done)
    }

    /// Step, park on the transport if idle and `done` does not hold, then
    /// take follow-up steps. The caller holds the progress lock.
    fn blocking_steps<F>(self: &Arc<Self>, timeout: Option<Duration>, done: F) -> bool
    where
        F: Fn() -> bool,
    {
        let _scope = ProgressScope::enter(self.id);
        let mut progressed = self.step();
        if !progressed && !done() {
            self.transport.wait(timeout);
        }
        for _ in 0..MAX_FOLLOW_UP_STEPS {
            if !self.step() {
                break;
            }
            progressed = true;
        }
        progressed
    }

    fn step(self: &Arc<Self>) -> bool {
        let mut progressed = self.drain_delayed();
        progressed |= self.transport.progress();
        progressed |= self.drain_ready();
        progressed
    }

    fn drain_delayed(self: &Arc<Self>) -> bool {
        let batch = self.delayed.take_all();
        if batch.is_empty() {
            return false;
        }
        tracing::trace!(engine = self.id, entries = batch.len(), "draining delayed queue");
        for entry in batch {
            match entry {
                Deferred::Submit(DelayedSubmission { operation, request }) => {
                    self.submit_now(request, operation);
                }
                Deferred::Close {
                    connection,
                    mode,
                    request,
                } => self.close_now(connection, mode, request),
                Deferred::Call(f) => {
                    run_guarded("scheduled call", f);
                }
            }
        }
        true
    }

    fn drain_ready(&self) -> bool {
        let batch = std::mem::take(&mut *lock(&self.ready));
        let progressed = !batch.is_empty();
        for ReadyCompletion {
            request,
            result,
            buffer,
        } in batch
        {
            request.release_transport(buffer);
            settle(&request, result);
        }
        progressed
    }

    /// Claim progress ownership for a direct transport call, if this thread
    /// may make one right now.
    fn claim_direct(&self) -> Option<DirectOwnership<'_>> {
        if self.is_progressing_here() {
            return Some(DirectOwnership::Nested);
        }
        if self.options.always_delay || !self.requires_external_driver() {
            return None;
        }
        let guard = match self.progress_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(DirectOwnership::Locked {
            _scope: ProgressScope::enter(self.id),
            _guard: guard,
        })
    }

    /// Submit `operation` for `request`, directly when this thread may own
    /// progress and through the delayed queue otherwise.
    pub(crate) fn submit(self: &Arc<Self>, request: Request, operation: Operation) {
        match self.claim_direct() {
            Some(_owner) => self.submit_now(request, operation),
            None => self.register_delayed(Deferred::Submit(DelayedSubmission { operation, request })),
        }
    }

    /// Close `connection`, settling `request` when the transport reports.
    pub(crate) fn close_connection(
        self: &Arc<Self>,
        connection: ConnectionHandle,
        mode: CloseMode,
        request: Request,
    ) {
        match self.claim_direct() {
            Some(_owner) => self.close_now(connection, mode, request),
            None => self.register_delayed(Deferred::Close {
                connection,
                mode,
                request,
            }),
        }
    }

    /// Run `f` on the progress-owning thread during the next progress step.
    pub(crate) fn schedule(&self, f: Box<dyn FnOnce() + Send>) {
        self.delayed.push(Deferred::Call(f));
        self.transport.signal();
    }

    /// Queue `entry` for the owner and wake it.
    pub(crate) fn register_delayed(&self, entry: Deferred) {
        if let Some(request) = entry.request() {
            request.mark_delayed();
            tracing::trace!(request = %request.id(), "submission delayed");
        }
        self.delayed.push(entry);
        metrics::inc_delayed();
        self.transport.signal();
    }

    fn submit_now(self: &Arc<Self>, request: Request, operation: Operation) {
        if self.skip_finished(&request) {
            request.release_transport(Some(operation.buffer));
            return;
        }
        tracing::trace!(
            request = %request.id(),
            operation = operation.kind.name(),
            len = operation.buffer.len(),
            "submitting to transport"
        );
        let completion = Completion::new(request.clone(), Arc::downgrade(self));
        let submission = self.transport.submit(operation, completion);
        self.accept_submission(request, submission);
    }

    fn close_now(self: &Arc<Self>, connection: ConnectionHandle, mode: CloseMode, request: Request) {
        if self.skip_finished(&request) {
            return;
        }
        tracing::trace!(request = %request.id(), ?connection, ?mode, "closing connection");
        let completion = Completion::new(request.clone(), Arc::downgrade(self));
        let submission = self.transport.close(connection, mode, completion);
        self.accept_submission(request, submission);
    }

    // A request cancelled or failed while queued is never handed to the
    // transport; after shutdown nothing is.
    fn skip_finished(&self, request: &Request) -> bool {
        if self.is_stopped() {
            request.cancel();
            return true;
        }
        if request.is_completed() {
            tracing::trace!(request = %request.id(), "skipping submission of finished request");
            return true;
        }
        false
    }

    fn accept_submission(&self, request: Request, submission: Submission) {
        match submission {
            Submission::InProgress(handle) => {
                self.outstanding.fetch_add(1, Ordering::AcqRel);
                request.mark_submitted(Some(handle));
            }
            Submission::Complete { result, buffer } => {
                request.mark_submitted(None);
                lock(&self.ready).push_back(ReadyCompletion {
                    request,
                    result,
                    buffer,
                });
            }
            Submission::Rejected { kind, buffer } => {
                request.release_transport(buffer);
                tracing::debug!(request = %request.id(), %kind, "transport rejected submission");
                request.finish(Err(RequestError::SubmissionFailed(kind)));
            }
        }
    }

    /// Settle `request` from a transport completion.
    pub(crate) fn deliver(
        engine: &Weak<Self>,
        request: &Request,
        result: Result<usize, TransportErrorKind>,
        buffer: Option<BytesMut>,
    ) {
        if let Some(engine) = engine.upgrade() {
            engine.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        request.release_transport(buffer);
        settle(request, result);
    }

    /// The transport dropped an accepted operation's completion without
    /// reporting: cancel the request synthetically.
    pub(crate) fn abandon(engine: &Weak<Self>, request: &Request) {
        if !request.is_in_transport() {
            return;
        }
        if let Some(engine) = engine.upgrade() {
            engine.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        request.release_transport(None);
        if request.cancel() {
            tracing::debug!(request = %request.id(), "transport dropped completion; request cancelled");
        }
    }

    /// Drain queued work, wait up to `grace` for outstanding operations, then
    /// cancel whatever is left. Returns the number of requests cancelled.
    pub(crate) fn shutdown(self: &Arc<Self>, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        if !self.is_progressing_here() {
            loop {
                let pending = self.outstanding() > 0 || !self.delayed.is_empty() || !lock(&self.ready).is_empty();
                let now = Instant::now();
                if !pending || now >= deadline {
                    break;
                }
                let slice = (deadline - now).min(self.options.blocking_slice);
                self.progress_blocking(Some(slice));
            }
        }
        self.stopped.store(true, Ordering::Release);

        let mut cancelled = 0;
        for entry in self.delayed.take_all() {
            match entry {
                Deferred::Submit(DelayedSubmission { operation, request }) => {
                    request.release_transport(Some(operation.buffer));
                    cancelled += usize::from(request.cancel());
                }
                Deferred::Close { request, .. } => cancelled += usize::from(request.cancel()),
                Deferred::Call(_) => {}
            }
        }
        cancelled += self.inflight.cancel_all();
        if cancelled > 0 {
            tracing::warn!(
                engine = self.id,
                cancelled,
                outstanding = self.outstanding(),
                "worker shut down with requests outstanding; cancelled"
            );
        }
        cancelled
    }
}

/// Map a transport status to the request outcome and finalise it.
fn settle(request: &Request, result: Result<usize, TransportErrorKind>) {
    let outcome: Outcome = result.map_err(|kind| match kind {
        TransportErrorKind::Canceled => RequestError::Cancelled,
        other => RequestError::Transport(other),
    });
    let connection_error = match outcome {
        Err(RequestError::Transport(kind)) if kind.is_connection_level() => Some(kind),
        _ => None,
    };
    if !request.finish(outcome) {
        tracing::debug!(request = %request.id(), "completion arrived after request finished");
    }
    if let Some(kind) = connection_error
        && let Some(endpoint) = request.endpoint_state()
    {
        endpoint.on_connection_error(kind);
    }
}

impl fmt::Debug for ProgressEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressEngine")
            .field("id", &self.id)
            .field("mode", &self.options.mode)
            .field("outstanding", &self.outstanding())
            .field("delayed", &self.delayed.len())
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}
