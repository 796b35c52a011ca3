//! Handle and state machine for one send or receive operation.
//!
//! A [`Request`] is created by an [`Endpoint`](crate::endpoint::Endpoint)
//! and lives until its last holder releases it: the caller's handle, the
//! transport's [`Completion`](crate::transport::Completion), or a queued
//! delayed submission. Inflight registries only observe it through weak
//! references.
//!
//! Exactly one terminal transition happens per request. The outcome is then
//! delivered through every consumption path the caller chose: a blocking
//! [`Request::wait`], the optional user callback, and an attached
//! [`FutureBridge`].

mod state;

use std::{
    any::Any,
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    sync::{
        Arc,
        Condvar,
        Mutex,
        Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::BytesMut;
pub use state::{Outcome, RequestState};

use crate::{
    bridge::FutureBridge,
    endpoint::EndpointState,
    error::{Error, RequestError, Result},
    inflight::InflightRegistry,
    metrics,
    panic::run_guarded,
    progress::{ProgressEngine, ProgressMode},
    sync::{lock, wait, wait_timeout},
    transport::{OperationHandle, OperationKind},
};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

// Interval a waiter parks between progress attempts when it drives a polling
// worker itself.
const POLL_PARK: Duration = Duration::from_micros(50);

// Longest a blocking-mode waiter parks while another thread owns progress.
// Finishing the request wakes it sooner.
const HANDOFF_PARK: Duration = Duration::from_millis(1);

/// Process-unique, monotonically increasing request identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self { Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "RequestId({})", self.0) }
}

/// Opaque data handed back to the request callback.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Callback invoked once with the final outcome.
pub type RequestCallback = Box<dyn FnOnce(Outcome, Option<UserData>) + Send>;

/// Optional extras attached to a request when it is issued.
#[derive(Default)]
pub struct RequestOptions {
    callback: Option<RequestCallback>,
    user_data: Option<UserData>,
}

impl RequestOptions {
    /// Options with no callback and no user data.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Invoke `callback` with the final outcome.
    ///
    /// The callback runs on whichever thread performs the terminal
    /// transition, normally the progress-owning thread. Panics are caught
    /// and logged.
    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Outcome, Option<UserData>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Attach opaque data passed to the callback.
    #[must_use]
    pub fn with_user_data(mut self, data: UserData) -> Self {
        self.user_data = Some(data);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("callback", &self.callback.is_some())
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

struct Slot {
    state: RequestState,
    transitions: Vec<RequestState>,
    outcome: Option<Outcome>,
    buffer: Option<BytesMut>,
    callback: Option<RequestCallback>,
    user_data: Option<UserData>,
    bridge: Option<FutureBridge<Outcome>>,
    handle: Option<OperationHandle>,
}

impl Slot {
    fn advance(&mut self, state: RequestState) {
        self.state = state;
        self.transitions.push(state);
    }
}

pub(crate) struct RequestInner {
    id: RequestId,
    kind: OperationKind,
    len: usize,
    slot: Mutex<Slot>,
    finished: Condvar,
    engine: Weak<ProgressEngine>,
    endpoint: Option<Weak<EndpointState>>,
    registry: Weak<InflightRegistry>,
    in_transport: AtomicBool,
}

impl RequestInner {
    fn unregister(&self) {
        if let Some(endpoint) = self.endpoint.as_ref().and_then(Weak::upgrade) {
            endpoint.inflight().remove(self.id);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Drop for RequestInner {
    fn drop(&mut self) { self.unregister(); }
}

/// Shared handle to one operation.
///
/// Cloning is cheap; every clone observes the same state.
#[derive(Clone)]
pub struct Request(Arc<RequestInner>);

impl Request {
    /// Allocate a request and register it with the worker and, when given,
    /// the endpoint's inflight registry.
    pub(crate) fn new(
        kind: OperationKind,
        len: usize,
        engine: &Arc<ProgressEngine>,
        endpoint: Option<&Arc<EndpointState>>,
        options: RequestOptions,
    ) -> Self {
        let RequestOptions {
            callback,
            user_data,
        } = options;
        let request = Self(Arc::new(RequestInner {
            id: RequestId::next(),
            kind,
            len,
            slot: Mutex::new(Slot {
                state: RequestState::Created,
                transitions: vec![RequestState::Created],
                outcome: None,
                buffer: None,
                callback,
                user_data,
                bridge: None,
                handle: None,
            }),
            finished: Condvar::new(),
            engine: Arc::downgrade(engine),
            endpoint: endpoint.map(Arc::downgrade),
            registry: Arc::downgrade(engine.inflight()),
            in_transport: AtomicBool::new(false),
        }));
        engine.inflight().insert(&request);
        if let Some(endpoint) = endpoint {
            endpoint.inflight().insert(&request);
        }
        metrics::inc_issued(kind.name());
        tracing::trace!(request = %request.id(), operation = kind.name(), len, "request created");
        request
    }

    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self { Self(inner) }

    pub(crate) fn downgrade(&self) -> Weak<RequestInner> { Arc::downgrade(&self.0) }

    /// Unique identifier of this request.
    #[must_use]
    pub fn id(&self) -> RequestId { self.0.id }

    /// Operation this request performs.
    #[must_use]
    pub fn kind(&self) -> OperationKind { self.0.kind }

    /// Operation length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len }

    /// Returns `true` for zero-length operations.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.len == 0 }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState { lock(&self.0.slot).state }

    /// Every state this request has been in, oldest first.
    #[must_use]
    pub fn transitions(&self) -> Vec<RequestState> { lock(&self.0.slot).transitions.clone() }

    /// Returns `true` once a terminal state has been reached.
    #[must_use]
    pub fn is_completed(&self) -> bool { self.state().is_terminal() }

    /// Final outcome, once terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> { lock(&self.0.slot).outcome }

    /// Transport handle of the operation while it is outstanding.
    #[must_use]
    pub fn operation_handle(&self) -> Option<OperationHandle> { lock(&self.0.slot).handle }

    /// Take the operation buffer back once the transport has released it.
    ///
    /// For receives the first [`Outcome`] bytes hold the received data.
    /// After a cancellation the buffer only returns when the transport's
    /// late completion arrives.
    #[must_use]
    pub fn take_buffer(&self) -> Option<BytesMut> { lock(&self.0.slot).buffer.take() }

    /// Block until the request reaches a terminal state or `timeout` expires.
    ///
    /// When the worker has no progress thread the waiting thread drives
    /// progress itself; otherwise it sleeps until the progress thread
    /// finishes the request. Expiry abandons the wait only: the request keeps
    /// running and completes or cancels in the background.
    ///
    /// # Errors
    ///
    /// Returns the request's error outcome wrapped in [`Error::Request`],
    /// [`Error::Timeout`] if `timeout` expires first, or
    /// [`Error::ReentrantWait`] when called from inside a progress step on
    /// the thread that would have to make the progress.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome.map_err(Error::from);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout(self.id()));
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            match self.0.engine.upgrade() {
                Some(engine) if engine.requires_external_driver() => {
                    if engine.is_progressing_here() {
                        return Err(Error::ReentrantWait);
                    }
                    let slice = clamp(remaining, engine.blocking_slice());
                    let progressed = engine
                        .mode()
                        .advance_blocking_until(&engine, Some(slice), || self.is_completed());
                    if !progressed {
                        let cap = match engine.mode() {
                            ProgressMode::Blocking | ProgressMode::Thread => HANDOFF_PARK,
                            ProgressMode::Polling | ProgressMode::ThreadPolling => POLL_PARK,
                        };
                        self.park(Some(clamp(remaining, cap)));
                    }
                }
                Some(engine) => {
                    if engine.is_progress_thread() {
                        return Err(Error::ReentrantWait);
                    }
                    drop(engine);
                    self.park(remaining);
                }
                None => self.park(remaining),
            }
        }
    }

    /// Attach a future bridge and return an awaitable for the outcome.
    ///
    /// The returned future does not drive progress; pair it with a progress
    /// thread or [`crate::driver::drive`]. Only one consumer should await a
    /// request: repeated calls before completion share one bridge.
    #[must_use]
    pub fn future(&self) -> RequestFuture {
        let bridge = {
            let mut slot = lock(&self.0.slot);
            if let Some(outcome) = slot.outcome {
                let bridge = FutureBridge::new();
                settle(&bridge, outcome);
                bridge
            } else {
                slot.bridge.get_or_insert_with(FutureBridge::new).clone()
            }
        };
        RequestFuture {
            request: self.clone(),
            bridge,
        }
    }

    fn park(&self, timeout: Option<Duration>) {
        let slot = lock(&self.0.slot);
        if slot.state.is_terminal() {
            return;
        }
        let _slot = match timeout {
            Some(timeout) => wait_timeout(&self.0.finished, slot, timeout),
            None => wait(&self.0.finished, slot),
        };
    }

    pub(crate) fn endpoint_state(&self) -> Option<Arc<EndpointState>> {
        self.0.endpoint.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn is_in_transport(&self) -> bool { self.0.in_transport.load(Ordering::Acquire) }

    pub(crate) fn mark_delayed(&self) {
        let mut slot = lock(&self.0.slot);
        if slot.state == RequestState::Created {
            slot.advance(RequestState::Delayed);
        }
    }

    /// Record that the transport accepted the operation. `handle` is `None`
    /// when the transport finished it during submission.
    pub(crate) fn mark_submitted(&self, handle: Option<OperationHandle>) {
        let mut slot = lock(&self.0.slot);
        if handle.is_some() {
            self.0.in_transport.store(true, Ordering::Release);
        }
        slot.handle = handle;
        if !slot.state.is_terminal() {
            slot.advance(RequestState::Submitted);
        }
    }

    /// Called when the transport gives up its completion context.
    pub(crate) fn release_transport(&self, buffer: Option<BytesMut>) {
        self.0.in_transport.store(false, Ordering::Release);
        let mut slot = lock(&self.0.slot);
        slot.handle = None;
        if buffer.is_some() {
            slot.buffer = buffer;
        }
    }

    /// Perform the terminal transition. Returns `false` if the request was
    /// already terminal, in which case nothing happens.
    pub(crate) fn finish(&self, outcome: Outcome) -> bool {
        let state = RequestState::for_outcome(&outcome);
        let (callback, user_data, bridge) = {
            let mut slot = lock(&self.0.slot);
            if slot.state.is_terminal() {
                return false;
            }
            slot.advance(state);
            slot.outcome = Some(outcome);
            (slot.callback.take(), slot.user_data.clone(), slot.bridge.take())
        };
        self.0.finished.notify_all();
        self.0.unregister();
        tracing::trace!(request = %self.id(), operation = self.0.kind.name(), %state, "request finished");
        metrics::inc_finished(state);
        if let Some(bridge) = bridge {
            settle(&bridge, outcome);
        }
        if let Some(callback) = callback {
            run_guarded("request callback", || callback(outcome, user_data));
        }
        true
    }

    /// Force the request into `Cancelled` unless it is already terminal.
    pub(crate) fn cancel(&self) -> bool { self.finish(Err(RequestError::Cancelled)) }
}

fn clamp(remaining: Option<Duration>, cap: Duration) -> Duration {
    remaining.map_or(cap, |remaining| remaining.min(cap))
}

fn settle(bridge: &FutureBridge<Outcome>, outcome: Outcome) {
    if matches!(outcome, Err(RequestError::Cancelled)) {
        bridge.cancel();
    } else {
        bridge.resolve(outcome);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("len", &self.0.len)
            .field("state", &self.state())
            .finish()
    }
}

/// Awaitable outcome of a [`Request`].
///
/// Resolves with the byte count, the error, or [`RequestError::Cancelled`]
/// when the request was cancelled.
#[must_use = "futures do nothing unless awaited"]
pub struct RequestFuture {
    request: Request,
    bridge: FutureBridge<Outcome>,
}

impl RequestFuture {
    /// The request this future observes.
    pub fn request(&self) -> &Request { &self.request }
}

impl Future for RequestFuture {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.bridge.poll_settled(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl IntoFuture for Request {
    type Output = Outcome;
    type IntoFuture = RequestFuture;

    fn into_future(self) -> Self::IntoFuture { self.future() }
}
