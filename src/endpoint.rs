//! Connections and the operations issued on them.
//!
//! An [`Endpoint`] owns one transport connection, its error status, and the
//! registry of requests still running on it. When the transport reports a
//! connection failure, the endpoint records the first error, cancels every
//! inflight request, and runs the close callback once. With error handling
//! enabled, later operations fail fast without reaching the transport.

use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    sync::{Arc, Mutex},
};

use bytes::BytesMut;

use crate::{
    error::{Error, RequestError, Result, TransportErrorKind},
    inflight::InflightRegistry,
    listener::Listener,
    metrics,
    panic::run_guarded,
    request::{Request, RequestOptions},
    sync::lock,
    transport::{
        CloseMode,
        ConnectTarget,
        ConnectionHandle,
        ConnectionRequest,
        ErrorHandler,
        Operation,
        OperationKind,
        Tag,
        WorkerAddress,
    },
    worker::Worker,
};

/// Callback run once when the connection fails.
pub type CloseCallback = Box<dyn FnOnce(TransportErrorKind) + Send>;

/// Connection state shared with the transport's error handler and with the
/// endpoint's requests.
pub(crate) struct EndpointState {
    peer: String,
    error_handling: bool,
    status: Mutex<Option<TransportErrorKind>>,
    inflight: InflightRegistry,
    close_callback: Mutex<Option<CloseCallback>>,
}

impl EndpointState {
    fn new(peer: String, error_handling: bool) -> Self {
        Self {
            peer,
            error_handling,
            status: Mutex::new(None),
            inflight: InflightRegistry::new(),
            close_callback: Mutex::new(None),
        }
    }

    pub(crate) fn inflight(&self) -> &InflightRegistry { &self.inflight }

    fn status(&self) -> Option<TransportErrorKind> { *lock(&self.status) }

    /// Handle a connection failure. Only the first error is recorded and
    /// acted on.
    pub(crate) fn on_connection_error(&self, kind: TransportErrorKind) {
        if !self.error_handling {
            log::debug!("ignoring {kind} on {}: error handling disabled", self.peer);
            return;
        }
        {
            let mut status = lock(&self.status);
            if status.is_some() {
                return;
            }
            *status = Some(kind);
        }
        metrics::inc_endpoint_errors(kind.as_str());
        if kind.is_peer_disconnect() {
            log::debug!("endpoint {} closed: {kind}", self.peer);
        } else {
            log::error!("endpoint {} failed: {kind}", self.peer);
        }
        let cancelled = self.inflight.cancel_all();
        if cancelled > 0 {
            tracing::debug!(peer = %self.peer, cancelled, "cancelled requests after connection error");
        }
        let callback = lock(&self.close_callback).take();
        if let Some(callback) = callback {
            run_guarded("close callback", || callback(kind));
        }
    }
}

/// One connection to a remote worker.
///
/// Dropping the endpoint closes the connection in force mode.
pub struct Endpoint {
    worker: Arc<Worker>,
    connection: Mutex<Option<ConnectionHandle>>,
    state: Arc<EndpointState>,
}

impl Endpoint {
    /// Connect to a listener at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolve`] if `host` cannot be resolved,
    /// [`Error::InvalidAddress`] if it resolves to nothing,
    /// [`Error::NotInitialized`] if the worker has shut down, and
    /// [`Error::Transport`] if the transport refuses the connection.
    pub fn connect(worker: &Arc<Worker>, host: &str, port: u16, error_handling: bool) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                host: host.to_owned(),
                source,
            })?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("{host}:{port}")))?;
        Self::create(worker, ConnectTarget::Socket(addr), describe_socket(addr), error_handling)
    }

    /// Accept an incoming connection announced to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the worker has shut down and
    /// [`Error::Transport`] if the transport refuses the connection.
    pub fn accept(listener: &Listener, request: ConnectionRequest, error_handling: bool) -> Result<Self> {
        let peer = request
            .peer()
            .map_or_else(|| format!("request {}", request.id()), describe_socket);
        Self::create(listener.worker(), ConnectTarget::Request(request), peer, error_handling)
    }

    /// Connect directly to the worker at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for an empty address,
    /// [`Error::NotInitialized`] if the worker has shut down, and
    /// [`Error::Transport`] if the transport refuses the connection.
    pub fn from_worker_address(
        worker: &Arc<Worker>,
        address: &WorkerAddress,
        error_handling: bool,
    ) -> Result<Self> {
        if address.is_empty() {
            return Err(Error::InvalidAddress("worker address not initialized".into()));
        }
        let peer = format!("worker address ({} bytes)", address.len());
        Self::create(worker, ConnectTarget::Worker(address.clone()), peer, error_handling)
    }

    fn create(
        worker: &Arc<Worker>,
        target: ConnectTarget,
        peer: String,
        error_handling: bool,
    ) -> Result<Self> {
        let engine = worker.engine()?;
        let state = Arc::new(EndpointState::new(peer, error_handling));
        let on_error = error_handling.then(|| {
            let weak = Arc::downgrade(&state);
            let handler: ErrorHandler = Arc::new(move |kind| {
                if let Some(state) = weak.upgrade() {
                    state.on_connection_error(kind);
                }
            });
            handler
        });
        let connection = engine
            .transport()
            .connect(target, on_error)
            .map_err(Error::Transport)?;
        log::debug!("endpoint connected to {}", state.peer);
        Ok(Self {
            worker: Arc::clone(worker),
            connection: Mutex::new(Some(connection)),
            state,
        })
    }

    /// The worker this endpoint runs on.
    #[must_use]
    pub fn worker(&self) -> &Arc<Worker> { &self.worker }

    /// Transport connection handle, `None` after close.
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> { *lock(&self.connection) }

    /// Whether connection failures are tracked for this endpoint.
    #[must_use]
    pub fn error_handling(&self) -> bool { self.state.error_handling }

    /// First connection error observed, `None` while healthy.
    #[must_use]
    pub fn status(&self) -> Option<TransportErrorKind> { self.state.status() }

    /// Returns `false` once the connection has failed. Always `true` when
    /// error handling is disabled.
    #[must_use]
    pub fn is_alive(&self) -> bool { !self.state.error_handling || self.state.status().is_none() }

    /// Fail if the connection is in an error state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] with the recorded error when error
    /// handling is enabled and the connection has failed.
    pub fn raise_on_error(&self) -> Result<()> {
        match self.state.status() {
            Some(kind) if self.state.error_handling => Err(Error::Connection(kind)),
            _ => Ok(()),
        }
    }

    /// Run `callback` once, from the connection-error handler, when the
    /// connection fails. Replaces any previous callback.
    pub fn set_close_callback<F>(&self, callback: F)
    where
        F: FnOnce(TransportErrorKind) + Send + 'static,
    {
        *lock(&self.state.close_callback) = Some(Box::new(callback));
    }

    /// Number of requests on this endpoint that have not finished.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.state
            .inflight
            .active()
            .iter()
            .filter(|request| !request.is_completed())
            .count()
    }

    /// Cancel every unfinished request on this endpoint. Returns how many
    /// were cancelled.
    pub fn cancel_inflight(&self) -> usize { self.state.inflight.cancel_all() }

    /// Send `buffer` on the ordered byte stream.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::submit`].
    pub fn stream_send(&self, buffer: BytesMut) -> Result<Request> {
        self.submit(OperationKind::StreamSend, buffer, RequestOptions::default())
    }

    /// Receive exactly `buffer.len()` bytes from the ordered byte stream.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::submit`].
    pub fn stream_recv(&self, buffer: BytesMut) -> Result<Request> {
        self.submit(OperationKind::StreamRecv, buffer, RequestOptions::default())
    }

    /// Send `buffer` as one message tagged `tag`.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::submit`].
    pub fn tag_send(&self, buffer: BytesMut, tag: Tag) -> Result<Request> {
        self.submit(OperationKind::TagSend { tag }, buffer, RequestOptions::default())
    }

    /// Receive one message whose tag matches `tag` on the bits set in
    /// `mask` (use [`FULL_TAG_MASK`](crate::transport::FULL_TAG_MASK) for
    /// exact matching).
    ///
    /// # Errors
    ///
    /// See [`Endpoint::submit`].
    pub fn tag_recv(&self, buffer: BytesMut, tag: Tag, mask: Tag) -> Result<Request> {
        self.submit(OperationKind::TagRecv { tag, mask }, buffer, RequestOptions::default())
    }

    /// Issue an operation of `kind` with `options` attached.
    ///
    /// The request is submitted to the transport immediately when the
    /// calling thread may own progress, and through the worker's delayed
    /// queue otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the worker has shut down or the
    /// endpoint is closed, [`Error::Connection`] if the connection has
    /// failed and error handling is enabled, and [`Error::Transport`] with
    /// [`TransportErrorKind::InvalidParam`] for [`OperationKind::Close`].
    /// Nothing reaches the transport in any of these cases.
    pub fn submit(
        &self,
        kind: OperationKind,
        buffer: BytesMut,
        options: RequestOptions,
    ) -> Result<Request> {
        if kind == OperationKind::Close {
            return Err(Error::Transport(TransportErrorKind::InvalidParam));
        }
        let engine = self.worker.engine()?;
        let connection = self.handle().ok_or(Error::NotInitialized("endpoint"))?;
        self.raise_on_error()?;
        let request = Request::new(kind, buffer.len(), engine, Some(&self.state), options);
        engine.submit(
            request.clone(),
            Operation {
                request: request.id(),
                kind,
                connection,
                buffer,
            },
        );
        Ok(request)
    }

    /// Close the connection in force mode.
    ///
    /// The close is handed to the progress-owning thread and awaited, up to
    /// the worker's shutdown timeout, unless called from inside a progress
    /// step. Requests still unfinished afterwards are cancelled. Closing an
    /// already closed endpoint does nothing.
    ///
    /// # Errors
    ///
    /// Returns the close request's failure, or [`Error::Timeout`] if the
    /// transport did not confirm the close in time. The endpoint is closed
    /// either way.
    pub fn close(&self) -> Result<()> { self.close_with(CloseMode::Force) }

    /// Close the connection after flushing sends still waiting for the peer
    /// to receive them.
    ///
    /// Flushed sends complete successfully and their data stays deliverable
    /// to the peer worker. Otherwise this behaves like [`Endpoint::close`].
    ///
    /// # Errors
    ///
    /// As for [`Endpoint::close`].
    pub fn close_flushed(&self) -> Result<()> { self.close_with(CloseMode::Flush) }

    fn close_with(&self, mode: CloseMode) -> Result<()> {
        let Some(connection) = lock(&self.connection).take() else {
            return Ok(());
        };
        let result = match self.worker.engine() {
            Ok(engine) => {
                let request = Request::new(
                    OperationKind::Close,
                    0,
                    engine,
                    None,
                    RequestOptions::default(),
                );
                engine.close_connection(connection, mode, request.clone());
                if engine.is_progressing_here() {
                    Ok(())
                } else {
                    match request.wait(Some(self.worker.config().shutdown_timeout())) {
                        Ok(_) | Err(Error::Request(RequestError::Cancelled)) => Ok(()),
                        Err(err) => Err(err),
                    }
                }
            }
            // The worker tore the transport down already.
            Err(_) => Ok(()),
        };
        let cancelled = self.state.inflight.cancel_all();
        log::debug!(
            "endpoint {} closed ({mode:?}), {cancelled} requests cancelled",
            self.state.peer
        );
        result
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("closing endpoint {} failed: {err}", self.state.peer);
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("peer", &self.state.peer)
            .field("handle", &self.handle())
            .field("status", &self.status())
            .field("error_handling", &self.state.error_handling)
            .finish_non_exhaustive()
    }
}

fn describe_socket(addr: SocketAddr) -> String { addr.to_string() }
