//! Boundary with the underlying communication library.
//!
//! A [`Transport`] is the process-wide library handle; it creates one
//! [`TransportWorker`] per [`Worker`](crate::worker::Worker). The worker side
//! is the transport context owned by a progress engine: operations are
//! submitted to it, and it reports completion by invoking the
//! [`Completion`] handed over at submission time, always from inside
//! [`TransportWorker::progress`].
//!
//! Thread rules: `submit`, `close`, `progress`, and `wait` are only called by
//! the thread that owns the worker's progress loop at that moment.
//! `signal`, `connect`, `address`, `listen`, and `close_listener` may be
//! called from any thread.

use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::{Bytes, BytesMut};

use crate::{
    config::Config,
    error::TransportErrorKind,
    progress::ProgressEngine,
    request::{Request, RequestId},
};

pub mod loopback;

/// Message tag used for tag-matched operations.
pub type Tag = u64;

/// Mask matching every bit of a [`Tag`].
pub const FULL_TAG_MASK: Tag = u64::MAX;

/// Opaque transport connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a transport-assigned identifier.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the raw identifier.
    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

/// Opaque handle of an operation the transport accepted but has not yet
/// finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationHandle(u64);

impl OperationHandle {
    /// Wrap a transport-assigned identifier.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the raw identifier.
    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

/// Handle of a listening socket created through [`TransportWorker::listen`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    id: u64,
    port: u16,
}

impl ListenerHandle {
    /// Create a handle for listener `id` bound to `port`.
    #[must_use]
    pub fn new(id: u64, port: u16) -> Self { Self { id, port } }

    /// Transport-assigned listener identifier.
    #[must_use]
    pub fn id(self) -> u64 { self.id }

    /// Port the listener is bound to.
    #[must_use]
    pub fn port(self) -> u16 { self.port }
}

/// Serialized address of a transport worker.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WorkerAddress(Bytes);

impl WorkerAddress {
    /// Wrap raw address bytes produced by a transport.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Raw address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    /// Number of address bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` if the address carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerAddress({} bytes)", self.0.len())
    }
}

/// Incoming connection announced to a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionRequest {
    id: u64,
    peer: Option<SocketAddr>,
}

impl ConnectionRequest {
    /// Create a connection request token.
    #[must_use]
    pub fn new(id: u64, peer: Option<SocketAddr>) -> Self { Self { id, peer } }

    /// Transport-assigned identifier of the pending connection.
    #[must_use]
    pub fn id(self) -> u64 { self.id }

    /// Address of the connecting peer, when the transport knows it.
    #[must_use]
    pub fn peer(self) -> Option<SocketAddr> { self.peer }
}

/// Where a new connection should lead.
#[derive(Clone, Debug)]
pub enum ConnectTarget {
    /// A listener reachable at a socket address.
    Socket(SocketAddr),
    /// An incoming request accepted by a listener.
    Request(ConnectionRequest),
    /// A remote worker identified by its address.
    Worker(WorkerAddress),
}

/// Callback the transport invokes when a connection fails.
pub type ErrorHandler = Arc<dyn Fn(TransportErrorKind) + Send + Sync>;

/// Callback the transport invokes when a listener receives a connection.
pub type ConnRequestHandler = Arc<dyn Fn(ConnectionRequest) + Send + Sync>;

/// Kind of data-movement operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Ordered byte-stream send.
    StreamSend,
    /// Ordered byte-stream receive filling the whole buffer.
    StreamRecv,
    /// Tagged message send.
    TagSend {
        /// Tag attached to the message.
        tag: Tag,
    },
    /// Tagged message receive.
    TagRecv {
        /// Tag to match.
        tag: Tag,
        /// Bits of the tag that must match.
        mask: Tag,
    },
    /// Connection close.
    Close,
}

impl OperationKind {
    /// Returns `true` for operations that move data to the peer.
    #[must_use]
    pub fn is_send(self) -> bool { matches!(self, Self::StreamSend | Self::TagSend { .. }) }

    /// Short operation name used in logs and metrics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::StreamSend => "stream_send",
            Self::StreamRecv => "stream_recv",
            Self::TagSend { .. } => "tag_send",
            Self::TagRecv { .. } => "tag_recv",
            Self::Close => "close",
        }
    }
}

/// One send or receive handed to the transport.
///
/// The buffer travels with the operation. The transport hands it back
/// through [`Completion::complete`] or the [`Submission`] result.
#[derive(Debug)]
pub struct Operation {
    /// Request this operation completes.
    pub request: RequestId,
    /// What to do.
    pub kind: OperationKind,
    /// Target connection.
    pub connection: ConnectionHandle,
    /// Data to send, or space to receive into. Its length is the operation
    /// length.
    pub buffer: BytesMut,
}

/// How a connection should be closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseMode {
    /// Drop outstanding operations and close immediately.
    Force,
    /// Flush outstanding sends before closing.
    Flush,
}

/// Result of handing an operation to the transport.
#[derive(Debug)]
pub enum Submission {
    /// The operation finished during submission. The completion handed to
    /// the transport is dropped without being invoked.
    Complete {
        /// Byte count or failure status.
        result: Result<usize, TransportErrorKind>,
        /// The operation buffer, if there was one.
        buffer: Option<BytesMut>,
    },
    /// The operation is outstanding. The transport keeps the completion and
    /// invokes it exactly once from a later progress call.
    InProgress(OperationHandle),
    /// The transport refused the operation.
    Rejected {
        /// Why the operation was refused.
        kind: TransportErrorKind,
        /// The operation buffer, if there was one.
        buffer: Option<BytesMut>,
    },
}

/// Completion context for one outstanding operation.
///
/// The transport invokes [`Completion::complete`] exactly once. Dropping an
/// accepted operation's completion without invoking it cancels the request.
pub struct Completion {
    request: Option<Request>,
    engine: Weak<ProgressEngine>,
}

impl Completion {
    pub(crate) fn new(request: Request, engine: Weak<ProgressEngine>) -> Self {
        Self {
            request: Some(request),
            engine,
        }
    }

    /// Identifier of the request this completion settles.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> { self.request.as_ref().map(Request::id) }

    /// Report the final status of the operation and return its buffer.
    pub fn complete(mut self, result: Result<usize, TransportErrorKind>, buffer: Option<BytesMut>) {
        if let Some(request) = self.request.take() {
            ProgressEngine::deliver(&self.engine, &request, result, buffer);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            ProgressEngine::abandon(&self.engine, &request);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("request", &self.request_id())
            .finish_non_exhaustive()
    }
}

/// Process-wide transport library handle.
pub trait Transport: Send + Sync + 'static {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Create a worker context configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns the transport status if the worker cannot be created.
    fn create_worker(
        &self,
        config: &Config,
    ) -> Result<Arc<dyn TransportWorker>, TransportErrorKind>;
}

/// Per-worker transport context driven by a progress engine.
pub trait TransportWorker: Send + Sync + 'static {
    /// Open a connection. `on_error` is `None` when error handling is
    /// disabled for the connection.
    ///
    /// # Errors
    ///
    /// Returns the transport status if the connection cannot be created.
    fn connect(
        &self,
        target: ConnectTarget,
        on_error: Option<ErrorHandler>,
    ) -> Result<ConnectionHandle, TransportErrorKind>;

    /// Submit one operation.
    fn submit(&self, operation: Operation, completion: Completion) -> Submission;

    /// Close a connection.
    fn close(
        &self,
        connection: ConnectionHandle,
        mode: CloseMode,
        completion: Completion,
    ) -> Submission;

    /// Perform one non-blocking progress step. Returns `true` if any work
    /// happened.
    fn progress(&self) -> bool;

    /// Block until the worker has work to progress, [`TransportWorker::signal`]
    /// is called, or `timeout` elapses. Returns `true` if woken by work or a
    /// signal.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Wake a thread blocked in [`TransportWorker::wait`].
    fn signal(&self);

    /// Address other workers can connect to.
    ///
    /// # Errors
    ///
    /// Returns the transport status if the address is unavailable.
    fn address(&self) -> Result<WorkerAddress, TransportErrorKind>;

    /// Start listening on `port` (0 picks a free port).
    ///
    /// # Errors
    ///
    /// Returns the transport status if the listener cannot be created.
    fn listen(
        &self,
        port: u16,
        on_request: ConnRequestHandler,
    ) -> Result<ListenerHandle, TransportErrorKind>;

    /// Stop a listener.
    fn close_listener(&self, listener: ListenerHandle);
}
