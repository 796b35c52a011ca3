//! In-process reference transport.
//!
//! [`LoopbackFabric`] connects workers living in the same process. Every
//! connection is a pair of ends, one per worker; data written to one end is
//! copied into the other. Completions are queued on the owning worker and
//! delivered from its `progress()` call, never from the submitting call.
//!
//! Behaviour worth knowing when testing against it:
//!
//! - Stream sends and tagged sends up to `RNDV_THRESH` bytes are eager: they
//!   complete during submission. Larger tagged sends use rendezvous and stay
//!   outstanding until a receive matches them.
//! - Tag matching is per worker, in arrival order.
//! - Closing a connection cancels its pending receives and rendezvous sends
//!   and reports `ConnectionReset` to the other end.
//! - [`LoopbackFabric::break_connection`] and
//!   [`LoopbackFabric::fail_next_submission`] inject faults, and
//!   [`LoopbackFabric::submission_log`] records the order operations reached
//!   a worker.

mod events;
mod matching;

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::{Bytes, BytesMut};

use self::{
    events::{Event, EventQueue},
    matching::{Payload, PostedRecv, TagMatcher, Unexpected, copy_message},
};
use super::{
    CloseMode,
    Completion,
    ConnRequestHandler,
    ConnectTarget,
    ConnectionHandle,
    ConnectionRequest,
    ErrorHandler,
    ListenerHandle,
    Operation,
    OperationHandle,
    OperationKind,
    Submission,
    Tag,
    Transport,
    TransportWorker,
    WorkerAddress,
};
use crate::{
    config::{Config, RNDV_THRESH},
    error::TransportErrorKind,
    request::RequestId,
    sync::lock,
};

const DEFAULT_RNDV_THRESH: usize = 8192;
const FIRST_EPHEMERAL_PORT: u16 = 40_000;

type Status = Result<usize, TransportErrorKind>;

/// A completion ready to be reported by the worker owning it.
struct Ready {
    completion: Completion,
    result: Status,
    buffer: Option<BytesMut>,
}

impl Ready {
    fn failed(completion: Completion, kind: TransportErrorKind, buffer: BytesMut) -> Self {
        Self {
            completion,
            result: Err(kind),
            buffer: Some(buffer),
        }
    }

    fn into_event(self) -> Event {
        let Self {
            completion,
            result,
            buffer,
        } = self;
        Box::new(move || completion.complete(result, buffer))
    }
}

struct PendingStreamRecv {
    buffer: BytesMut,
    filled: usize,
    completion: Completion,
}

struct Connection {
    worker: u64,
    peer: u64,
    on_error: Option<ErrorHandler>,
    failed: Option<TransportErrorKind>,
    inbound: BytesMut,
    stream_recvs: VecDeque<PendingStreamRecv>,
}

impl Connection {
    fn new(worker: u64, peer: u64, on_error: Option<ErrorHandler>) -> Self {
        Self {
            worker,
            peer,
            on_error,
            failed: None,
            inbound: BytesMut::new(),
            stream_recvs: VecDeque::new(),
        }
    }

    /// Move buffered stream bytes into pending receives, oldest first, and
    /// return the receives that are now full.
    fn fill_stream_recvs(&mut self) -> Vec<Ready> {
        let mut done = Vec::new();
        while let Some(front) = self.stream_recvs.front_mut() {
            let take = (front.buffer.len() - front.filled).min(self.inbound.len());
            let chunk = self.inbound.split_to(take);
            front.buffer[front.filled..front.filled + take].copy_from_slice(&chunk);
            front.filled += take;
            if front.filled < front.buffer.len() {
                break;
            }
            if let Some(recv) = self.stream_recvs.pop_front() {
                done.push(Ready {
                    completion: recv.completion,
                    result: Ok(recv.buffer.len()),
                    buffer: Some(recv.buffer),
                });
            }
        }
        done
    }
}

struct WorkerEntry {
    events: Arc<EventQueue>,
    rndv_thresh: usize,
    tags: TagMatcher<Completion>,
    fail_next: Option<TransportErrorKind>,
    log: Vec<RequestId>,
}

struct ListenerEntry {
    id: u64,
    worker: u64,
    handler: ConnRequestHandler,
}

struct FabricState {
    next_id: u64,
    next_port: u16,
    workers: HashMap<u64, WorkerEntry>,
    connections: HashMap<u64, Connection>,
    listeners: HashMap<u16, ListenerEntry>,
    conn_requests: HashMap<u64, u64>,
    // Completions released while the lock is held; dropped after unlock.
    graveyard: Vec<Completion>,
}

impl Default for FabricState {
    fn default() -> Self {
        Self {
            next_id: 1,
            next_port: FIRST_EPHEMERAL_PORT,
            workers: HashMap::new(),
            connections: HashMap::new(),
            listeners: HashMap::new(),
            conn_requests: HashMap::new(),
            graveyard: Vec::new(),
        }
    }
}

fn rejected(kind: TransportErrorKind, buffer: BytesMut) -> Submission {
    Submission::Rejected {
        kind,
        buffer: Some(buffer),
    }
}

fn complete(len: usize, buffer: BytesMut) -> Submission {
    Submission::Complete {
        result: Ok(len),
        buffer: Some(buffer),
    }
}

fn encode_address(worker: u64) -> WorkerAddress { WorkerAddress::new(worker.to_be_bytes().to_vec()) }

fn decode_address(address: &WorkerAddress) -> Option<u64> {
    let bytes: [u8; 8] = address.as_bytes().try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

impl FabricState {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn discard(&mut self, completion: Completion) { self.graveyard.push(completion); }

    fn push_event(&mut self, worker: u64, event: Event) {
        if let Some(entry) = self.workers.get(&worker) {
            entry.events.push(event);
        }
    }

    fn push_ready(&mut self, worker: u64, ready: Ready) {
        match self.workers.get(&worker) {
            Some(entry) => entry.events.push(ready.into_event()),
            None => self.graveyard.push(ready.completion),
        }
    }

    fn allocate_port(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX {
            let port = self.next_port;
            self.next_port = self.next_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            if port != 0 && !self.listeners.contains_key(&port) {
                return Some(port);
            }
        }
        None
    }

    fn connect(
        &mut self,
        worker: u64,
        target: ConnectTarget,
        on_error: Option<ErrorHandler>,
    ) -> Result<ConnectionHandle, TransportErrorKind> {
        let (remote_worker, announce) = match target {
            ConnectTarget::Request(request) => return self.accept(worker, request, on_error),
            ConnectTarget::Socket(addr) => {
                let listener = self
                    .listeners
                    .get(&addr.port())
                    .ok_or(TransportErrorKind::Unreachable)?;
                (listener.worker, Some(Arc::clone(&listener.handler)))
            }
            ConnectTarget::Worker(address) => {
                let id = decode_address(&address).ok_or(TransportErrorKind::InvalidParam)?;
                if !self.workers.contains_key(&id) {
                    return Err(TransportErrorKind::Unreachable);
                }
                (id, None)
            }
        };
        let local = self.next_id();
        let remote = self.next_id();
        self.connections
            .insert(local, Connection::new(worker, remote, on_error));
        self.connections
            .insert(remote, Connection::new(remote_worker, local, None));
        if let Some(handler) = announce {
            let request = ConnectionRequest::new(self.next_id(), None);
            self.conn_requests.insert(request.id(), remote);
            self.push_event(remote_worker, Box::new(move || handler(request)));
        }
        Ok(ConnectionHandle::new(local))
    }

    fn accept(
        &mut self,
        worker: u64,
        request: ConnectionRequest,
        on_error: Option<ErrorHandler>,
    ) -> Result<ConnectionHandle, TransportErrorKind> {
        let id = *self
            .conn_requests
            .get(&request.id())
            .ok_or(TransportErrorKind::InvalidParam)?;
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(TransportErrorKind::NotConnected)?;
        if conn.worker != worker {
            return Err(TransportErrorKind::InvalidParam);
        }
        self.conn_requests.remove(&request.id());
        conn.on_error = on_error;
        let pending_failure = conn.failed.zip(conn.on_error.clone());
        if let Some((kind, handler)) = pending_failure {
            self.push_event(worker, Box::new(move || handler(kind)));
        }
        Ok(ConnectionHandle::new(id))
    }

    fn submit(&mut self, worker: u64, operation: Operation, completion: Completion) -> Submission {
        let Operation {
            request,
            kind,
            connection,
            buffer,
        } = operation;
        let conn_id = connection.as_u64();
        let Some(entry) = self.workers.get_mut(&worker) else {
            self.discard(completion);
            return rejected(TransportErrorKind::NotConnected, buffer);
        };
        entry.log.push(request);
        if let Some(kind) = entry.fail_next.take() {
            self.discard(completion);
            return rejected(kind, buffer);
        }
        let failure = match self.connections.get(&conn_id) {
            None => Some(TransportErrorKind::NotConnected),
            Some(conn) if conn.worker != worker => Some(TransportErrorKind::InvalidParam),
            Some(conn) => conn.failed,
        };
        if let Some(kind) = failure {
            self.discard(completion);
            return rejected(kind, buffer);
        }
        let handle = self.next_id();
        match kind {
            OperationKind::StreamSend => {
                self.discard(completion);
                self.stream_send(conn_id, buffer)
            }
            OperationKind::StreamRecv => self.stream_recv(conn_id, handle, buffer, completion),
            OperationKind::TagSend { tag } => {
                self.tag_send(worker, conn_id, tag, handle, buffer, completion)
            }
            OperationKind::TagRecv { tag, mask } => {
                let posted = PostedRecv {
                    tag,
                    mask,
                    connection: conn_id,
                    buffer,
                    completion,
                };
                self.tag_recv(worker, handle, posted)
            }
            OperationKind::Close => {
                self.discard(completion);
                rejected(TransportErrorKind::InvalidParam, buffer)
            }
        }
    }

    fn stream_send(&mut self, conn_id: u64, buffer: BytesMut) -> Submission {
        let peer = self.connections.get(&conn_id).map(|conn| conn.peer);
        let Some(remote) = peer.and_then(|peer| self.connections.get_mut(&peer)) else {
            return rejected(TransportErrorKind::NotConnected, buffer);
        };
        remote.inbound.extend_from_slice(&buffer);
        let owner = remote.worker;
        for ready in remote.fill_stream_recvs() {
            self.push_ready(owner, ready);
        }
        complete(buffer.len(), buffer)
    }

    fn stream_recv(
        &mut self,
        conn_id: u64,
        handle: u64,
        mut buffer: BytesMut,
        completion: Completion,
    ) -> Submission {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            self.discard(completion);
            return rejected(TransportErrorKind::NotConnected, buffer);
        };
        if conn.stream_recvs.is_empty() && conn.inbound.len() >= buffer.len() {
            let data = conn.inbound.split_to(buffer.len());
            buffer.copy_from_slice(&data);
            self.discard(completion);
            return complete(buffer.len(), buffer);
        }
        conn.stream_recvs.push_back(PendingStreamRecv {
            buffer,
            filled: 0,
            completion,
        });
        let owner = conn.worker;
        for ready in conn.fill_stream_recvs() {
            self.push_ready(owner, ready);
        }
        Submission::InProgress(OperationHandle::new(handle))
    }

    fn tag_send(
        &mut self,
        worker: u64,
        conn_id: u64,
        tag: Tag,
        handle: u64,
        buffer: BytesMut,
        completion: Completion,
    ) -> Submission {
        let threshold = self
            .workers
            .get(&worker)
            .map_or(DEFAULT_RNDV_THRESH, |entry| entry.rndv_thresh);
        let target = self
            .connections
            .get(&conn_id)
            .and_then(|conn| self.connections.get(&conn.peer))
            .map(|peer| peer.worker);
        let Some(entry) = target.and_then(|target| self.workers.get_mut(&target)) else {
            self.discard(completion);
            return rejected(TransportErrorKind::Unreachable, buffer);
        };
        let len = buffer.len();
        if let Some(recv) = entry.tags.take_posted(tag) {
            let (result, received) = copy_message(recv.buffer, &buffer);
            if let Some(target) = target {
                self.push_ready(
                    target,
                    Ready {
                        completion: recv.completion,
                        result,
                        buffer: Some(received),
                    },
                );
            }
            self.discard(completion);
            return complete(len, buffer);
        }
        if len <= threshold {
            entry.tags.push_unexpected(Unexpected {
                tag,
                connection: conn_id,
                payload: Payload::Eager(Bytes::copy_from_slice(&buffer)),
            });
            self.discard(completion);
            return complete(len, buffer);
        }
        entry.tags.push_unexpected(Unexpected {
            tag,
            connection: conn_id,
            payload: Payload::Rendezvous {
                sender: worker,
                buffer,
                completion,
            },
        });
        Submission::InProgress(OperationHandle::new(handle))
    }

    fn tag_recv(&mut self, worker: u64, handle: u64, posted: PostedRecv<Completion>) -> Submission {
        let Some(entry) = self.workers.get_mut(&worker) else {
            self.discard(posted.completion);
            return rejected(TransportErrorKind::NotConnected, posted.buffer);
        };
        let Some(msg) = entry.tags.take_unexpected(posted.tag, posted.mask) else {
            entry.tags.post(posted);
            return Submission::InProgress(OperationHandle::new(handle));
        };
        let (result, buffer) = copy_message(posted.buffer, msg.payload.data());
        if let Payload::Rendezvous {
            sender,
            buffer: sent,
            completion,
        } = msg.payload
        {
            let len = sent.len();
            self.push_ready(
                sender,
                Ready {
                    completion,
                    result: Ok(len),
                    buffer: Some(sent),
                },
            );
        }
        self.discard(posted.completion);
        Submission::Complete {
            result,
            buffer: Some(buffer),
        }
    }

    /// Fail every operation still pending on connection `id` with `kind`.
    fn abort_operations(&mut self, id: u64, kind: TransportErrorKind) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let owner = conn.worker;
        let peer = conn.peer;
        let mut aborted: Vec<Ready> = conn
            .stream_recvs
            .drain(..)
            .map(|recv| Ready::failed(recv.completion, kind, recv.buffer))
            .collect();
        if let Some(entry) = self.workers.get_mut(&owner) {
            aborted.extend(
                entry
                    .tags
                    .remove_posted_for(id)
                    .into_iter()
                    .map(|recv| Ready::failed(recv.completion, kind, recv.buffer)),
            );
        }
        let peer_worker = self.connections.get(&peer).map(|conn| conn.worker);
        if let Some(entry) = peer_worker.and_then(|worker| self.workers.get_mut(&worker)) {
            aborted.extend(
                entry
                    .tags
                    .remove_rendezvous_from(id)
                    .into_iter()
                    .map(|(_, buffer, completion)| Ready::failed(completion, kind, buffer)),
            );
        }
        for ready in aborted {
            self.push_ready(owner, ready);
        }
    }

    /// Complete rendezvous sends still waiting on `id`'s peer, leaving
    /// copies of their data for the peer worker to match.
    fn flush_sends(&mut self, id: u64, peer: u64) {
        let peer_worker = self.connections.get(&peer).map(|conn| conn.worker);
        let Some(entry) = peer_worker.and_then(|worker| self.workers.get_mut(&worker)) else {
            return;
        };
        for (sender, buffer, completion) in entry.tags.flush_rendezvous_from(id) {
            self.push_ready(
                sender,
                Ready {
                    completion,
                    result: Ok(buffer.len()),
                    buffer: Some(buffer),
                },
            );
        }
    }

    /// Put connection `id` into the failed state, notify its error handler,
    /// then fail its pending operations.
    fn fail_connection(&mut self, id: u64, kind: TransportErrorKind) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.failed.is_some() {
            return;
        }
        conn.failed = Some(kind);
        let owner = conn.worker;
        if let Some(handler) = conn.on_error.clone() {
            self.push_event(owner, Box::new(move || handler(kind)));
        }
        self.abort_operations(id, kind);
    }

    fn close(&mut self, worker: u64, id: u64, mode: CloseMode) -> Result<(), TransportErrorKind> {
        let peer = match self.connections.get(&id) {
            None => return Err(TransportErrorKind::NotConnected),
            Some(conn) if conn.worker != worker => return Err(TransportErrorKind::InvalidParam),
            Some(conn) => conn.peer,
        };
        if mode == CloseMode::Flush {
            self.flush_sends(id, peer);
        }
        self.abort_operations(id, TransportErrorKind::Canceled);
        if let Some(conn) = self.connections.remove(&id) {
            self.conn_requests.retain(|_, target| *target != id);
            self.fail_connection(conn.peer, TransportErrorKind::ConnectionReset);
        }
        Ok(())
    }

    fn remove_worker(&mut self, worker: u64) {
        let owned: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            if let Some(conn) = self.connections.remove(&id) {
                self.graveyard
                    .extend(conn.stream_recvs.into_iter().map(|recv| recv.completion));
                self.fail_connection(conn.peer, TransportErrorKind::ConnectionReset);
            }
        }
        self.listeners.retain(|_, listener| listener.worker != worker);
        let connections = &self.connections;
        self.conn_requests
            .retain(|_, target| connections.contains_key(target));
        if let Some(mut entry) = self.workers.remove(&worker) {
            let (posted, unexpected) = entry.tags.drain();
            self.graveyard
                .extend(posted.into_iter().map(|recv| recv.completion));
            for msg in unexpected {
                if let Payload::Rendezvous {
                    sender,
                    buffer,
                    completion,
                } = msg.payload
                {
                    self.push_ready(
                        sender,
                        Ready::failed(completion, TransportErrorKind::Unreachable, buffer),
                    );
                }
            }
        }
    }
}

struct Fabric {
    state: Mutex<FabricState>,
}

impl Fabric {
    /// Run `f` on the locked state. Completions it orphaned are dropped after
    /// the lock is released, since dropping one may run user callbacks.
    fn with_state<R>(&self, f: impl FnOnce(&mut FabricState) -> R) -> R {
        let mut state = lock(&self.state);
        let result = f(&mut state);
        let orphans = mem::take(&mut state.graveyard);
        drop(state);
        drop(orphans);
        result
    }
}

/// In-process transport connecting workers of the same process.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use ucxio::{
///     config::{Config, ConfigMap},
///     context::Context,
///     transport::{Transport, loopback::LoopbackFabric},
/// };
///
/// let fabric = Arc::new(LoopbackFabric::new());
/// let context = Context::new(fabric.clone(), Config::from_vars(ConfigMap::new(), Vec::new()));
/// assert_eq!(context.transport().name(), "loopback");
/// ```
pub struct LoopbackFabric {
    fabric: Arc<Fabric>,
}

impl Default for LoopbackFabric {
    fn default() -> Self { Self::new() }
}

impl LoopbackFabric {
    /// Create an empty fabric.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fabric: Arc::new(Fabric {
                state: Mutex::new(FabricState::default()),
            }),
        }
    }

    /// Fail both ends of `connection` with `kind`, as if the network between
    /// them broke. Error handlers run and pending operations complete with
    /// `kind` during each owner's next progress step. Returns `false` if the
    /// connection does not exist.
    pub fn break_connection(&self, connection: ConnectionHandle, kind: TransportErrorKind) -> bool {
        self.fabric.with_state(|state| {
            let id = connection.as_u64();
            let Some(peer) = state.connections.get(&id).map(|conn| conn.peer) else {
                return false;
            };
            state.fail_connection(id, kind);
            state.fail_connection(peer, kind);
            true
        })
    }

    /// Make the next operation submitted on the worker at `worker` fail with
    /// `kind`. Returns `false` for an unknown worker.
    pub fn fail_next_submission(&self, worker: &WorkerAddress, kind: TransportErrorKind) -> bool {
        let Some(id) = decode_address(worker) else {
            return false;
        };
        self.fabric.with_state(|state| match state.workers.get_mut(&id) {
            Some(entry) => {
                entry.fail_next = Some(kind);
                true
            }
            None => false,
        })
    }

    /// Requests submitted on the worker at `worker`, in the order they
    /// reached the transport.
    #[must_use]
    pub fn submission_log(&self, worker: &WorkerAddress) -> Vec<RequestId> {
        let Some(id) = decode_address(worker) else {
            return Vec::new();
        };
        self.fabric.with_state(|state| {
            state
                .workers
                .get(&id)
                .map(|entry| entry.log.clone())
                .unwrap_or_default()
        })
    }

    /// Number of open connection ends across all workers.
    #[must_use]
    pub fn connection_count(&self) -> usize { self.fabric.with_state(|state| state.connections.len()) }
}

impl fmt::Debug for LoopbackFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (workers, connections) = self
            .fabric
            .with_state(|state| (state.workers.len(), state.connections.len()));
        f.debug_struct("LoopbackFabric")
            .field("workers", &workers)
            .field("connections", &connections)
            .finish()
    }
}

impl Transport for LoopbackFabric {
    fn name(&self) -> &str { "loopback" }

    fn create_worker(&self, config: &Config) -> Result<Arc<dyn TransportWorker>, TransportErrorKind> {
        let rndv_thresh = config
            .get_parsed(RNDV_THRESH)
            .unwrap_or(DEFAULT_RNDV_THRESH);
        let events = Arc::new(EventQueue::default());
        let id = self.fabric.with_state(|state| {
            let id = state.next_id();
            state.workers.insert(
                id,
                WorkerEntry {
                    events: Arc::clone(&events),
                    rndv_thresh,
                    tags: TagMatcher::default(),
                    fail_next: None,
                    log: Vec::new(),
                },
            );
            id
        });
        Ok(Arc::new(LoopbackWorker {
            id,
            fabric: Arc::clone(&self.fabric),
            events,
        }))
    }
}

struct LoopbackWorker {
    id: u64,
    fabric: Arc<Fabric>,
    events: Arc<EventQueue>,
}

impl TransportWorker for LoopbackWorker {
    fn connect(
        &self,
        target: ConnectTarget,
        on_error: Option<ErrorHandler>,
    ) -> Result<ConnectionHandle, TransportErrorKind> {
        self.fabric
            .with_state(|state| state.connect(self.id, target, on_error))
    }

    fn submit(&self, operation: Operation, completion: Completion) -> Submission {
        self.fabric
            .with_state(|state| state.submit(self.id, operation, completion))
    }

    fn close(&self, connection: ConnectionHandle, mode: CloseMode, completion: Completion) -> Submission {
        self.fabric.with_state(|state| {
            if let Err(kind) = state.close(self.id, connection.as_u64(), mode) {
                state.discard(completion);
                return Submission::Rejected { kind, buffer: None };
            }
            if mode == CloseMode::Force {
                state.discard(completion);
                return Submission::Complete {
                    result: Ok(0),
                    buffer: None,
                };
            }
            // Queued behind the flushed sends so those settle first.
            let handle = state.next_id();
            state.push_ready(
                self.id,
                Ready {
                    completion,
                    result: Ok(0),
                    buffer: None,
                },
            );
            Submission::InProgress(OperationHandle::new(handle))
        })
    }

    fn progress(&self) -> bool {
        let events = self.events.take();
        let progressed = !events.is_empty();
        for event in events {
            event();
        }
        progressed
    }

    fn wait(&self, timeout: Option<Duration>) -> bool { self.events.wait(timeout) }

    fn signal(&self) { self.events.signal(); }

    fn address(&self) -> Result<WorkerAddress, TransportErrorKind> { Ok(encode_address(self.id)) }

    fn listen(
        &self,
        port: u16,
        on_request: ConnRequestHandler,
    ) -> Result<ListenerHandle, TransportErrorKind> {
        self.fabric.with_state(|state| {
            let port = if port == 0 {
                state.allocate_port().ok_or(TransportErrorKind::NoResource)?
            } else if state.listeners.contains_key(&port) {
                return Err(TransportErrorKind::Busy);
            } else {
                port
            };
            let id = state.next_id();
            state.listeners.insert(
                port,
                ListenerEntry {
                    id,
                    worker: self.id,
                    handler: on_request,
                },
            );
            Ok(ListenerHandle::new(id, port))
        })
    }

    fn close_listener(&self, listener: ListenerHandle) {
        self.fabric.with_state(|state| {
            if state
                .listeners
                .get(&listener.port())
                .is_some_and(|entry| entry.id == listener.id())
            {
                state.listeners.remove(&listener.port());
            }
        });
    }
}

impl Drop for LoopbackWorker {
    fn drop(&mut self) { self.fabric.with_state(|state| state.remove_worker(self.id)); }
}
