//! Workers and connected endpoints on an in-process fabric.

use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use rstest::fixture;
use ucxio::{
    Context,
    Endpoint,
    Error,
    Listener,
    ProgressMode,
    Result,
    Worker,
    WorkerConfig,
    config::{Config, ConfigMap},
    transport::{ConnectionRequest, loopback::LoopbackFabric},
};

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Context over `fabric` with default options and no environment overrides.
#[must_use]
pub fn context(fabric: &Arc<LoopbackFabric>) -> Arc<Context> { context_with(fabric, ConfigMap::new()) }

/// Context over `fabric` with `options` applied on top of the defaults.
#[must_use]
pub fn context_with(fabric: &Arc<LoopbackFabric>, options: ConfigMap) -> Arc<Context> {
    let transport = Arc::clone(fabric);
    Context::new(transport, Config::from_vars(options, Vec::new()))
}

/// Worker in `mode` with a short shutdown grace period.
///
/// # Errors
///
/// Propagates [`Worker::new`] failures.
pub fn worker(context: &Arc<Context>, mode: ProgressMode) -> Result<Arc<Worker>> {
    worker_with(
        context,
        WorkerConfig::default()
            .with_progress_mode(mode)
            .with_shutdown_timeout(Duration::from_millis(100)),
    )
}

/// Worker built from an explicit configuration.
///
/// # Errors
///
/// Propagates [`Worker::new`] failures.
pub fn worker_with(context: &Arc<Context>, config: WorkerConfig) -> Result<Arc<Worker>> {
    Worker::new(context, config)
}

/// Poll `condition` until it holds or `timeout` expires, progressing
/// `workers` in between. Progressing is a no-op for workers that own a
/// progress thread. Returns the final value of `condition`.
pub fn wait_until<F>(workers: &[&Arc<Worker>], timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        let mut progressed = false;
        for worker in workers {
            progressed |= worker.progress_once();
        }
        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Both ends of one connection plus the listener that accepted it.
///
/// Fields drop in declaration order, so endpoints close before the listener.
#[derive(Debug)]
pub struct Connected {
    /// The connecting side.
    pub client: Endpoint,
    /// The accepting side.
    pub server: Endpoint,
    /// Listener on the server worker.
    pub listener: Listener,
}

/// Connect `client` to a fresh listener on `server`, with error handling
/// enabled on both ends.
///
/// # Errors
///
/// Returns listener, connect, and accept failures, and
/// [`Error::InvalidAddress`] when no connection request reaches the
/// listener in time.
pub fn connect_pair(client: &Arc<Worker>, server: &Arc<Worker>) -> Result<Connected> {
    let pending: Arc<Mutex<Vec<ConnectionRequest>>> = Arc::default();
    let sink = Arc::clone(&pending);
    let listener = server.listen(0, move |request| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    })?;
    let client_ep = Endpoint::connect(client, "127.0.0.1", listener.port(), true)?;
    let mut request = None;
    wait_until(&[client, server], ACCEPT_TIMEOUT, || {
        request = pending.lock().unwrap_or_else(PoisonError::into_inner).pop();
        request.is_some()
    });
    let request = request.ok_or_else(|| {
        Error::InvalidAddress(format!("no connection request on port {}", listener.port()))
    })?;
    let server_ep = Endpoint::accept(&listener, request, true)?;
    Ok(Connected {
        client: client_ep,
        server: server_ep,
        listener,
    })
}

/// A single worker connected to itself through a listener.
#[derive(Debug)]
pub struct LoopbackPair {
    /// The connecting side.
    pub client: Endpoint,
    /// The accepting side.
    pub server: Endpoint,
    /// Listener that accepted `server`.
    pub listener: Listener,
    /// Worker both endpoints run on.
    pub worker: Arc<Worker>,
    /// Fabric carrying the connection, for fault injection.
    pub fabric: Arc<LoopbackFabric>,
}

/// Build a [`LoopbackPair`] whose worker runs in `mode`.
///
/// # Errors
///
/// Propagates worker creation and [`connect_pair`] failures.
pub fn loopback_pair(mode: ProgressMode) -> Result<LoopbackPair> {
    let fabric = Arc::new(LoopbackFabric::new());
    let worker = worker(&context(&fabric), mode)?;
    let Connected {
        client,
        server,
        listener,
    } = connect_pair(&worker, &worker)?;
    Ok(LoopbackPair {
        client,
        server,
        listener,
        worker,
        fabric,
    })
}

/// rstest fixture yielding a polling-mode [`LoopbackPair`].
#[fixture]
pub fn polling_pair() -> LoopbackPair {
    match loopback_pair(ProgressMode::Polling) {
        Ok(pair) => pair,
        Err(err) => panic!("failed to build loopback pair: {err}"),
    }
}
