//! Listening sockets that announce incoming connections.

use std::{fmt, sync::Arc};

use crate::{transport::ListenerHandle, worker::Worker};

/// A transport listener created by [`Worker::listen`].
///
/// The connection-request handler runs on the worker's progress-owning
/// thread. Dropping the listener stops it; the close itself happens on the
/// progress-owning thread.
pub struct Listener {
    worker: Arc<Worker>,
    handle: ListenerHandle,
}

impl Listener {
    pub(crate) fn new(worker: Arc<Worker>, handle: ListenerHandle) -> Self { Self { worker, handle } }

    /// The worker that accepts connections for this listener.
    #[must_use]
    pub fn worker(&self) -> &Arc<Worker> { &self.worker }

    /// Port the listener is bound to.
    #[must_use]
    pub fn port(&self) -> u16 { self.handle.port() }

    /// Transport handle of the listener.
    #[must_use]
    pub fn handle(&self) -> ListenerHandle { self.handle }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let handle = self.handle;
        let Ok(engine) = self.worker.engine() else {
            return;
        };
        let transport = Arc::clone(engine.transport());
        if engine.is_progressing_here() {
            transport.close_listener(handle);
        } else {
            engine.schedule(Box::new(move || transport.close_listener(handle)));
        }
        log::info!("listener on port {} closed", handle.port());
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("port", &self.port()).finish()
    }
}
