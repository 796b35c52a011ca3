//! Process-wide transport state.
//!
//! A [`Context`] wraps the transport library handle and the resolved
//! [`Config`]. Create it once before any worker and share it by `Arc`.
//! Every [`Worker`](crate::worker::Worker) keeps its context alive, so the
//! library is torn down only after the last worker has been released.

use std::{fmt, sync::Arc};

use crate::{config::Config, transport::Transport};

/// Explicit process-wide transport state injected into workers.
pub struct Context {
    transport: Arc<dyn Transport>,
    config: Config,
}

impl Context {
    /// Initialise a context for `transport` with `config`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Arc<Self> {
        tracing::info!(transport = transport.name(), "transport context initialised");
        Arc::new(Self { transport, config })
    }

    /// The transport library handle.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> { &self.transport }

    /// The resolved transport options.
    #[must_use]
    pub fn config(&self) -> &Config { &self.config }
}

impl Drop for Context {
    fn drop(&mut self) {
        tracing::info!(transport = self.transport.name(), "transport context released");
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .finish()
    }
}
