//! Registry of requests that have not yet reached a terminal state.
//!
//! `InflightRegistry` stores non-owning weak references to requests. Each
//! endpoint keeps one so it can cancel everything outstanding on connection
//! failure or close; the worker keeps another covering all of its endpoints.
//! A request removes itself on its terminal transition and again, as a
//! fallback, when its last handle drops.

use std::sync::Weak;

use dashmap::DashMap;

use crate::request::{Request, RequestId, RequestInner};

/// Concurrent set of outstanding requests keyed by [`RequestId`].
#[derive(Default)]
pub(crate) struct InflightRegistry(DashMap<RequestId, Weak<RequestInner>>);

impl InflightRegistry {
    /// Create an empty registry.
    #[must_use]
    pub(crate) fn new() -> Self { Self::default() }

    /// Track `request` until it finishes or is dropped.
    pub(crate) fn insert(&self, request: &Request) { self.0.insert(request.id(), request.downgrade()); }

    /// Stop tracking the request with `id`.
    pub(crate) fn remove(&self, id: RequestId) { self.0.remove(&id); }

    /// Number of tracked entries, counting requests that were dropped but
    /// not yet swept by [`Self::active`].
    #[must_use]
    pub(crate) fn len(&self) -> usize { self.0.len() }

    /// Drop entries whose request is gone, then return the live requests
    /// ordered by id.
    #[must_use]
    pub(crate) fn active(&self) -> Vec<Request> {
        let mut requests = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| {
            if let Some(inner) = weak.upgrade() {
                requests.push(Request::from_inner(inner));
                true
            } else {
                false
            }
        });
        requests.sort_by_key(Request::id);
        requests
    }

    /// Cancel every live, non-terminal request. Returns how many requests
    /// this call moved to `Cancelled`.
    ///
    /// Requests finishing concurrently keep their own outcome. Calling this
    /// again is harmless: already-terminal requests are skipped.
    pub(crate) fn cancel_all(&self) -> usize {
        // Collect first: a cancelled request unregisters itself, which would
        // deadlock against a live `retain` on the same shard.
        let cancelled = self
            .active()
            .into_iter()
            .filter(|request| request.cancel())
            .count();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled inflight requests");
        }
        cancelled
    }
}

impl std::fmt::Debug for InflightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightRegistry")
            .field("len", &self.0.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{Config, ConfigMap},
        progress::{EngineOptions, ProgressEngine, ProgressMode},
        request::{RequestOptions, RequestState},
        transport::{OperationKind, Transport, loopback::LoopbackFabric},
    };

    fn engine() -> Arc<ProgressEngine> {
        let fabric = LoopbackFabric::new();
        let transport = fabric
            .create_worker(&Config::from_vars(ConfigMap::new(), Vec::new()))
            .expect("create transport worker");
        ProgressEngine::new(
            transport,
            EngineOptions {
                mode: ProgressMode::Polling,
                always_delay: false,
                blocking_slice: std::time::Duration::from_millis(1),
            },
        )
    }

    fn request(engine: &Arc<ProgressEngine>) -> Request {
        Request::new(OperationKind::StreamSend, 0, engine, None, RequestOptions::new())
    }

    #[test]
    fn dropped_requests_leave_the_registry() {
        let engine = engine();
        let kept = request(&engine);
        let dropped = request(&engine);
        assert_eq!(engine.inflight().len(), 2);

        drop(dropped);

        let active: Vec<RequestId> = engine.inflight().active().iter().map(Request::id).collect();
        assert_eq!(active, vec![kept.id()]);
        assert_eq!(engine.inflight().len(), 1);
    }

    #[test]
    fn cancel_all_is_idempotent_and_ordered() {
        let engine = engine();
        let first = request(&engine);
        let second = request(&engine);

        assert_eq!(engine.inflight().cancel_all(), 2);
        assert_eq!(engine.inflight().cancel_all(), 0);
        assert_eq!(first.state(), RequestState::Cancelled);
        assert_eq!(second.state(), RequestState::Cancelled);
        assert!(first.id() < second.id());
        assert_eq!(engine.inflight().len(), 0);
    }
}
