//! Metric helpers for `ucxio`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::request::RequestState;

/// Name of the counter tracking issued requests.
pub const REQUESTS_ISSUED: &str = "ucxio_requests_issued_total";
/// Name of the counter tracking requests that reached a terminal state.
pub const REQUESTS_FINISHED: &str = "ucxio_requests_finished_total";
/// Name of the counter tracking submissions deferred to the progress thread.
pub const DELAYED_SUBMISSIONS: &str = "ucxio_delayed_submissions_total";
/// Name of the counter tracking connection errors seen by endpoints.
pub const ENDPOINT_ERRORS: &str = "ucxio_endpoint_errors_total";

/// Record a request issued for `operation`.
pub fn inc_issued(operation: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_ISSUED, "operation" => operation).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = operation;
}

/// Record a request reaching the terminal `state`.
pub fn inc_finished(state: RequestState) {
    let outcome = match state {
        RequestState::Completed => "completed",
        RequestState::Errored => "errored",
        RequestState::Cancelled => "cancelled",
        RequestState::Created | RequestState::Delayed | RequestState::Submitted => return,
    };
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_FINISHED, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a submission routed through the delayed queue.
pub fn inc_delayed() {
    #[cfg(feature = "metrics")]
    counter!(DELAYED_SUBMISSIONS).increment(1);
}

/// Record a connection error of `kind` on an endpoint.
pub fn inc_endpoint_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ENDPOINT_ERRORS, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}
