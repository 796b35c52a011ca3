#![doc(html_root_url = "https://docs.rs/ucxio/latest")]
//! Public API for the `ucxio` library.
//!
//! `ucxio` turns a progress-driven transport (a library that only advances
//! its operations when explicitly progressed) into requests that can be
//! waited on, called back, or awaited. It provides:
//!
//! - a [`Worker`] per transport context, progressed by one of four
//!   [`ProgressMode`]s;
//! - [`Endpoint`]s issuing stream and tagged send/receive [`Request`]s;
//! - connection-failure handling that cancels everything inflight;
//! - a [`FutureBridge`](bridge::FutureBridge) and a tokio
//!   [`driver`] for async callers.
//!
//! [`LoopbackFabric`](transport::loopback::LoopbackFabric) is an in-process
//! transport for tests and examples.

pub mod bridge;
pub mod config;
pub mod context;
mod delayed;
#[cfg(not(loom))]
pub mod driver;
pub mod endpoint;
pub mod error;
mod inflight;
pub mod listener;
pub mod metrics;
pub mod panic;
pub mod prelude;
pub mod progress;
pub mod request;
mod sync;
pub mod transport;
pub mod worker;

pub use context::Context;
pub use endpoint::Endpoint;
pub use error::{Error, RequestError, Result, TransportErrorKind};
pub use listener::Listener;
pub use crate::metrics::{DELAYED_SUBMISSIONS, ENDPOINT_ERRORS, REQUESTS_FINISHED, REQUESTS_ISSUED};
pub use progress::{BackoffConfig, ProgressMode};
pub use request::{Outcome, Request, RequestFuture, RequestId, RequestOptions, RequestState};
pub use worker::{Worker, WorkerConfig};
