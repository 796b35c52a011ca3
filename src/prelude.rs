//! Optional convenience imports for common `ucxio` workflows.
//!
//! Prefer importing specialised APIs directly from their owning modules.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ucxio::prelude::*;
//!
//! fn open(context: &Arc<Context>) -> Result<Arc<Worker>> {
//!     Worker::new(context, WorkerConfig::default().with_progress_mode(ProgressMode::Polling))
//! }
//! ```

pub use crate::{
    context::Context,
    endpoint::Endpoint,
    error::{Error, RequestError, Result, TransportErrorKind},
    listener::Listener,
    progress::ProgressMode,
    request::{Outcome, Request, RequestOptions, RequestState},
    transport::{FULL_TAG_MASK, Tag},
    worker::{Worker, WorkerConfig},
};
