//! Progress strategies and the engine that runs them.
//!
//! A worker's transport only advances when something calls into it. The
//! [`ProgressMode`] chosen at construction decides who does: the threads
//! waiting for results, an external poller, or a dedicated background
//! thread.

mod backoff;
mod engine;
mod strategy;
mod thread;

pub use backoff::BackoffConfig;
pub(crate) use engine::{EngineOptions, ProgressEngine};
pub use strategy::{ParseProgressModeError, ProgressMode};
pub(crate) use thread::ProgressThread;
