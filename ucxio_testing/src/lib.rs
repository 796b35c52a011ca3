//! Test support for `ucxio`.
//!
//! Builds workers and connected endpoint pairs on a
//! [`LoopbackFabric`](ucxio::transport::loopback::LoopbackFabric), captures
//! `log` output, and records metrics emitted while running a closure.
//!
//! ```rust
//! use ucxio::ProgressMode;
//! use ucxio_testing::{TestResult, loopback_pair};
//!
//! fn example() -> TestResult {
//!     let pair = loopback_pair(ProgressMode::Polling)?;
//!     let send = pair.client.stream_send(b"hi"[..].into())?;
//!     assert_eq!(send.wait(None)?, 2);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

pub mod logging;
pub mod loopback;
pub mod metrics;

pub use logging::{LoggerHandle, logger};
pub use loopback::{
    Connected,
    LoopbackPair,
    connect_pair,
    context,
    context_with,
    loopback_pair,
    polling_pair,
    wait_until,
    worker,
    worker_with,
};
pub use crate::metrics::{CapturedMetric, capture_metrics, counter_value};

/// Result type for tests that bubble up failures with `?`.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
