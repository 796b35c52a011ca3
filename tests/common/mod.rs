//! Shared utilities for integration tests.
//!
//! Buffer builders and a worker-pair fixture used across test binaries.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use ucxio::{ProgressMode, Worker, transport::loopback::LoopbackFabric};
use ucxio_testing::{context, worker};

/// Generous upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Send buffer holding `data`.
pub fn payload(data: &[u8]) -> BytesMut { BytesMut::from(data) }

/// Zeroed receive buffer of `len` bytes.
pub fn recv_buffer(len: usize) -> BytesMut { BytesMut::zeroed(len) }

/// Two workers in `mode` on one fabric.
#[expect(
    clippy::expect_used,
    reason = "worker creation failing must abort the test immediately"
)]
pub fn two_workers(mode: ProgressMode) -> (Arc<LoopbackFabric>, Arc<Worker>, Arc<Worker>) {
    let fabric = Arc::new(LoopbackFabric::new());
    let ctx = context(&fabric);
    let first = worker(&ctx, mode).expect("create first worker");
    let second = worker(&ctx, mode).expect("create second worker");
    (fabric, first, second)
}
