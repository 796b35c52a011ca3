#![cfg(not(loom))]
//! Tests for `ucxio` metrics helpers and the counters requests emit.
//!
//! Everything runs on the test thread in polling mode so the thread-local
//! debugging recorder sees every emission.

mod common;

use std::sync::Arc;

use common::{WAIT, payload, recv_buffer};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use rstest::rstest;
use ucxio::{
    DELAYED_SUBMISSIONS,
    ENDPOINT_ERRORS,
    ProgressMode,
    REQUESTS_FINISHED,
    REQUESTS_ISSUED,
    RequestState,
    TransportErrorKind,
    WorkerConfig,
    transport::loopback::LoopbackFabric,
};
use ucxio_testing::{
    LoopbackPair,
    TestResult,
    capture_metrics,
    connect_pair,
    context,
    counter_value,
    loopback_pair,
    polling_pair,
    wait_until,
    worker_with,
};

#[test]
fn finished_counter_ignores_non_terminal_states() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::with_local_recorder(&recorder, || {
        ucxio::metrics::inc_finished(RequestState::Submitted);
        ucxio::metrics::inc_finished(RequestState::Cancelled);
    });

    let metrics = snapshotter.snapshot().into_vec();
    let cancelled = metrics.iter().any(|(k, _, _, v)| {
        k.key().name() == REQUESTS_FINISHED
            && k.key()
                .labels()
                .any(|l| l.key() == "outcome" && l.value() == "cancelled")
            && matches!(v, DebugValue::Counter(1))
    });
    assert!(cancelled, "cancelled outcome not recorded");
    assert_eq!(metrics.len(), 1, "non-terminal state recorded: {metrics:?}");
}

#[rstest]
fn requests_count_issue_and_outcome(polling_pair: LoopbackPair) -> TestResult {
    let pair = polling_pair;
    let (result, metrics) = capture_metrics(|| -> TestResult {
        let recv = pair.server.stream_recv(recv_buffer(2))?;
        pair.client.stream_send(payload(b"ok"))?.wait(Some(WAIT))?;
        recv.wait(Some(WAIT))?;
        let doomed = pair.server.stream_recv(recv_buffer(2))?;
        pair.server.cancel_inflight();
        assert!(doomed.is_completed());
        Ok(())
    });
    result?;

    assert_eq!(counter_value(&metrics, REQUESTS_ISSUED, ("operation", "stream_send")), 1);
    assert_eq!(counter_value(&metrics, REQUESTS_ISSUED, ("operation", "stream_recv")), 2);
    assert_eq!(counter_value(&metrics, REQUESTS_FINISHED, ("outcome", "completed")), 2);
    assert_eq!(counter_value(&metrics, REQUESTS_FINISHED, ("outcome", "cancelled")), 1);
    Ok(())
}

#[test]
fn delayed_submissions_are_counted() -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let worker = worker_with(
        &context(&fabric),
        WorkerConfig::default()
            .with_progress_mode(ProgressMode::Polling)
            .with_delayed_submission(true),
    )?;
    let pair = connect_pair(&worker, &worker)?;

    let (result, metrics) = capture_metrics(|| -> TestResult {
        for _ in 0..3 {
            pair.client.stream_send(payload(b"d"))?.wait(Some(WAIT))?;
        }
        Ok(())
    });
    result?;

    let delayed: u64 = metrics
        .iter()
        .filter(|metric| metric.name == DELAYED_SUBMISSIONS)
        .map(|metric| metric.value)
        .sum();
    assert_eq!(delayed, 3);
    Ok(())
}

#[test]
fn endpoint_errors_are_counted_once_per_connection() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let handle = pair.client.handle().ok_or("client has no connection")?;

    let (_, metrics) = capture_metrics(|| {
        pair.fabric.break_connection(handle, TransportErrorKind::Io);
        wait_until(&[&pair.worker], WAIT, || {
            !pair.client.is_alive() && !pair.server.is_alive()
        })
    });

    assert_eq!(counter_value(&metrics, ENDPOINT_ERRORS, ("kind", "io")), 2);
    Ok(())
}
