#![cfg(not(loom))]
//! Awaiting requests from tokio while [`drive`] progresses the worker.

mod common;

use std::{sync::Arc, time::Duration};

use common::{WAIT, payload, recv_buffer};
use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use ucxio::{ProgressMode, RequestError, driver::drive};
use ucxio_testing::{TestResult, loopback_pair};

#[tokio::test]
async fn awaiting_requests_on_a_driven_polling_worker() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let token = CancellationToken::new();
    let driver = tokio::spawn(drive(Arc::clone(&pair.worker), token.clone()));

    let recv = pair.server.stream_recv(recv_buffer(5))?;
    let send = pair.client.stream_send(payload(b"async"))?;

    assert_eq!(timeout(WAIT, send).await??, 5);
    assert_eq!(timeout(WAIT, recv.future()).await??, 5);
    assert_eq!(recv.take_buffer().as_deref(), Some(&b"async"[..]));

    token.cancel();
    timeout(WAIT, driver).await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_futures_resolve_across_runtime_threads() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let token = CancellationToken::new();
    let driver = tokio::spawn(drive(Arc::clone(&pair.worker), token.clone()));

    let recvs = (0..8)
        .map(|_| pair.server.tag_recv(recv_buffer(1), 3, u64::MAX))
        .collect::<Result<Vec<_>, _>>()?;
    let waits: Vec<_> = recvs.iter().map(|recv| tokio::spawn(recv.future())).collect();
    for i in 0..8_u8 {
        pair.client.tag_send(payload(&[i]), 3)?;
    }

    let outcomes = timeout(WAIT, join_all(waits)).await?;
    for outcome in outcomes {
        assert_eq!(outcome?, Ok(1));
    }

    token.cancel();
    timeout(WAIT, driver).await??;
    Ok(())
}

#[tokio::test]
async fn cancelled_request_resolves_its_future() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let token = CancellationToken::new();
    let driver = tokio::spawn(drive(Arc::clone(&pair.worker), token.clone()));

    let recv = pair.server.stream_recv(recv_buffer(4))?;
    let future = recv.future();
    pair.server.cancel_inflight();

    assert_eq!(timeout(WAIT, future).await?, Err(RequestError::Cancelled));
    token.cancel();
    timeout(WAIT, driver).await??;
    Ok(())
}

#[tokio::test]
async fn driver_exits_when_the_worker_shuts_down() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let driver = tokio::spawn(drive(Arc::clone(&pair.worker), CancellationToken::new()));
    tokio::time::sleep(Duration::from_millis(5)).await;

    pair.worker.shutdown();

    timeout(WAIT, driver).await??;
    Ok(())
}

#[tokio::test]
async fn driver_is_idle_for_threaded_workers() -> TestResult {
    let pair = loopback_pair(ProgressMode::Thread)?;

    timeout(WAIT, drive(Arc::clone(&pair.worker), CancellationToken::new())).await?;

    let send = pair.client.stream_send(payload(b"t"))?;
    assert_eq!(timeout(WAIT, send).await??, 1);
    Ok(())
}
