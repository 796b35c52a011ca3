#![cfg(not(loom))]
//! Delayed submission preserves issue order and never submits requests
//! that finished while queued.

mod common;

use std::{sync::Arc, thread};

use common::{WAIT, payload, recv_buffer};
use rstest::rstest;
use ucxio::{
    ProgressMode,
    Request,
    RequestId,
    RequestState,
    WorkerConfig,
    transport::loopback::LoopbackFabric,
};
use ucxio_testing::{TestResult, connect_pair, context, wait_until, worker_with};

fn always_delayed(mode: ProgressMode) -> WorkerConfig {
    WorkerConfig::default()
        .with_progress_mode(mode)
        .with_delayed_submission(true)
}

#[rstest]
#[case::polling(ProgressMode::Polling)]
#[case::thread(ProgressMode::Thread)]
fn delayed_submissions_reach_the_transport_in_issue_order(#[case] mode: ProgressMode) -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let worker = worker_with(&context(&fabric), always_delayed(mode))?;
    let pair = connect_pair(&worker, &worker)?;
    let address = worker.address()?;
    let before = fabric.submission_log(&address).len();

    let requests = (0..8_u8)
        .map(|i| pair.client.stream_send(payload(&[i])))
        .collect::<Result<Vec<_>, _>>()?;
    for request in &requests {
        request.wait(Some(WAIT))?;
        assert!(request.transitions().contains(&RequestState::Delayed));
    }

    let issued: Vec<RequestId> = requests.iter().map(Request::id).collect();
    let log = fabric.submission_log(&address);
    assert_eq!(log[before..], issued[..]);
    Ok(())
}

#[test]
fn stream_bytes_arrive_in_issue_order_across_threads() -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let worker = worker_with(&context(&fabric), always_delayed(ProgressMode::Thread))?;
    let pair = connect_pair(&worker, &worker)?;
    let client = Arc::new(pair.client);

    let recv = pair.server.stream_recv(recv_buffer(64))?;
    let producers: Vec<_> = (0..4_u8)
        .map(|id| {
            let client = Arc::clone(&client);
            thread::spawn(move || -> ucxio::Result<()> {
                for seq in 0..16_u8 {
                    client.stream_send(payload(&[id, seq]))?.wait(Some(WAIT))?;
                }
                Ok(())
            })
        })
        .collect();
    for producer in producers {
        producer.join().map_err(|_| "producer panicked")??;
    }
    let rest = pair.server.stream_recv(recv_buffer(64))?;

    assert_eq!(recv.wait(Some(WAIT))?, 64);
    assert_eq!(rest.wait(Some(WAIT))?, 64);
    let mut bytes = recv.take_buffer().ok_or("first buffer missing")?.to_vec();
    bytes.extend_from_slice(&rest.take_buffer().ok_or("second buffer missing")?);

    for id in 0..4_u8 {
        let seqs: Vec<u8> = bytes
            .chunks(2)
            .filter(|chunk| chunk[0] == id)
            .map(|chunk| chunk[1])
            .collect();
        assert_eq!(seqs, (0..16).collect::<Vec<u8>>(), "producer {id} reordered");
    }
    Ok(())
}

#[test]
fn requests_cancelled_while_queued_are_never_submitted() -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let worker = worker_with(&context(&fabric), always_delayed(ProgressMode::Polling))?;
    let pair = connect_pair(&worker, &worker)?;
    let address = worker.address()?;

    let doomed = pair.client.stream_send(payload(b"never"))?;
    let kept = pair.client.stream_send(payload(b"sent"))?;
    assert_eq!(doomed.state(), RequestState::Delayed);
    assert_eq!(pair.client.inflight_count(), 2);

    assert_eq!(pair.client.cancel_inflight(), 2);
    let retried = pair.client.stream_send(payload(b"again"))?;
    assert!(wait_until(&[&worker], WAIT, || retried.is_completed()));

    let log = fabric.submission_log(&address);
    assert!(!log.contains(&doomed.id()));
    assert!(!log.contains(&kept.id()));
    assert!(log.contains(&retried.id()));
    assert_eq!(doomed.state(), RequestState::Cancelled);
    assert_eq!(doomed.take_buffer().as_deref(), Some(&b"never"[..]));
    Ok(())
}
