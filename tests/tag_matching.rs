#![cfg(not(loom))]
//! Tagged messaging over the loopback fabric: matching, masks, truncation,
//! and the rendezvous path for large messages.

mod common;

use std::sync::Arc;

use common::{WAIT, payload, recv_buffer, two_workers};
use rstest::rstest;
use ucxio::{
    Error,
    ProgressMode,
    RequestError,
    RequestState,
    TransportErrorKind,
    config::{ConfigMap, RNDV_THRESH},
    transport::{FULL_TAG_MASK, Tag, loopback::LoopbackFabric},
};
use ucxio_testing::{
    LoopbackPair,
    TestResult,
    connect_pair,
    context_with,
    polling_pair,
    wait_until,
    worker,
};

#[rstest]
fn posted_receive_gets_matching_message(polling_pair: LoopbackPair) -> TestResult {
    let pair = polling_pair;
    let other = pair.server.tag_recv(recv_buffer(8), 2, FULL_TAG_MASK)?;
    let recv = pair.server.tag_recv(recv_buffer(8), 1, FULL_TAG_MASK)?;
    pair.client.tag_send(payload(b"one"), 1)?;

    assert_eq!(recv.wait(Some(WAIT))?, 3);
    assert_eq!(recv.take_buffer().map(|buf| buf[..3].to_vec()), Some(b"one".to_vec()));
    assert_eq!(other.state(), RequestState::Submitted);
    Ok(())
}

#[rstest]
fn unexpected_messages_wait_for_a_receive(polling_pair: LoopbackPair) -> TestResult {
    let pair = polling_pair;
    pair.client.tag_send(payload(b"first"), 9)?.wait(Some(WAIT))?;
    pair.client.tag_send(payload(b"second"), 9)?.wait(Some(WAIT))?;

    let a = pair.server.tag_recv(recv_buffer(8), 9, FULL_TAG_MASK)?;
    let b = pair.server.tag_recv(recv_buffer(8), 9, FULL_TAG_MASK)?;

    assert_eq!(a.wait(Some(WAIT))?, 5);
    assert_eq!(b.wait(Some(WAIT))?, 6);
    assert_eq!(a.take_buffer().map(|buf| buf[..5].to_vec()), Some(b"first".to_vec()));
    assert_eq!(b.take_buffer().map(|buf| buf[..6].to_vec()), Some(b"second".to_vec()));
    Ok(())
}

#[rstest]
#[case::low_byte_wildcard(0x1200, 0xff00, 0x12ab, true)]
#[case::exact_miss(0x1200, FULL_TAG_MASK, 0x12ab, false)]
#[case::any(0, 0, 0xdead_beef, true)]
fn masks_select_which_tag_bits_match(
    polling_pair: LoopbackPair,
    #[case] tag: Tag,
    #[case] mask: Tag,
    #[case] sent: Tag,
    #[case] matches: bool,
) -> TestResult {
    let pair = polling_pair;
    let recv = pair.server.tag_recv(recv_buffer(4), tag, mask)?;
    pair.client.tag_send(payload(b"tag"), sent)?.wait(Some(WAIT))?;
    for _ in 0..4 {
        pair.worker.progress_once();
    }

    assert_eq!(recv.is_completed(), matches);
    Ok(())
}

#[rstest]
fn short_receive_buffer_truncates_without_failing_the_endpoint(
    polling_pair: LoopbackPair,
) -> TestResult {
    let pair = polling_pair;
    let recv = pair.server.tag_recv(recv_buffer(2), 4, FULL_TAG_MASK)?;
    pair.client.tag_send(payload(b"toolong"), 4)?;

    let err = recv.wait(Some(WAIT)).expect_err("message does not fit");

    assert!(matches!(
        err,
        Error::Request(RequestError::Transport(TransportErrorKind::MessageTruncated))
    ));
    assert_eq!(recv.state(), RequestState::Errored);
    assert!(pair.server.is_alive());
    Ok(())
}

#[test]
fn large_messages_wait_for_the_receiver() -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let mut options = ConfigMap::new();
    options.insert(RNDV_THRESH.to_owned(), "4".to_owned());
    let ctx = context_with(&fabric, options);
    let sender = worker(&ctx, ProgressMode::Polling)?;
    let receiver = worker(&ctx, ProgressMode::Polling)?;
    let pair = connect_pair(&sender, &receiver)?;

    let send = pair.client.tag_send(payload(b"rendezvous payload"), 77)?;
    for _ in 0..4 {
        sender.progress_once();
        receiver.progress_once();
    }
    assert_eq!(send.state(), RequestState::Submitted, "sender must wait for a match");
    assert!(send.operation_handle().is_some());

    let recv = pair.server.tag_recv(recv_buffer(32), 77, FULL_TAG_MASK)?;

    assert!(wait_until(&[&sender, &receiver], WAIT, || {
        send.is_completed() && recv.is_completed()
    }));
    assert_eq!(send.outcome(), Some(Ok(18)));
    assert_eq!(recv.outcome(), Some(Ok(18)));
    assert_eq!(send.take_buffer().as_deref(), Some(&b"rendezvous payload"[..]));
    Ok(())
}

#[test]
fn closing_the_sender_cancels_pending_rendezvous() -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let mut options = ConfigMap::new();
    options.insert(RNDV_THRESH.to_owned(), "0".to_owned());
    let ctx = context_with(&fabric, options);
    let sender = worker(&ctx, ProgressMode::Polling)?;
    let receiver = worker(&ctx, ProgressMode::Polling)?;
    let pair = connect_pair(&sender, &receiver)?;

    let send = pair.client.tag_send(payload(b"held"), 5)?;
    assert_eq!(send.state(), RequestState::Submitted);

    pair.client.close()?;

    assert_eq!(send.state(), RequestState::Cancelled);
    Ok(())
}

#[test]
fn flushed_close_completes_pending_rendezvous() -> TestResult {
    let fabric = Arc::new(LoopbackFabric::new());
    let mut options = ConfigMap::new();
    options.insert(RNDV_THRESH.to_owned(), "0".to_owned());
    let ctx = context_with(&fabric, options);
    let sender = worker(&ctx, ProgressMode::Polling)?;
    let receiver = worker(&ctx, ProgressMode::Polling)?;
    let pair = connect_pair(&sender, &receiver)?;
    let other = connect_pair(&sender, &receiver)?;

    let send = pair.client.tag_send(payload(b"kept"), 6)?;
    assert_eq!(send.state(), RequestState::Submitted);

    pair.client.close_flushed()?;

    assert_eq!(send.state(), RequestState::Completed);
    assert_eq!(send.outcome(), Some(Ok(4)));
    assert_eq!(send.take_buffer().as_deref(), Some(&b"kept"[..]));

    // Tag matching spans the worker, so the message still reaches a
    // receive posted through another endpoint.
    let recv = other.server.tag_recv(recv_buffer(8), 6, FULL_TAG_MASK)?;
    assert_eq!(recv.wait(Some(WAIT))?, 4);
    assert_eq!(recv.take_buffer().map(|buf| buf[..4].to_vec()), Some(b"kept".to_vec()));
    Ok(())
}

#[test]
fn tagged_messages_cross_workers() -> TestResult {
    let (_fabric, left, right) = two_workers(ProgressMode::Thread);
    let pair = connect_pair(&left, &right)?;

    let recv = pair.server.tag_recv(recv_buffer(16), 0xabc, FULL_TAG_MASK)?;
    let send = pair.client.tag_send(payload(b"across"), 0xabc)?;

    assert_eq!(send.wait(Some(WAIT))?, 6);
    assert_eq!(recv.wait(Some(WAIT))?, 6);
    assert_eq!(recv.take_buffer().map(|buf| buf[..6].to_vec()), Some(b"across".to_vec()));
    Ok(())
}
