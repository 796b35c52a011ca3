#![cfg(not(loom))]
//! Request lifecycle across every progress mode: blocking waits, callbacks,
//! and the guard against waiting from inside a progress step.

mod common;

use std::{
    sync::{Arc, Mutex},
    thread,
};

use common::{WAIT, payload, recv_buffer};
use rstest::rstest;
use ucxio::{
    Error,
    ProgressMode,
    RequestError,
    RequestOptions,
    RequestState,
    TransportErrorKind,
    transport::OperationKind,
};
use ucxio_testing::{TestResult, loopback_pair, wait_until};

#[rstest]
#[case::blocking(ProgressMode::Blocking)]
#[case::polling(ProgressMode::Polling)]
#[case::thread(ProgressMode::Thread)]
#[case::thread_polling(ProgressMode::ThreadPolling)]
fn stream_round_trip_in_every_mode(#[case] mode: ProgressMode) -> TestResult {
    let pair = loopback_pair(mode)?;
    let recv = pair.server.stream_recv(recv_buffer(11))?;
    let send = pair.client.stream_send(payload(b"hello world"))?;

    assert_eq!(send.wait(Some(WAIT))?, 11);
    assert_eq!(recv.wait(Some(WAIT))?, 11);
    assert_eq!(recv.take_buffer().as_deref(), Some(&b"hello world"[..]));
    assert_eq!(recv.state(), RequestState::Completed);
    Ok(())
}

#[rstest]
#[case::blocking(ProgressMode::Blocking)]
#[case::thread(ProgressMode::Thread)]
fn stream_receives_reassemble_partial_sends(#[case] mode: ProgressMode) -> TestResult {
    let pair = loopback_pair(mode)?;
    let recv = pair.server.stream_recv(recv_buffer(6))?;
    pair.client.stream_send(payload(b"abc"))?;
    pair.client.stream_send(payload(b"defgh"))?;
    let tail = pair.server.stream_recv(recv_buffer(2))?;

    assert_eq!(recv.wait(Some(WAIT))?, 6);
    assert_eq!(tail.wait(Some(WAIT))?, 2);
    assert_eq!(recv.take_buffer().as_deref(), Some(&b"abcdef"[..]));
    assert_eq!(tail.take_buffer().as_deref(), Some(&b"gh"[..]));
    Ok(())
}

#[test]
fn waits_from_many_threads_see_the_same_outcome() -> TestResult {
    let pair = loopback_pair(ProgressMode::Blocking)?;
    let recv = pair.server.stream_recv(recv_buffer(4))?;
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let recv = recv.clone();
            thread::spawn(move || recv.wait(Some(WAIT)).map_err(|err| err.to_string()))
        })
        .collect();

    pair.client.stream_send(payload(b"data"))?;

    for waiter in waiters {
        let result = waiter.join().map_err(|_| "waiter panicked")?;
        assert_eq!(result, Ok(4));
    }
    Ok(())
}

#[rstest]
#[case::polling(ProgressMode::Polling)]
#[case::thread(ProgressMode::Thread)]
fn waiting_inside_a_callback_is_refused(#[case] mode: ProgressMode) -> TestResult {
    let pair = loopback_pair(mode)?;
    let pending = pair.server.stream_recv(recv_buffer(1))?;
    let seen: Arc<Mutex<Option<bool>>> = Arc::default();
    let slot = Arc::clone(&seen);
    let options = RequestOptions::new().with_callback(move |_, _| {
        let refused = matches!(pending.wait(None), Err(Error::ReentrantWait));
        *slot.lock().expect("callback slot") = Some(refused);
    });
    let send = pair
        .client
        .submit(OperationKind::StreamSend, payload(b"x"), options)?;
    send.wait(Some(WAIT))?;

    assert!(wait_until(&[&pair.worker], WAIT, || {
        seen.lock().expect("callback slot").is_some()
    }));
    assert_eq!(*seen.lock().expect("callback slot"), Some(true));
    Ok(())
}

#[test]
fn zero_length_operations_complete() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let recv = pair.server.stream_recv(recv_buffer(0))?;
    let send = pair.client.stream_send(payload(b""))?;

    assert!(send.is_empty());
    assert_eq!(send.wait(Some(WAIT))?, 0);
    assert_eq!(recv.wait(Some(WAIT))?, 0);
    Ok(())
}

#[test]
fn rejected_submission_errors_the_request() -> TestResult {
    let pair = loopback_pair(ProgressMode::Polling)?;
    let address = pair.worker.address()?;
    assert!(
        pair.fabric
            .fail_next_submission(&address, TransportErrorKind::NoResource)
    );

    let send = pair.client.stream_send(payload(b"refused"))?;

    assert_eq!(send.state(), RequestState::Errored);
    assert_eq!(
        send.outcome(),
        Some(Err(RequestError::SubmissionFailed(TransportErrorKind::NoResource)))
    );
    assert_eq!(send.take_buffer().as_deref(), Some(&b"refused"[..]));
    assert!(pair.client.is_alive());

    let retry = pair.client.stream_send(payload(b"ok"))?;
    assert_eq!(retry.wait(Some(WAIT))?, 2);
    Ok(())
}
