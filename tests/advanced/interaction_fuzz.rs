#![cfg(feature = "advanced-tests")]
//! Property-based tests for ordering guarantees of the loopback fabric.
//!
//! Random stream chunkings must reassemble into the sent byte sequence,
//! tagged messages must match per-tag in send order regardless of how sends
//! and receives interleave, and deferred submissions keep issue order.

use std::sync::Arc;

use bytes::BytesMut;
use proptest::prelude::*;
use rstest::rstest;
use ucxio::{
    ProgressMode,
    Request,
    RequestId,
    RequestState,
    WorkerConfig,
    transport::{FULL_TAG_MASK, loopback::LoopbackFabric},
};
use ucxio_testing::{LoopbackPair, connect_pair, context, loopback_pair, wait_until, worker_with};

const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

fn pair() -> LoopbackPair {
    loopback_pair(ProgressMode::Polling).expect("failed to build loopback pair")
}

fn received(request: &Request) -> Vec<u8> {
    let len = request.wait(Some(WAIT)).expect("request failed");
    request.take_buffer().expect("buffer missing")[..len].to_vec()
}

fn run_stream(sends: &[Vec<u8>], recv_chunk: usize) -> Vec<u8> {
    let pair = pair();
    let total: usize = sends.iter().map(Vec::len).sum();
    let mut recvs = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let len = recv_chunk.min(remaining);
        recvs.push(
            pair.server
                .stream_recv(BytesMut::zeroed(len))
                .expect("stream_recv failed"),
        );
        remaining -= len;
    }
    for data in sends {
        pair.client
            .stream_send(BytesMut::from(&data[..]))
            .expect("stream_send failed");
    }
    recvs.iter().flat_map(received).collect()
}

#[derive(Debug, Clone)]
enum Action {
    Send { tag: u64, byte: u8 },
    Recv { tag: u64 },
}

fn run_tags(actions: &[Action]) -> Vec<(u64, Vec<u8>)> {
    let pair = pair();
    let mut recvs = Vec::new();
    for action in actions {
        match action {
            Action::Send { tag, byte } => {
                pair.client
                    .tag_send(BytesMut::from(&[*byte][..]), *tag)
                    .expect("tag_send failed");
            }
            Action::Recv { tag } => recvs.push((
                *tag,
                pair.server
                    .tag_recv(BytesMut::zeroed(1), *tag, FULL_TAG_MASK)
                    .expect("tag_recv failed"),
            )),
        }
    }
    recvs
        .iter()
        .filter(|(_, request)| {
            for _ in 0..4 {
                pair.worker.progress_once();
            }
            request.is_completed()
        })
        .map(|(tag, request)| (*tag, received(request)))
        .collect()
}

fn expected_tags(actions: &[Action]) -> Vec<(u64, Vec<u8>)> {
    let mut sent: Vec<(u64, u8)> = actions
        .iter()
        .filter_map(|action| match action {
            Action::Send { tag, byte } => Some((*tag, *byte)),
            Action::Recv { .. } => None,
        })
        .collect();
    let mut out = Vec::new();
    for action in actions {
        if let Action::Recv { tag } = action
            && let Some(pos) = sent.iter().position(|(t, _)| t == tag)
        {
            let (_, byte) = sent.remove(pos);
            out.push((*tag, vec![byte]));
        }
    }
    out
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..3_u64, any::<u8>()).prop_map(|(tag, byte)| Action::Send { tag, byte }),
        (0..3_u64).prop_map(|tag| Action::Recv { tag }),
    ]
}

/// Issue each batch of stream sends through the delayed queue, cancelling
/// the batches flagged `true` before they drain. Returns the issued ids of
/// the surviving batches and the fabric's submission log.
fn run_delayed(batches: &[(usize, bool)]) -> (Vec<RequestId>, Vec<RequestId>) {
    let fabric = Arc::new(LoopbackFabric::new());
    let worker = worker_with(
        &context(&fabric),
        WorkerConfig::default()
            .with_progress_mode(ProgressMode::Polling)
            .with_delayed_submission(true),
    )
    .expect("failed to build worker");
    let pair = connect_pair(&worker, &worker).expect("failed to connect");
    let address = worker.address().expect("worker has no address");
    let before = fabric.submission_log(&address).len();

    let mut survivors = Vec::new();
    for &(count, doomed) in batches {
        let requests: Vec<Request> = (0..count)
            .map(|_| pair.client.stream_send(BytesMut::from(&b"d"[..])))
            .collect::<Result<_, _>>()
            .expect("stream_send failed");
        if doomed {
            assert_eq!(pair.client.cancel_inflight(), count);
        } else {
            assert!(wait_until(&[&worker], WAIT, || {
                requests.iter().all(Request::is_completed)
            }));
            survivors.extend(requests.iter().map(Request::id));
        }
        assert!(requests.iter().all(|request| request.transitions().contains(&RequestState::Delayed)));
    }
    (survivors, fabric.submission_log(&address)[before..].to_vec())
}

proptest! {
    #[test]
    fn stream_chunking_preserves_bytes(
        sends in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..16), 1..8),
        recv_chunk in 1_usize..12,
    ) {
        let expected: Vec<u8> = sends.concat();
        prop_assert_eq!(run_stream(&sends, recv_chunk), expected);
    }

    #[test]
    fn tagged_messages_match_in_send_order(
        actions in proptest::collection::vec(action_strategy(), 0..24),
    ) {
        prop_assert_eq!(run_tags(&actions), expected_tags(&actions));
    }

    #[test]
    fn delayed_submissions_keep_issue_order(
        batches in proptest::collection::vec((0_usize..5, any::<bool>()), 1..8),
    ) {
        let (survivors, log) = run_delayed(&batches);
        prop_assert_eq!(log, survivors);
    }

    #[test]
    fn cancelling_inflight_is_idempotent(pending in 0_usize..8) {
        let pair = pair();
        let recvs: Vec<_> = (0..pending)
            .map(|_| pair.server.stream_recv(BytesMut::zeroed(4)).expect("stream_recv failed"))
            .collect();
        prop_assert_eq!(pair.server.cancel_inflight(), pending);
        prop_assert_eq!(pair.server.cancel_inflight(), 0);
        for recv in &recvs {
            prop_assert_eq!(recv.state(), RequestState::Cancelled);
        }
    }
}

#[rstest]
#[case::single_byte_reads(vec![b"abc".to_vec(), b"de".to_vec()], 1)]
#[case::one_large_read(vec![b"abc".to_vec(), b"de".to_vec()], 64)]
fn stream_boundary_cases(#[case] sends: Vec<Vec<u8>>, #[case] recv_chunk: usize) {
    assert_eq!(run_stream(&sends, recv_chunk), sends.concat());
}
