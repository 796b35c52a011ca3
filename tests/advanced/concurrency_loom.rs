#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for the future bridge using loom.
//!
//! A request's bridge is settled from whichever thread performs the terminal
//! transition while the consumer polls from its own scheduler. `loom`
//! explores the interleavings to ensure exactly one settlement wins and the
//! consumer is always woken.

use loom::{future::block_on, model, thread};
use ucxio::bridge::{Cancelled, FutureBridge};

#[test]
fn resolve_and_cancel_race_settles_once() {
    model(|| {
        let bridge = FutureBridge::new();
        let resolver = bridge.clone();
        let canceller = bridge.clone();

        let t1 = thread::spawn(move || resolver.resolve(1_u32));
        let t2 = thread::spawn(move || canceller.cancel());
        let resolved = t1.join().expect("resolver thread panicked");
        let cancelled = t2.join().expect("canceller thread panicked");

        assert!(resolved ^ cancelled, "exactly one settlement must win");
        match bridge.try_take() {
            Some(Ok(1)) => assert!(resolved),
            Some(Err(Cancelled)) => assert!(cancelled),
            other => panic!("unexpected bridge state: {other:?}"),
        }
    });
}

#[test]
fn cross_thread_resolution_wakes_the_consumer() {
    model(|| {
        let bridge = FutureBridge::new();
        let producer = bridge.clone();

        let handle = thread::spawn(move || {
            producer.resolve(7_u32);
        });
        let outcome = block_on(bridge);
        handle.join().expect("producer thread panicked");

        assert_eq!(outcome, Ok(7));
    });
}
