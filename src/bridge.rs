//! Single-resolution bridge between a completion callback and an awaiting
//! task.
//!
//! A [`FutureBridge`] starts pending and is settled by exactly one of
//! [`FutureBridge::resolve`] or [`FutureBridge::cancel`]; later calls are
//! no-ops. Producers may settle the bridge from any thread. The consumer
//! awaits a clone of the bridge from its own scheduler; waking goes through
//! the stored [`Waker`], so the scheduler decides how a cross-thread wake
//! reaches its task.

#[cfg(not(loom))]
use std::sync::{Arc, Mutex};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

#[cfg(loom)]
use loom::sync::{Arc, Mutex};
use thiserror::Error;

/// Returned to the consumer when the bridge was cancelled instead of
/// resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("future bridge cancelled")]
pub struct Cancelled;

enum Resolution<T> {
    Pending,
    Ready(Result<T, Cancelled>),
    Observed,
}

struct BridgeSlot<T> {
    resolution: Resolution<T>,
    waker: Option<Waker>,
}

/// Cloneable single-resolution handle.
///
/// Every clone refers to the same cell. Awaiting a clone yields the stored
/// outcome once; polling again after that returns [`Poll::Pending`] forever,
/// so only one consumer should await.
///
/// # Examples
///
/// ```
/// use ucxio::bridge::FutureBridge;
///
/// let bridge = FutureBridge::new();
/// let consumer = bridge.clone();
/// assert!(bridge.resolve(7_u32));
/// assert!(!bridge.cancel());
/// assert_eq!(consumer.try_take(), Some(Ok(7)));
/// ```
pub struct FutureBridge<T>(Arc<Mutex<BridgeSlot<T>>>);

impl<T> Clone for FutureBridge<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T> Default for FutureBridge<T> {
    fn default() -> Self { Self::new() }
}

impl<T> std::fmt::Debug for FutureBridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureBridge")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> FutureBridge<T> {
    /// Create a pending bridge.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(BridgeSlot {
            resolution: Resolution::Pending,
            waker: None,
        })))
    }

    fn settle(&self, value: Result<T, Cancelled>) -> bool {
        let waker = {
            let mut slot = match self.0.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !matches!(slot.resolution, Resolution::Pending) {
                return false;
            }
            slot.resolution = Resolution::Ready(value);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Store `value` and wake the consumer.
    ///
    /// Returns `false` if the bridge was already settled, in which case the
    /// value is dropped.
    pub fn resolve(&self, value: T) -> bool { self.settle(Ok(value)) }

    /// Settle the bridge as cancelled and wake the consumer.
    ///
    /// Returns `false` if the bridge was already settled.
    pub fn cancel(&self) -> bool { self.settle(Err(Cancelled)) }

    /// Returns `true` once the bridge has been resolved or cancelled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        let slot = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        !matches!(slot.resolution, Resolution::Pending)
    }

    /// Take the outcome without awaiting, if one is stored and not yet
    /// observed.
    #[must_use]
    pub fn try_take(&self) -> Option<Result<T, Cancelled>> {
        let mut slot = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut slot.resolution, Resolution::Observed) {
            Resolution::Ready(value) => Some(value),
            other => {
                slot.resolution = other;
                None
            }
        }
    }

    /// Poll for the outcome, registering `cx`'s waker while pending.
    pub fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<Result<T, Cancelled>> {
        let mut slot = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut slot.resolution, Resolution::Observed) {
            Resolution::Ready(value) => Poll::Ready(value),
            other => {
                slot.resolution = other;
                match &slot.waker {
                    Some(existing) if existing.will_wake(cx.waker()) => {}
                    _ => slot.waker = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Future for FutureBridge<T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_settled(cx)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        task::Wake,
        thread,
    };

    use futures::executor::block_on;

    use super::*;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: std::sync::Arc<Self>) { self.0.fetch_add(1, Ordering::SeqCst); }
    }

    #[test]
    fn second_settlement_is_a_no_op() {
        let bridge = FutureBridge::new();
        assert!(bridge.resolve(1_u8));
        assert!(!bridge.resolve(2));
        assert!(!bridge.cancel());
        assert_eq!(block_on(bridge), Ok(1));
    }

    #[test]
    fn cancellation_reaches_consumer() {
        let bridge = FutureBridge::<u8>::new();
        let consumer = bridge.clone();
        assert!(bridge.cancel());
        assert_eq!(block_on(consumer), Err(Cancelled));
    }

    #[test]
    fn resolve_wakes_registered_waker_once() {
        let counter = std::sync::Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let mut cx = Context::from_waker(&waker);
        let bridge = FutureBridge::<u8>::new();

        assert!(bridge.poll_settled(&mut cx).is_pending());
        assert!(bridge.poll_settled(&mut cx).is_pending());
        bridge.resolve(9);
        bridge.cancel();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.poll_settled(&mut cx), Poll::Ready(Ok(9)));
    }

    #[test]
    fn outcome_is_observed_once() {
        let bridge = FutureBridge::new();
        bridge.resolve("done");
        assert_eq!(bridge.try_take(), Some(Ok("done")));
        assert_eq!(bridge.try_take(), None);
        assert!(bridge.is_settled());
    }

    #[test]
    fn resolution_from_another_thread_wakes_awaiting_task() {
        let bridge = FutureBridge::new();
        let producer = bridge.clone();
        let handle = thread::spawn(move || producer.resolve(1024_usize));
        assert_eq!(block_on(bridge), Ok(1024));
        assert!(handle.join().expect("producer thread panicked"));
    }
}
