//! Per-worker event queue of the loopback fabric.

use std::{
    collections::VecDeque,
    mem,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::sync::{lock, wait, wait_timeout};

/// Work the fabric hands to a worker; runs inside that worker's
/// `progress()`.
pub(super) type Event = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    signaled: bool,
}

/// Events waiting for a worker plus the wake-up flag its waiters sleep on.
#[derive(Default)]
pub(super) struct EventQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl EventQueue {
    pub(super) fn push(&self, event: Event) {
        lock(&self.state).events.push_back(event);
        self.ready.notify_all();
    }

    /// Wake a waiter even though no event is queued. The signal is sticky
    /// until a waiter consumes it.
    pub(super) fn signal(&self) {
        lock(&self.state).signaled = true;
        self.ready.notify_all();
    }

    pub(super) fn take(&self) -> VecDeque<Event> { mem::take(&mut lock(&self.state).events) }

    /// Sleep until an event is queued, a signal arrives, or `timeout`
    /// expires. Returns `false` on expiry.
    pub(super) fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = lock(&self.state);
        loop {
            if !state.events.is_empty() || state.signaled {
                state.signaled = false;
                return true;
            }
            state = match deadline {
                None => wait(&self.ready, state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    wait_timeout(&self.ready, state, deadline - now)
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn signal_wakes_a_later_wait_once() {
        let queue = EventQueue::default();
        queue.signal();
        assert!(queue.wait(Some(Duration::from_millis(1))));
        assert!(!queue.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn pushed_event_wakes_sleeping_waiter() {
        let queue = Arc::new(EventQueue::default());
        let waiter = Arc::clone(&queue);
        let handle = thread::spawn(move || waiter.wait(Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(10));
        queue.push(Box::new(|| {}));
        assert!(handle.join().expect("waiter panicked"));
        assert_eq!(queue.take().len(), 1);
    }
}
