//! FIFO of work deferred to the progress-owning thread.
//!
//! Threads that do not own progress cannot call into the transport. They
//! park their submissions here, and the owner drains the queue at the start
//! of every progress step, in enqueue order.

use std::{collections::VecDeque, fmt, mem, sync::Mutex};

use crate::{
    request::Request,
    sync::lock,
    transport::{CloseMode, ConnectionHandle, Operation},
};

/// A send or receive waiting for the progress-owning thread.
#[derive(Debug)]
pub(crate) struct DelayedSubmission {
    pub(crate) operation: Operation,
    pub(crate) request: Request,
}

/// One unit of deferred work.
pub(crate) enum Deferred {
    Submit(DelayedSubmission),
    Close {
        connection: ConnectionHandle,
        mode: CloseMode,
        request: Request,
    },
    Call(Box<dyn FnOnce() + Send>),
}

impl Deferred {
    /// Request this entry settles, if any.
    pub(crate) fn request(&self) -> Option<&Request> {
        match self {
            Self::Submit(submission) => Some(&submission.request),
            Self::Close { request, .. } => Some(request),
            Self::Call(_) => None,
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit(submission) => f.debug_tuple("Submit").field(&submission.request).finish(),
            Self::Close {
                connection,
                mode,
                request,
            } => f
                .debug_struct("Close")
                .field("connection", connection)
                .field("mode", mode)
                .field("request", request)
                .finish(),
            Self::Call(_) => f.write_str("Call(..)"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DelayedQueue(Mutex<VecDeque<Deferred>>);

impl DelayedQueue {
    pub(crate) fn push(&self, entry: Deferred) { lock(&self.0).push_back(entry); }

    /// Take every queued entry, oldest first. Entries pushed while the caller
    /// processes the batch wait for the next drain.
    pub(crate) fn take_all(&self) -> VecDeque<Deferred> { mem::take(&mut *lock(&self.0)) }

    pub(crate) fn len(&self) -> usize { lock(&self.0).len() }

    pub(crate) fn is_empty(&self) -> bool { lock(&self.0).is_empty() }
}
