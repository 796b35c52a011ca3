//! Worker-wide tag matching for the loopback fabric.
//!
//! Posted receives and unexpected messages are matched in arrival order. A
//! posted receive for `(tag, mask)` accepts an incoming message tagged `t`
//! when `t & mask == tag & mask`.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::{error::TransportErrorKind, transport::Tag};

/// A receive waiting for a matching message.
pub(super) struct PostedRecv<C> {
    pub(super) tag: Tag,
    pub(super) mask: Tag,
    pub(super) connection: u64,
    pub(super) buffer: BytesMut,
    pub(super) completion: C,
}

impl<C> PostedRecv<C> {
    fn accepts(&self, tag: Tag) -> bool { tag & self.mask == self.tag & self.mask }
}

/// Message data held until a receive matches it.
pub(super) enum Payload<C> {
    /// Copied at send time; the sender already completed.
    Eager(Bytes),
    /// Still owned by the sender, which completes once the data is taken.
    Rendezvous {
        sender: u64,
        buffer: BytesMut,
        completion: C,
    },
}

impl<C> Payload<C> {
    pub(super) fn data(&self) -> &[u8] {
        match self {
            Self::Eager(bytes) => bytes,
            Self::Rendezvous { buffer, .. } => buffer,
        }
    }
}

/// A message that arrived before any matching receive was posted.
pub(super) struct Unexpected<C> {
    pub(super) tag: Tag,
    pub(super) connection: u64,
    pub(super) payload: Payload<C>,
}

/// Posted receives and unexpected messages of one worker.
pub(super) struct TagMatcher<C> {
    posted: VecDeque<PostedRecv<C>>,
    unexpected: VecDeque<Unexpected<C>>,
}

impl<C> Default for TagMatcher<C> {
    fn default() -> Self {
        Self {
            posted: VecDeque::new(),
            unexpected: VecDeque::new(),
        }
    }
}

impl<C> TagMatcher<C> {
    /// Remove and return the oldest posted receive accepting `tag`.
    pub(super) fn take_posted(&mut self, tag: Tag) -> Option<PostedRecv<C>> {
        let pos = self.posted.iter().position(|recv| recv.accepts(tag))?;
        self.posted.remove(pos)
    }

    /// Remove and return the oldest unexpected message matching
    /// `(tag, mask)`.
    pub(super) fn take_unexpected(&mut self, tag: Tag, mask: Tag) -> Option<Unexpected<C>> {
        let pos = self
            .unexpected
            .iter()
            .position(|msg| msg.tag & mask == tag & mask)?;
        self.unexpected.remove(pos)
    }

    pub(super) fn post(&mut self, recv: PostedRecv<C>) { self.posted.push_back(recv); }

    pub(super) fn push_unexpected(&mut self, msg: Unexpected<C>) { self.unexpected.push_back(msg); }

    /// Remove receives posted through `connection`.
    pub(super) fn remove_posted_for(&mut self, connection: u64) -> Vec<PostedRecv<C>> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .posted
            .drain(..)
            .partition(|recv| recv.connection == connection);
        self.posted = kept.into();
        removed
    }

    /// Remove rendezvous messages sent over `connection`, returning the
    /// senders' buffers and completions. Eager messages stay deliverable.
    pub(super) fn remove_rendezvous_from(&mut self, connection: u64) -> Vec<(u64, BytesMut, C)> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.unexpected.len());
        for msg in self.unexpected.drain(..) {
            match msg.payload {
                Payload::Rendezvous {
                    sender,
                    buffer,
                    completion,
                } if msg.connection == connection => removed.push((sender, buffer, completion)),
                payload => kept.push_back(Unexpected {
                    tag: msg.tag,
                    connection: msg.connection,
                    payload,
                }),
            }
        }
        self.unexpected = kept;
        removed
    }

    /// Turn rendezvous messages sent over `connection` into eager copies so
    /// they stay deliverable, returning the senders' buffers and completions.
    pub(super) fn flush_rendezvous_from(&mut self, connection: u64) -> Vec<(u64, BytesMut, C)> {
        let mut flushed = Vec::new();
        for msg in &mut self.unexpected {
            if msg.connection != connection || matches!(msg.payload, Payload::Eager(_)) {
                continue;
            }
            let copy = Payload::Eager(Bytes::copy_from_slice(msg.payload.data()));
            if let Payload::Rendezvous {
                sender,
                buffer,
                completion,
            } = std::mem::replace(&mut msg.payload, copy)
            {
                flushed.push((sender, buffer, completion));
            }
        }
        flushed
    }

    /// Empty the matcher.
    pub(super) fn drain(&mut self) -> (Vec<PostedRecv<C>>, Vec<Unexpected<C>>) {
        (self.posted.drain(..).collect(), self.unexpected.drain(..).collect())
    }
}

/// Copy `data` into `buffer`, failing with `MessageTruncated` when it does
/// not fit.
pub(super) fn copy_message(mut buffer: BytesMut, data: &[u8]) -> (Result<usize, TransportErrorKind>, BytesMut) {
    if data.len() > buffer.len() {
        return (Err(TransportErrorKind::MessageTruncated), buffer);
    }
    buffer[..data.len()].copy_from_slice(data);
    (Ok(data.len()), buffer)
}
