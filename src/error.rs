//! Canonical error and result types for the crate.
//!
//! [`RequestError`] is the outcome error delivered through every consumption
//! path of a [`Request`](crate::request::Request): blocking wait, user
//! callback, and future. [`Error`] is returned by API calls on workers,
//! endpoints, and listeners.

use std::{fmt, io};

use thiserror::Error;

use crate::request::RequestId;

/// Status codes reported by the transport for a failed operation or
/// connection.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The remote peer reset the connection.
    ConnectionReset,
    /// The connection timed out at the transport level.
    EndpointTimeout,
    /// The destination could not be reached.
    Unreachable,
    /// The connection handle does not refer to a live connection.
    NotConnected,
    /// A receive buffer was smaller than the matched message.
    MessageTruncated,
    /// The transport cancelled the operation (for example on close).
    Canceled,
    /// The requested resource is busy (for example a port in use).
    Busy,
    /// The transport ran out of resources.
    NoResource,
    /// An invalid argument was passed to the transport.
    InvalidParam,
    /// A generic I/O failure inside the transport.
    Io,
}

impl TransportErrorKind {
    /// Returns `true` for kinds that usually mean the peer simply went away.
    ///
    /// These are logged at reduced severity since they frequently represent
    /// an ordinary remote disconnect rather than a fault.
    #[must_use]
    pub fn is_peer_disconnect(self) -> bool {
        matches!(self, Self::ConnectionReset | Self::EndpointTimeout)
    }

    /// Returns `true` when the failure affects the whole connection rather
    /// than a single operation.
    #[must_use]
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::ConnectionReset | Self::EndpointTimeout | Self::Unreachable | Self::NotConnected
        )
    }

    /// Stable label used for logging and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::EndpointTimeout => "endpoint_timeout",
            Self::Unreachable => "unreachable",
            Self::NotConnected => "not_connected",
            Self::MessageTruncated => "message_truncated",
            Self::Canceled => "canceled",
            Self::Busy => "busy",
            Self::NoResource => "no_resource",
            Self::InvalidParam => "invalid_param",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ConnectionReset => "connection reset by remote peer",
            Self::EndpointTimeout => "endpoint timeout",
            Self::Unreachable => "destination is unreachable",
            Self::NotConnected => "not connected",
            Self::MessageTruncated => "message truncated",
            Self::Canceled => "operation canceled",
            Self::Busy => "device is busy",
            Self::NoResource => "resources are not available",
            Self::InvalidParam => "invalid parameter",
            Self::Io => "input/output error",
        };
        f.write_str(text)
    }
}

/// Final error outcome of a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The transport rejected the operation when it was issued.
    #[error("submission rejected by transport: {0}")]
    SubmissionFailed(TransportErrorKind),
    /// The transport reported a failure through the completion callback.
    #[error("transport error: {0}")]
    Transport(TransportErrorKind),
    /// The request was cancelled before a terminal outcome was observed.
    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Return the transport status behind this error, if any.
    #[must_use]
    pub fn kind(self) -> Option<TransportErrorKind> {
        match self {
            Self::SubmissionFailed(kind) | Self::Transport(kind) => Some(kind),
            Self::Cancelled => None,
        }
    }

    /// Returns `true` if the request was cancelled.
    #[must_use]
    pub fn is_cancelled(self) -> bool { matches!(self, Self::Cancelled) }
}

/// Top-level error type for worker, endpoint, and listener operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The worker or endpoint has no valid transport handle (stopped worker,
    /// closed endpoint). The operation was never queued.
    #[error("{0} not initialized")]
    NotInitialized(&'static str),
    /// The endpoint's connection is in an error state.
    #[error("endpoint error: {0}")]
    Connection(TransportErrorKind),
    /// A request finished with an error outcome.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// A wait deadline expired. The request keeps running in the background.
    #[error("timed out waiting for request {0}")]
    Timeout(RequestId),
    /// Waiting from inside a progress step on the owning thread would never
    /// return.
    #[error("cannot block on a request from inside a progress callback")]
    ReentrantWait,
    /// An address could not be used to create an endpoint.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Hostname resolution failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        /// Hostname that failed to resolve.
        host: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// The transport refused a connection, listener, or worker request.
    #[error("transport failure: {0}")]
    Transport(TransportErrorKind),
    /// The progress thread could not be started.
    #[error("failed to spawn progress thread: {0}")]
    Spawn(#[source] io::Error),
}

impl Error {
    /// Returns `true` if this error reports a connection reset, either as an
    /// endpoint state or as a request outcome.
    #[must_use]
    pub fn is_connection_reset(&self) -> bool {
        match self {
            Self::Connection(kind) | Self::Transport(kind) => {
                *kind == TransportErrorKind::ConnectionReset
            }
            Self::Request(err) => err.kind() == Some(TransportErrorKind::ConnectionReset),
            _ => false,
        }
    }

    /// Returns `true` if this error reports a cancelled request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Request(RequestError::Cancelled)) }
}

/// Canonical result alias used by `ucxio` public APIs.
pub type Result<T> = std::result::Result<T, Error>;
