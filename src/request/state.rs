//! Request lifecycle states.

use std::fmt;

use crate::error::RequestError;

/// Final outcome of a request: bytes transferred, or the error.
pub type Outcome = Result<usize, RequestError>;

/// Position of a request in its lifecycle.
///
/// ```text
/// Created -> {Delayed | Submitted} -> Completed | Errored | Cancelled
/// Delayed -> Submitted
/// ```
///
/// A request leaves `Created` or `Delayed` directly for `Errored` when the
/// transport refuses the submission, and may be `Cancelled` from any
/// non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Allocated, not yet handed to the transport.
    Created,
    /// Queued until the progress-owning thread submits it.
    Delayed,
    /// Handed to the transport.
    Submitted,
    /// The transport reported success.
    Completed,
    /// The transport reported a failure or refused the submission.
    Errored,
    /// Cancelled before a terminal outcome was observed.
    Cancelled,
}

impl RequestState {
    /// Returns `true` for `Completed`, `Errored`, and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    /// Terminal state matching `outcome`.
    #[must_use]
    pub fn for_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Ok(_) => Self::Completed,
            Err(RequestError::Cancelled) => Self::Cancelled,
            Err(_) => Self::Errored,
        }
    }

    /// Lower-case state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Delayed => "delayed",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
