//! Progress strategies a worker can run.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use thiserror::Error;

use super::ProgressEngine;

/// How a worker's transport is kept advancing.
///
/// Selected once at worker construction.
///
/// | Mode | Who progresses | Idle behaviour |
/// |------|----------------|----------------|
/// | `Blocking` | any waiting thread | blocks on transport readiness |
/// | `Polling` | caller-driven | returns immediately |
/// | `Thread` | background thread | blocks on transport readiness |
/// | `ThreadPolling` | background thread | spins with back-off |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProgressMode {
    /// Callers block on transport readiness whenever they need a result.
    Blocking,
    /// Callers must call `progress_once` periodically. Nothing happens
    /// otherwise.
    Polling,
    /// A dedicated thread blocks on transport readiness in a loop.
    #[default]
    Thread,
    /// A dedicated thread polls in a loop, backing off while idle.
    ThreadPolling,
}

impl ProgressMode {
    /// Returns `true` when no background thread exists and callers must
    /// drive progress themselves.
    #[must_use]
    pub fn requires_external_driver(self) -> bool { matches!(self, Self::Blocking | Self::Polling) }

    /// Returns `true` when the worker owns a progress thread.
    #[must_use]
    pub fn spawns_thread(self) -> bool { !self.requires_external_driver() }

    /// Kebab-case mode name, as accepted by [`FromStr`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Polling => "polling",
            Self::Thread => "thread",
            Self::ThreadPolling => "thread-polling",
        }
    }

    /// One non-blocking progress step.
    pub(crate) fn advance_once(self, engine: &Arc<ProgressEngine>) -> bool { engine.progress_once() }

    /// One progress step that may block for up to `timeout` when the mode
    /// blocks on readiness.
    pub(crate) fn advance_blocking(
        self,
        engine: &Arc<ProgressEngine>,
        timeout: Option<Duration>,
    ) -> bool {
        self.advance_blocking_until(engine, timeout, || false)
    }

    /// [`Self::advance_blocking`] that never parks once `done` holds.
    pub(crate) fn advance_blocking_until<F>(
        self,
        engine: &Arc<ProgressEngine>,
        timeout: Option<Duration>,
        done: F,
    ) -> bool
    where
        F: Fn() -> bool,
    {
        match self {
            Self::Blocking | Self::Thread => engine.progress_blocking_until(timeout, done),
            Self::Polling | Self::ThreadPolling => self.advance_once(engine),
        }
    }
}

impl fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Returned when parsing an unknown progress mode name.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown progress mode `{0}`")]
pub struct ParseProgressModeError(String);

impl FromStr for ProgressMode {
    type Err = ParseProgressModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "blocking" => Ok(Self::Blocking),
            "polling" => Ok(Self::Polling),
            "thread" => Ok(Self::Thread),
            "thread-polling" => Ok(Self::ThreadPolling),
            _ => Err(ParseProgressModeError(s.to_owned())),
        }
    }
}
