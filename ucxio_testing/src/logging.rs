//! Serialised access to the global `log` capture.

use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard, OnceLock, PoisonError},
};

use log::Level;
use logtest::Logger;
use rstest::fixture;

/// Handle to the global logger with exclusive access.
///
/// Tests that assert on log output hold this guard for their whole run so
/// records from concurrently running tests never interleave. A test that
/// panics while holding the guard does not block the others.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the global [`Logger`] and discard anything captured before.
    #[must_use]
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let mut guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
        while guard.pop().is_some() {}

        Self { guard }
    }

    /// Drain captured records, keeping `(level, message)` pairs.
    pub fn drain(&mut self) -> Vec<(Level, String)> {
        let mut records = Vec::new();
        while let Some(record) = self.guard.pop() {
            records.push((record.level(), record.args().to_owned()));
        }
        records
    }

    /// Drain captured records and return the messages logged at `level`
    /// that contain `needle`.
    pub fn find(&mut self, level: Level, needle: &str) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter(|(lvl, message)| *lvl == level && message.contains(needle))
            .map(|(_, message)| message)
            .collect()
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
