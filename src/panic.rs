//! Panic containment for user code run on the progress-owning thread.
//!
//! Request callbacks, connection-request handlers, and scheduled closures
//! execute inside a progress step. A panic there must not unwind through the
//! transport or kill the progress thread, so it is caught and logged.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use ucxio::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Run `f`, logging and swallowing any panic. Returns `false` if `f`
/// panicked.
pub(crate) fn run_guarded<F: FnOnce()>(site: &'static str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(panic = %format_panic(payload), site, "user callback panicked");
            false
        }
    }
}
