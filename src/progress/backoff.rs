//! Idle back-off for the thread-polling progress loop.

use std::time::Duration;

const MIN_DELAY: Duration = Duration::from_micros(1);

/// Exponential back-off applied while a thread-polling worker finds no work.
///
/// The loop sleeps `initial_delay` after the first idle poll and doubles the
/// delay on each further idle poll, capped at `max_delay`. Any productive
/// poll resets the delay.
///
/// # Default Values
/// - `initial_delay`: 10 microseconds
/// - `max_delay`: 1 millisecond
///
/// # Invariants
/// - `initial_delay` must not exceed `max_delay`
/// - both delays must be at least 1 microsecond
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first idle poll.
    pub initial_delay: Duration,
    /// Upper bound on the idle delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_micros(10),
            max_delay: Duration::from_millis(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to sane bounds and ensure `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use ucxio::progress::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_micros(500),
    ///     max_delay: Duration::ZERO,
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_micros(1));
    /// assert_eq!(normalized.max_delay, Duration::from_micros(500));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(MIN_DELAY);
        self.max_delay = self.max_delay.max(MIN_DELAY);
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay following `current` after another idle poll.
    #[must_use]
    pub(crate) fn next_delay(&self, current: Duration) -> Duration { (current * 2).min(self.max_delay) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_up_to_cap() {
        let backoff = BackoffConfig {
            initial_delay: Duration::from_micros(300),
            max_delay: Duration::from_micros(1000),
        }
        .normalized();
        let mut delay = backoff.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..4 {
            delay = backoff.next_delay(delay);
            seen.push(delay.as_micros());
        }
        assert_eq!(seen, vec![600, 1000, 1000, 1000]);
    }

    #[test]
    fn normalized_keeps_valid_config() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.normalized(), backoff);
    }
}
