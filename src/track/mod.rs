//! Notification tracking with exponential backoff.
//!
//! A [`TimeTracker`] answers "may this endpoint notify again?". The first
//! failure always notifies; afterwards each notification must wait longer
//! than the [`Delayer`] allows for the number of notifications already sent.

use std::time::Duration;

use tokio::time::Instant;

/// Lower bound of every backoff delay.
pub const MIN_DELAY: Duration = Duration::from_secs(1);

/// Upper bound of every backoff delay.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Maps the number of notifications already sent to the minimum delay
/// before the next one.
pub trait Delayer: Send + Sync {
    fn delay(&self, attempts: u32) -> Duration;
}

/// `base × 2^attempts` seconds, clamped to [`MIN_DELAY`]..=[`MAX_DELAY`].
///
/// A base of 0 doubles from the floor: 1s, 2s, 4s and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpBackoff {
    base_secs: u64,
}

impl ExpBackoff {
    pub fn new(base_secs: u64) -> Self {
        Self { base_secs }
    }
}

impl Delayer for ExpBackoff {
    fn delay(&self, attempts: u32) -> Duration {
        let base = self.base_secs.max(MIN_DELAY.as_secs());

        let secs = 1u64
            .checked_shl(attempts)
            .and_then(|factor| base.checked_mul(factor))
            .unwrap_or(u64::MAX);

        Duration::from_secs(secs).clamp(MIN_DELAY, MAX_DELAY)
    }
}

/// Per-endpoint notification gate.
#[derive(Debug, Clone)]
pub struct TimeTracker<D = ExpBackoff> {
    delayer: D,
    last_fired: Option<Instant>,
    attempts: u32,
}

impl<D: Delayer> TimeTracker<D> {
    pub fn new(delayer: D) -> Self {
        Self {
            delayer,
            last_fired: None,
            attempts: 0,
        }
    }

    /// Whether a notification may be sent now. A `true` answer counts as the
    /// notification having been sent.
    pub fn is_ready(&mut self) -> bool {
        self.is_ready_at(Instant::now())
    }

    /// [`is_ready`](Self::is_ready) evaluated at `now`.
    pub fn is_ready_at(&mut self, now: Instant) -> bool {
        let ready = match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.delayer.delay(self.attempts),
        };

        if ready {
            self.last_fired = Some(now);
            self.attempts = self.attempts.saturating_add(1);
        }
        ready
    }

    /// True once at least one notification was allowed.
    pub fn has_been_run(&self) -> bool {
        self.last_fired.is_some()
    }

    /// Number of notifications allowed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Tracker with an [`ExpBackoff`] delayer, as used for every endpoint.
pub fn new_tracker_with_exp_backoff(base_secs: u64) -> TimeTracker {
    TimeTracker::new(ExpBackoff::new(base_secs))
}
