//! Retry pacing for bus connection attempts.

use std::thread;
use std::time::Duration;

/// Attempts paced by [`FAST_RECONNECT_INTERVAL`] before falling back to the
/// configured interval.
pub const FAST_RECONNECT_ATTEMPTS: u32 = 5;

/// Short pause used while the bus may simply be restarting.
pub const FAST_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Computes the pause after a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    configured: Duration,
}

impl ReconnectBackoff {
    /// Builds a schedule around the configured reconnect interval.
    #[must_use]
    pub const fn new(configured: Duration) -> Self {
        Self { configured }
    }

    /// Pause after the zero-based failed `attempt`.
    ///
    /// The fast interval only applies when it is shorter than the configured
    /// one.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt < FAST_RECONNECT_ATTEMPTS && self.configured > FAST_RECONNECT_INTERVAL {
            FAST_RECONNECT_INTERVAL
        } else {
            self.configured
        }
    }
}

/// Blocks the daemon between connection attempts.
pub trait Sleeper {
    /// Pauses for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}
