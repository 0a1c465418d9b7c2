//! Time source for bounded waits.
//!
//! Every settle delay and timeout on the control thread goes through a
//! [`Clock`]. [`SystemClock`] is wall time; [`SimClock`] advances only when
//! something sleeps on it, so multi-second sealing windows run instantly and
//! land on exact boundaries in tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source with an associated sleep
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration` of this clock's time
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time immediately instead of blocking.
///
/// Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    elapsed: Arc<Mutex<Duration>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the timeline forward without a sleeper
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
