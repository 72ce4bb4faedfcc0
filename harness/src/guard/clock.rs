//! Time sources for the guard's scheduler and bounded polls.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic time plus a wall-clock stamp for result timestamps.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
    /// Milliseconds since the Unix epoch.
    fn wall_ms(&self) -> u64;
}

/// Real time: sleeps block the thread.
#[derive(Debug)]
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

    fn wall_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Virtual time: `sleep` advances the clock instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
    wall_base_ms: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual clock whose wall stamps start at `wall_base_ms`.
    pub fn starting_at(wall_base_ms: u64) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            wall_base_ms,
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn wall_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.now.get().as_millis()).unwrap_or(u64::MAX);
        self.wall_base_ms.saturating_add(elapsed)
    }
}
