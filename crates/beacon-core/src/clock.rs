//! Wall-clock source for heartbeat payloads.
//!
//! Staleness uses the monotonic `tokio::time::Instant` directly. Ping
//! payloads and latency need wall-clock seconds since the Unix epoch, which
//! is what this trait provides.

use std::fmt;

use chrono::Utc;
use parking_lot::Mutex;

/// Source of wall-clock time as float seconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in seconds since the Unix epoch.
    fn unix_now(&self) -> f64;
}

/// Clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock frozen at `unix_secs`.
    pub fn new(unix_secs: f64) -> Self {
        Self {
            now: Mutex::new(unix_secs),
        }
    }

    /// Move the clock to an absolute time.
    pub fn set(&self, unix_secs: f64) {
        *self.now.lock() = unix_secs;
    }

    /// Move the clock forward (or backward, for skew) by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn unix_now(&self) -> f64 {
        *self.now.lock()
    }
}
