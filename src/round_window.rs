//! Periodic windowed throughput on the receive side.
//!
//! A round window accumulates the bytes of completed messages and emits a
//! [`RateSample`] once its deadline has passed. The deadline is checked when
//! a message completes, not by a timer, so a window lasts at least the
//! configured interval and longer when traffic is sparse.
//!
//! Timestamps are wall-clock offsets from the UNIX epoch. The deadline is a
//! whole second: the window start is rounded half-up to the nearest second
//! before the interval is added.
//!
//! # Examples
//!
//! ```
//! use sctperf::round_window::RoundWindow;
//! use std::time::Duration;
//!
//! let mut window = RoundWindow::start(2, Duration::from_millis(10_300));
//! assert_eq!(window.deadline(), 12);
//!
//! assert!(window.record(1024, Duration::from_millis(11_900)).is_none());
//! let sample = window.record(1024, Duration::from_millis(12_050)).unwrap();
//! assert_eq!(sample.bytes, 2048);
//! assert_eq!(window.bytes(), 0);
//! ```

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const HALF_SECOND_NANOS: u32 = 500_000_000;

/// Current wall-clock time as an offset from the UNIX epoch.
pub fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Computes the whole-second deadline of a window starting at `start`.
///
/// # Examples
///
/// ```
/// use sctperf::round_window::round_deadline;
/// use std::time::Duration;
///
/// assert_eq!(round_deadline(Duration::from_millis(5_499), 1), 6);
/// assert_eq!(round_deadline(Duration::from_millis(5_500), 1), 7);
/// ```
pub fn round_deadline(start: Duration, interval_secs: u64) -> u64 {
    let mut deadline = start.as_secs() + interval_secs;
    if start.subsec_nanos() >= HALF_SECOND_NANOS {
        deadline += 1;
    }
    deadline
}

/// Throughput measured over one closed window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    /// Real time the window covered, with sub-second precision
    pub seconds: f64,
    /// Bytes of the messages completed inside the window
    pub bytes: u64,
    pub bytes_per_second: f64,
}

/// The current reporting window of one connection.
#[derive(Debug, Clone)]
pub struct RoundWindow {
    interval_secs: u64,
    start: Duration,
    deadline: u64,
    bytes: u64,
}

impl RoundWindow {
    /// Opens a window at `now`.
    pub fn start(interval_secs: u64, now: Duration) -> Self {
        Self {
            interval_secs,
            start: now,
            deadline: round_deadline(now, interval_secs),
            bytes: 0,
        }
    }

    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    pub fn started_at(&self) -> Duration {
        self.start
    }

    /// Bytes accumulated since the window opened.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn add(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    /// Closes the window if `now` has reached its deadline.
    ///
    /// On close the sample is returned, the byte count drops to zero and a
    /// new window opens at `now`.
    pub fn poll(&mut self, now: Duration) -> Option<RateSample> {
        if now.as_secs() < self.deadline {
            return None;
        }

        let seconds = now.saturating_sub(self.start).as_secs_f64();
        let bytes_per_second = if seconds > 0.0 {
            self.bytes as f64 / seconds
        } else {
            0.0
        };
        let sample = RateSample {
            seconds,
            bytes: self.bytes,
            bytes_per_second,
        };

        *self = Self::start(self.interval_secs, now);
        Some(sample)
    }

    /// Adds a completed message and checks the deadline.
    pub fn record(&mut self, bytes: u64, now: Duration) -> Option<RateSample> {
        self.add(bytes);
        self.poll(now)
    }
}
