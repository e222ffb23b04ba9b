//! Receive-side accounting for one association.
//!
//! The accumulator consumes receive events in delivery order. Data fragments
//! are summed until one carries the end-of-record flag, which completes the
//! message. Notifications are only counted.

use crate::measurements::ReceiveStats;
use crate::protocol::RecvEvent;
use crate::round_window::{RateSample, RoundWindow};
use std::time::Duration;

/// Reassembles partial deliveries and keeps the session counters.
///
/// # Examples
///
/// ```
/// use sctperf::accumulator::ReceiveAccumulator;
/// use sctperf::protocol::{Ordering, Reliability, RecvEvent, RecvInfo};
/// use std::time::Duration;
///
/// let info = RecvInfo {
///     ppid: 39,
///     stream: 0,
///     ssn: 0,
///     tsn: 0,
///     ordering: Ordering::Ordered,
///     reliability: Reliability::Reliable,
///     end_of_record: false,
/// };
/// let mut acc = ReceiveAccumulator::new(0);
/// let now = Duration::from_secs(1);
///
/// acc.on_event(&RecvEvent::Data { len: 600, info }, now);
/// acc.on_event(
///     &RecvEvent::Data { len: 424, info: RecvInfo { end_of_record: true, ..info } },
///     now,
/// );
///
/// assert_eq!(acc.stats().messages, 1);
/// assert_eq!(acc.stats().first_length, 1024);
/// ```
#[derive(Debug)]
pub struct ReceiveAccumulator {
    stats: ReceiveStats,
    pending: u64,
    interval_secs: u64,
    window: Option<RoundWindow>,
}

impl ReceiveAccumulator {
    /// Creates an accumulator; `interval_secs == 0` disables windowed reporting.
    pub fn new(interval_secs: u64) -> Self {
        Self {
            stats: ReceiveStats::default(),
            pending: 0,
            interval_secs,
            window: None,
        }
    }

    /// Accounts for one receive event.
    ///
    /// Returns a rate sample when the event completed a message and the
    /// reporting window's deadline has been reached.
    pub fn on_event(&mut self, event: &RecvEvent, now: Duration) -> Option<RateSample> {
        self.stats.recv_calls += 1;
        if self.interval_secs > 0 && self.window.is_none() {
            self.window = Some(RoundWindow::start(self.interval_secs, now));
        }

        let (len, info) = match event {
            RecvEvent::Notification { .. } => {
                self.stats.notifications += 1;
                return None;
            }
            RecvEvent::Data { len, info } => (*len as u64, info),
        };

        self.stats.bytes += len;
        self.pending += len;
        if !info.end_of_record {
            return None;
        }

        let completed = std::mem::take(&mut self.pending);
        self.stats.messages += 1;
        if self.stats.first_length == 0 {
            self.stats.first_length = completed;
        }

        self.window
            .as_mut()
            .and_then(|window| window.record(completed, now))
    }

    /// Bytes received for the message that has not completed yet.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn window(&self) -> Option<&RoundWindow> {
        self.window.as_ref()
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    /// Finalizes the counters with the session's elapsed time.
    pub fn finish(mut self, elapsed: Duration) -> ReceiveStats {
        self.stats.duration = elapsed;
        self.stats
    }
}
