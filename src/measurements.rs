use serde::{Deserialize, Serialize};
use std::time::Duration;

/// End-of-session statistics of one connection worker.
///
/// Created when the association is accepted, mutated only by the worker
/// that owns it and emitted once when the peer goes away.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiveStats {
    /// Length of the first completed message, used as the message size
    pub first_length: u64,
    /// Completed messages
    pub messages: u64,
    /// Receive operations, data and notifications alike
    pub recv_calls: u64,
    pub notifications: u64,
    /// Payload bytes of every data fragment
    pub bytes: u64,
    pub duration: Duration,
}

impl ReceiveStats {
    /// Throughput in bytes per second.
    ///
    /// Computed as `first_length * messages / seconds`: every message of a
    /// run has the same length.
    pub fn throughput(&self) -> f64 {
        let seconds = self.duration.as_secs_f64();
        if seconds > 0.0 {
            self.first_length as f64 * self.messages as f64 / seconds
        } else {
            0.0
        }
    }
}

/// Statistics of one sender run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendStats {
    /// Messages the transport accepted, the final one included when it went out
    pub messages: u64,
    /// Payload length of every message
    pub length: usize,
    /// Send operations attempted, failed ones included
    pub send_calls: u64,
    pub bytes: u64,
    pub duration: Duration,
    /// A send failed, or the association could not be established
    pub aborted: bool,
    /// The loop stopped because the run time elapsed or the run was cancelled
    pub cancelled: bool,
}

impl SendStats {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            ..Default::default()
        }
    }

    pub fn record_send(&mut self) {
        self.messages += 1;
        self.bytes += self.length as u64;
    }

    /// Throughput in bytes per second.
    pub fn throughput(&self) -> f64 {
        let seconds = self.duration.as_secs_f64();
        if seconds > 0.0 {
            self.bytes as f64 / seconds
        } else {
            0.0
        }
    }
}
