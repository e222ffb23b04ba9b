//! Measurement output.
//!
//! Everything the tool measures is emitted as a [`Report`] to a
//! [`ReportSink`]. The command line tool prints reports with
//! [`ConsoleSink`]; library users can pass any closure instead:
//!
//! ```
//! use sctperf::report::{Report, ReportSink};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = seen.clone();
//! let sink = move |report: Report| log.lock().unwrap().push(report);
//!
//! sink.on_report(Report::SendingDone);
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use crate::measurements::{ReceiveStats, SendStats};
use crate::protocol::RecvInfo;
use crate::round_window::RateSample;
use crate::transport::Endpoint;
use crate::Result;
use log::{error, warn};
use serde::Serialize;
use std::fmt;

/// Which socket buffer a size report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferKind {
    Send,
    Receive,
}

/// One unit of measurement output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Report {
    /// An association was accepted
    Accepted { peer: Endpoint },
    /// Socket buffer size in effect
    BufferSize { kind: BufferKind, bytes: u32 },
    /// A received data fragment (very verbose)
    Fragment { len: usize, info: RecvInfo },
    /// A received notification (very verbose)
    Notification { len: usize },
    /// Throughput of the last round window
    Rate(RateSample),
    /// End of a receive session
    Completed {
        peer: Option<Endpoint>,
        stats: ReceiveStats,
    },
    /// The sender starts a bounded run (verbose)
    SendingStarted { messages: u64 },
    /// The sender is about to send message `number` (very verbose)
    Sending { number: u64 },
    /// The bounded run finished sending (verbose)
    SendingDone,
    /// Something was requested that the run could not honor
    Warning { message: String },
    /// End of a sender run
    Summary(SendStats),
}

impl Report {
    /// Serializes the report as one JSON object.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the report cannot be serialized.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Accepted { peer } => write!(f, "Connection accepted from {}", peer),
            Report::BufferSize { kind, bytes } => {
                let kind = match kind {
                    BufferKind::Send => "Send",
                    BufferKind::Receive => "Receive",
                };
                write!(f, "{} buffer size: {}.", kind, bytes)
            }
            Report::Fragment { len, info } => write!(
                f,
                "{} message of length {:6}, PPID = 0x{:08x}, SID = 0x{:04x}, SSN = 0x{:04x}, TSN = 0x{:08x}, {}.",
                if info.end_of_record { "Final" } else { "Partial" },
                len,
                info.ppid,
                info.stream,
                info.ssn,
                info.tsn,
                info.ordering.as_str()
            ),
            Report::Notification { len } => write!(f, "Notification of length {:6}.", len),
            Report::Rate(sample) => write!(
                f,
                "throughput for the last {:.6} seconds: {:.6} B/s",
                sample.seconds, sample.bytes_per_second
            ),
            Report::Completed { stats, .. } => write!(
                f,
                "{}, {}, {}, {}, {}, {:.6}, {:.6}",
                stats.first_length,
                stats.messages,
                stats.recv_calls,
                stats.notifications,
                stats.bytes,
                stats.duration.as_secs_f64(),
                stats.throughput()
            ),
            Report::SendingStarted { messages } => {
                write!(f, "Start sending {} messages...", messages)
            }
            Report::Sending { number } => write!(f, "Sending message number {}.", number),
            Report::SendingDone => write!(f, "done."),
            Report::Warning { message } => write!(f, "{}", message),
            Report::Summary(stats) => write!(
                f,
                "Sending of {} messages of length {} took {:.6} seconds.\nThroughput was {:.6} Byte/sec.",
                stats.messages,
                stats.length,
                stats.duration.as_secs_f64(),
                stats.throughput()
            ),
        }
    }
}

/// Receiver of measurement output.
///
/// Implemented for every `Fn(Report) + Send + Sync` closure.
pub trait ReportSink: Send + Sync {
    fn on_report(&self, report: Report);
}

impl<F> ReportSink for F
where
    F: Fn(Report) + Send + Sync,
{
    fn on_report(&self, report: Report) {
        self(report)
    }
}

/// Prints reports to stdout, as text lines or one JSON object per line.
///
/// Warnings go through the logger instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink {
    json: bool,
}

impl ConsoleSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl ReportSink for ConsoleSink {
    fn on_report(&self, report: Report) {
        if let Report::Warning { message } = &report {
            warn!("{}", message);
            return;
        }

        if self.json {
            match report.to_json() {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize report: {}", e),
            }
        } else {
            println!("{}", report);
        }
    }
}
