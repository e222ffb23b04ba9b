//! sctperf - throughput measurement for message-oriented transports
//!
//! This library measures how fast messages move across a multi-streamed,
//! partially reliable, message-oriented association. A sender emits a fixed
//! number of equally sized messages (or runs for a fixed time) round-robin
//! over its streams; a receiver accepts any number of associations and
//! reports per-association statistics and, optionally, windowed rates.
//!
//! # Features
//!
//! - Round-robin multi-stream sending with ordered or unordered delivery
//! - Per-message partial-reliability policies (time-to-live,
//!   retransmission count, buffer bound)
//! - Partial delivery accounting and windowed throughput samples
//! - Pluggable transports; a TCP-framed one ships with the crate
//! - Text or JSON output

pub mod accumulator;
pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod measurements;
pub mod protocol;
pub mod report;
pub mod round_window;
pub mod server;
pub mod transport;

pub use client::{Client, RunTimer, SendPacer};
pub use config::{AddressFamily, Config, Mode};
pub use error::{Error, Result};
pub use measurements::{ReceiveStats, SendStats};
pub use report::{ConsoleSink, Report, ReportSink};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
