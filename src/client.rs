use crate::config::{Config, Mode};
use crate::measurements::SendStats;
use crate::protocol::{Ordering, Reliability, SendInfo, DEFAULT_PPID};
use crate::report::{BufferKind, ConsoleSink, Report, ReportSink};
use crate::transport::framed;
use crate::transport::Association;
use crate::{Error, Result};
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Emits the messages of one sender run.
///
/// Every message carries the same payload, ordering and reliability. The
/// stream index advances round-robin; in very-verbose mode the application
/// tag counts messages, otherwise it stays at [`DEFAULT_PPID`].
///
/// A bounded run sends `messages - 1` messages in the loop and one final
/// message that shuts the sending direction down. The final message is
/// always attempted, also after a failed send. An unbounded run
/// (`messages == 0`) loops until the token is cancelled.
#[derive(Debug, Clone)]
pub struct SendPacer {
    length: usize,
    streams: u16,
    ordering: Ordering,
    reliability: Reliability,
    messages: u64,
    verbose: bool,
    very_verbose: bool,
}

impl SendPacer {
    pub fn new(
        length: usize,
        streams: u16,
        ordering: Ordering,
        reliability: Reliability,
        messages: u64,
    ) -> Self {
        Self {
            length,
            streams: streams.max(1),
            ordering,
            reliability,
            messages,
            verbose: false,
            very_verbose: false,
        }
    }

    /// Progress lines (verbose) and per-message traces (very verbose).
    pub fn with_verbosity(mut self, verbose: bool, very_verbose: bool) -> Self {
        self.verbose = verbose || very_verbose;
        self.very_verbose = very_verbose;
        self
    }

    fn info(&self, ppid: u32, stream: u16, eof: bool) -> SendInfo {
        SendInfo {
            ppid,
            stream,
            ordering: self.ordering,
            reliability: self.reliability,
            eof,
        }
    }

    /// Drives the run on `association` and closes it.
    ///
    /// The token is checked before every loop iteration; a send in flight
    /// is never interrupted. A failed send ends the loop and sets
    /// [`SendStats::aborted`]; the final message is attempted either way.
    pub async fn run<A: Association + ?Sized>(
        &self,
        association: &mut A,
        token: &CancellationToken,
        sink: &dyn ReportSink,
    ) -> SendStats {
        let payload = vec![b'A'; self.length];
        let mut stats = SendStats::new(self.length);
        let mut ppid = if self.very_verbose { 0 } else { DEFAULT_PPID };
        let mut stream: u16 = 0;
        let mut number: u64 = 0;

        let start = Instant::now();
        let announce = self.verbose && !self.very_verbose;
        if announce {
            sink.on_report(Report::SendingStarted {
                messages: self.messages,
            });
        }

        while self.messages == 0 || number < self.messages - 1 {
            if token.is_cancelled() {
                debug!("Run time elapsed after {} messages", number);
                stats.cancelled = true;
                break;
            }
            if self.very_verbose {
                sink.on_report(Report::Sending { number });
            }

            stats.send_calls += 1;
            if let Err(e) = association.send(&payload, &self.info(ppid, stream, false)).await {
                error!("Send of message {} failed: {}", number, e);
                stats.aborted = true;
                break;
            }
            stats.record_send();

            if self.very_verbose {
                ppid = ppid.wrapping_add(1);
            }
            stream = (stream + 1) % self.streams;
            number += 1;
        }

        if self.very_verbose {
            sink.on_report(Report::Sending { number });
        }
        stats.send_calls += 1;
        match association.send(&payload, &self.info(ppid, stream, true)).await {
            Ok(()) => stats.record_send(),
            Err(e) => {
                error!("Send of final message failed: {}", e);
                stats.aborted = true;
            }
        }
        if announce {
            sink.on_report(Report::SendingDone);
        }

        if let Err(e) = association.close().await {
            debug!("Closing association failed: {}", e);
        }
        stats.duration = start.elapsed();
        stats
    }
}

/// Cancels a token once a run time has elapsed.
///
/// Dropping the timer disarms it.
pub struct RunTimer {
    handle: JoinHandle<()>,
}

impl RunTimer {
    pub fn arm(runtime: Duration, token: CancellationToken) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(runtime).await;
            token.cancel();
        });
        Self { handle }
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Throughput test sender.
///
/// # Examples
///
/// ```no_run
/// use sctperf::{Client, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1".parse()?, 5001)
///     .with_length(1024)
///     .with_messages(10)
///     .with_streams(2);
///
/// let client = Client::new(config)?;
/// let stats = client.run().await?;
/// println!("{} messages sent", stats.messages);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    sink: Arc<dyn ReportSink>,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a client that prints its reports to stdout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid or not a
    /// client configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if config.mode != Mode::Client {
            return Err(Error::Config("Client needs a client configuration".to_string()));
        }
        let sink = Arc::new(ConsoleSink::new(config.json));
        Ok(Self {
            config,
            sink,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Routes reports to `sink` instead of stdout.
    pub fn with_sink<S: ReportSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Token that ends the run early; the final message is still sent.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Resolves the reliability policy, warning once about unknown codes.
    fn reliability(&self) -> Reliability {
        match Reliability::from_policy(self.config.policy, self.config.policy_value) {
            Ok(reliability) => reliability,
            Err(e) => {
                self.sink.on_report(Report::Warning {
                    message: format!("{}, sending without a reliability policy", e),
                });
                Reliability::Reliable
            }
        }
    }

    /// Connects over TCP and runs the test.
    ///
    /// A failed connect is logged and ends the run with an empty summary;
    /// send failures end the loop. Neither is an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration has no server address.
    pub async fn run(&self) -> Result<SendStats> {
        let options = self.config.transport_options();
        for ignored in options.unsupported() {
            self.sink.on_report(Report::Warning { message: ignored });
        }

        let server_addr = self
            .config
            .server_addr
            .ok_or_else(|| Error::Config("Client mode needs a server address".to_string()))?;
        let remote = SocketAddr::new(server_addr, self.config.port);
        info!("Connecting to {}", remote);

        let mut association = match framed::connect(remote, &options).await {
            Ok(association) => association,
            Err(e) => {
                error!("{}", e);
                let stats = SendStats {
                    aborted: true,
                    ..SendStats::new(self.config.length)
                };
                self.sink.on_report(Report::Summary(stats.clone()));
                return Ok(stats);
            }
        };
        if self.config.verbose {
            let sizes = association.buffer_sizes();
            self.sink.on_report(Report::BufferSize {
                kind: BufferKind::Send,
                bytes: sizes.send,
            });
        }

        self.run_with(&mut association).await
    }

    /// Runs the test on an established association.
    pub async fn run_with<A: Association + ?Sized>(&self, association: &mut A) -> Result<SendStats> {
        let pacer = SendPacer::new(
            self.config.length,
            self.config.streams,
            self.config.ordering(),
            self.reliability(),
            self.config.messages,
        )
        .with_verbosity(self.config.verbose, self.config.very_verbose);

        let _timer = self
            .config
            .runtime
            .map(|runtime| RunTimer::arm(runtime, self.cancellation_token.clone()));

        let stats = pacer
            .run(association, &self.cancellation_token, self.sink.as_ref())
            .await;
        if stats.aborted {
            info!("Run aborted after {} messages", stats.messages);
        }
        self.sink.on_report(Report::Summary(stats.clone()));
        Ok(stats)
    }
}
