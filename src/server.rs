use crate::accumulator::ReceiveAccumulator;
use crate::buffer_pool::BufferPool;
use crate::config::{AddressFamily, Config, Mode};
use crate::measurements::ReceiveStats;
use crate::protocol::{RecvEvent, RECEIVE_BUFFER_SIZE};
use crate::report::{BufferKind, ConsoleSink, Report, ReportSink};
use crate::round_window::wall_clock;
use crate::transport::framed::FramedListener;
use crate::transport::{Acceptor, Association, Endpoint};
use crate::{Error, Result};
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Idle receive buffers kept between connections.
const POOLED_BUFFERS: usize = 16;

/// Throughput test receiver.
///
/// The `Server` accepts associations from one listening endpoint and runs
/// an independent connection worker for each of them. Workers are not
/// tracked once started; each one prints its completion line and releases
/// its association and buffer when the peer goes away.
///
/// # Examples
///
/// ```no_run
/// use sctperf::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::server(5001).with_interval(1);
/// let server = Server::new(config)?;
///
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    sink: Arc<dyn ReportSink>,
    buffer_pool: Arc<BufferPool>,
    cancellation_token: CancellationToken,
}

impl Server {
    /// Creates a server that prints its reports to stdout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid or not a
    /// server configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if config.mode != Mode::Server {
            return Err(Error::Config("Server needs a server configuration".to_string()));
        }
        let sink = Arc::new(ConsoleSink::new(config.json));
        Ok(Self {
            config,
            sink,
            buffer_pool: Arc::new(BufferPool::new(RECEIVE_BUFFER_SIZE, POOLED_BUFFERS)),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Routes reports to `sink` instead of stdout.
    pub fn with_sink<S: ReportSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Token that stops the accept loop when cancelled.
    ///
    /// Workers already running are not affected.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Binds the listening endpoint and accepts associations until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listening endpoint cannot be set up. Failed
    /// accepts are logged and do not end the loop.
    pub async fn run(&self) -> Result<()> {
        let options = self.config.transport_options();
        for ignored in options.unsupported() {
            self.sink.on_report(Report::Warning { message: ignored });
        }

        let prefer_v4 = self.config.family == AddressFamily::V4Only;
        let listener = FramedListener::bind(self.config.port, prefer_v4, options)?;
        info!("sctperf server listening on {}", listener.local_addr()?);

        if self.config.verbose {
            let sizes = listener.buffer_sizes();
            self.sink.on_report(Report::BufferSize {
                kind: BufferKind::Receive,
                bytes: sizes.recv,
            });
        }

        self.serve(listener).await
    }

    /// Accept loop over any association source.
    pub async fn serve<A: Acceptor>(&self, acceptor: A) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!("Accept loop cancelled");
                    return Ok(());
                }
                accepted = acceptor.accept() => accepted,
            };

            match accepted {
                Ok((association, peer)) => {
                    if self.config.verbose {
                        self.sink.on_report(Report::Accepted { peer });
                    }
                    debug!("New association from {}", peer);

                    let worker = Worker {
                        peer: Some(peer),
                        interval: self.config.interval,
                        very_verbose: self.config.very_verbose,
                        sink: Arc::clone(&self.sink),
                        buffer_pool: Arc::clone(&self.buffer_pool),
                    };
                    tokio::spawn(async move {
                        worker.run(association).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting association: {}", e);
                }
            }
        }
    }
}

/// Settings of one connection worker.
pub struct Worker {
    pub peer: Option<Endpoint>,
    /// Rate report interval in seconds; 0 disables rate samples
    pub interval: u64,
    pub very_verbose: bool,
    pub sink: Arc<dyn ReportSink>,
    pub buffer_pool: Arc<BufferPool>,
}

impl Worker {
    /// Receives until the peer shuts down or the association fails, then
    /// reports the session and closes the association.
    ///
    /// The elapsed time runs from the first receive event.
    pub async fn run<S: Association>(self, mut association: S) -> ReceiveStats {
        let mut buffer = self.buffer_pool.get();
        let mut accumulator = ReceiveAccumulator::new(self.interval);
        let mut started: Option<Instant> = None;

        loop {
            let event = match association.recv(&mut buffer).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    error!("Receive failed on association with {}: {}", self.describe_peer(), e);
                    break;
                }
            };
            started.get_or_insert_with(Instant::now);

            if self.very_verbose {
                self.trace(&event);
            }
            if let Some(sample) = accumulator.on_event(&event, wall_clock()) {
                self.sink.on_report(Report::Rate(sample));
            }
        }

        let elapsed = started.map(|t| t.elapsed()).unwrap_or_default();
        let stats = accumulator.finish(elapsed);
        self.sink.on_report(Report::Completed {
            peer: self.peer,
            stats: stats.clone(),
        });

        if let Err(e) = association.close().await {
            debug!("Closing association with {} failed: {}", self.describe_peer(), e);
        }
        stats
    }

    fn trace(&self, event: &RecvEvent) {
        match *event {
            RecvEvent::Notification { len } => {
                self.sink.on_report(Report::Notification { len });
            }
            RecvEvent::Data { len, info } => {
                self.sink.on_report(Report::Fragment { len, info });
            }
        }
    }

    fn describe_peer(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "peer".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Ordering, Reliability, SendInfo};
    use crate::transport::sim;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn collecting_sink() -> (Arc<dyn ReportSink>, Arc<Mutex<Vec<Report>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&reports);
        let sink: Arc<dyn ReportSink> = Arc::new(move |report: Report| log.lock().push(report));
        (sink, reports)
    }

    fn worker(sink: Arc<dyn ReportSink>, very_verbose: bool) -> Worker {
        Worker {
            peer: None,
            interval: 0,
            very_verbose,
            sink,
            buffer_pool: Arc::new(BufferPool::new(RECEIVE_BUFFER_SIZE, 1)),
        }
    }

    fn info(stream: u16, eof: bool) -> SendInfo {
        SendInfo {
            ppid: 39,
            stream,
            ordering: Ordering::Ordered,
            reliability: Reliability::Reliable,
            eof,
        }
    }

    #[test]
    fn test_server_rejects_client_config() {
        let config = Config::client("127.0.0.1".parse().unwrap(), 5001);
        assert!(Server::new(config).is_err());
    }

    #[tokio::test]
    async fn test_worker_counts_messages() {
        let (mut sender, receiver) = sim::pair(2, 0);
        let (sink, reports) = collecting_sink();

        let handle = tokio::spawn(worker(sink, false).run(receiver));
        for i in 0..4u16 {
            sender.send(&[0u8; 1000], &info(i % 2, i == 3)).await.unwrap();
        }
        let stats = handle.await.unwrap();

        assert_eq!(stats.messages, 4);
        assert_eq!(stats.first_length, 1000);
        assert_eq!(stats.bytes, 4000);
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(matches!(&reports[0], Report::Completed { stats, .. } if stats.messages == 4));
    }

    #[tokio::test]
    async fn test_worker_traces_large_messages_in_pieces() {
        let (mut sender, receiver) = sim::pair(1, 0);
        let (sink, reports) = collecting_sink();

        let handle = tokio::spawn(worker(sink, true).run(receiver));
        sender.notify_peer(vec![0u8; 8]).await.unwrap();
        sender
            .send(&vec![0u8; RECEIVE_BUFFER_SIZE + 10], &info(0, true))
            .await
            .unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.messages, 1);
        assert_eq!(stats.recv_calls, 3);
        assert_eq!(stats.notifications, 1);
        assert_eq!(stats.first_length, (RECEIVE_BUFFER_SIZE + 10) as u64);

        let reports = reports.lock();
        assert!(matches!(reports[0], Report::Notification { len: 8 }));
        assert!(matches!(
            reports[1],
            Report::Fragment { info, .. } if !info.end_of_record
        ));
        assert!(matches!(
            reports[2],
            Report::Fragment { len: 10, info } if info.end_of_record
        ));
        assert!(matches!(reports[3], Report::Completed { .. }));
    }

    struct Scripted {
        events: VecDeque<Result<Option<RecvEvent>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Association for Scripted {
        async fn send(&mut self, _payload: &[u8], _info: &SendInfo) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self, _buf: &mut [u8]) -> Result<Option<RecvEvent>> {
            self.events.pop_front().unwrap_or(Ok(None))
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_reports_and_closes_after_receive_error() {
        let closed = Arc::new(AtomicBool::new(false));
        let info = crate::protocol::RecvInfo {
            ppid: 39,
            stream: 0,
            ssn: 0,
            tsn: 0,
            ordering: Ordering::Ordered,
            reliability: Reliability::Reliable,
            end_of_record: true,
        };
        let association = Scripted {
            events: VecDeque::from(vec![
                Ok(Some(RecvEvent::Data { len: 512, info })),
                Err(Error::Transport("connection reset".to_string())),
                Ok(Some(RecvEvent::Data { len: 512, info })),
            ]),
            closed: Arc::clone(&closed),
        };
        let (sink, reports) = collecting_sink();
        let pool = Arc::new(BufferPool::new(RECEIVE_BUFFER_SIZE, 1));
        let worker = Worker {
            buffer_pool: Arc::clone(&pool),
            ..worker(sink, false)
        };

        let stats = worker.run(association).await;

        assert_eq!(stats.messages, 1);
        assert_eq!(stats.first_length, 512);
        assert_eq!(reports.lock().len(), 1);
        assert!(closed.load(AtomicOrdering::SeqCst));
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_accept_loop_spawns_workers_until_cancelled() {
        let (listener, connector) = sim::listener(1, 0);
        let (sink, reports) = collecting_sink();
        let server = Server::new(Config::server(0).with_verbose(true))
            .unwrap()
            .with_sink(move |r: Report| sink.on_report(r));
        let token = server.cancellation_token().clone();

        let serving = tokio::spawn(async move { server.serve(listener).await });

        for _ in 0..3 {
            let mut client = connector.connect().unwrap();
            client.send(&[0u8; 64], &info(0, true)).await.unwrap();
        }

        let completed = || {
            reports
                .lock()
                .iter()
                .filter(|r| matches!(r, Report::Completed { .. }))
                .count()
        };
        for _ in 0..100 {
            if completed() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(completed(), 3);
        let accepted = reports
            .lock()
            .iter()
            .filter(|r| matches!(r, Report::Accepted { .. }))
            .count();
        assert_eq!(accepted, 3);

        token.cancel();
        serving.await.unwrap().unwrap();
    }
}
