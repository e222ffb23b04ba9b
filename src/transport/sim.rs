//! In-process associations over channels.
//!
//! A [`pair`] behaves like the two ends of a real association: messages are
//! fragmented and delivered in pieces no larger than the receive buffer,
//! stream sequence numbers are kept per stream and the receiving end sees
//! `Ok(None)` once the sender has shut down. Tests can inject notifications
//! and make sends fail after a given number of messages.

use crate::frame::FrameHeader;
use crate::protocol::{RecvEvent, SendInfo};
use crate::transport::segment::{check_stream, Inbound, Segmenter};
use crate::transport::{Acceptor, Association, Endpoint};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Records in flight per direction before a sender waits.
const CHANNEL_DEPTH: usize = 64;

#[derive(Debug)]
struct SimRecord {
    header: FrameHeader,
    payload: Vec<u8>,
}

/// One end of an in-process association.
pub struct SimAssociation {
    tx: Option<mpsc::Sender<SimRecord>>,
    rx: mpsc::Receiver<SimRecord>,
    segmenter: Segmenter,
    peer_streams: u16,
    current: Option<(Inbound, Vec<u8>, usize)>,
    sends: u64,
    fail_after: Option<u64>,
}

/// Creates two connected ends, each with `streams` streams in both
/// directions.
pub fn pair(streams: u16, fragment_point: usize) -> (SimAssociation, SimAssociation) {
    let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
    (
        SimAssociation::new(a_tx, a_rx, streams, fragment_point),
        SimAssociation::new(b_tx, b_rx, streams, fragment_point),
    )
}

impl SimAssociation {
    fn new(
        tx: mpsc::Sender<SimRecord>,
        rx: mpsc::Receiver<SimRecord>,
        streams: u16,
        fragment_point: usize,
    ) -> Self {
        Self {
            tx: Some(tx),
            rx,
            segmenter: Segmenter::new(streams, fragment_point),
            peer_streams: streams,
            current: None,
            sends: 0,
            fail_after: None,
        }
    }

    /// Makes every send after the first `sends` fail.
    pub fn fail_sends_after(&mut self, sends: u64) {
        self.fail_after = Some(sends);
    }

    /// Messages accepted by `send` so far.
    pub fn sends(&self) -> u64 {
        self.sends
    }

    /// Delivers a transport notification to the peer.
    pub async fn notify_peer(&mut self, body: Vec<u8>) -> Result<()> {
        let record = SimRecord {
            header: FrameHeader::notification(body.len() as u32),
            payload: body,
        };
        self.push(record).await
    }

    async fn push(&mut self, record: SimRecord) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Transport("association is shut down for sending".to_string()))?;
        tx.send(record)
            .await
            .map_err(|_| Error::Connection("peer went away".to_string()))
    }
}

#[async_trait]
impl Association for SimAssociation {
    async fn send(&mut self, payload: &[u8], info: &SendInfo) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if self.sends >= limit {
                return Err(Error::Transport("injected send failure".to_string()));
            }
        }

        let fragments = self.segmenter.segment(payload.len(), info)?;
        for (header, range) in fragments {
            let record = SimRecord {
                header,
                payload: payload[range].to_vec(),
            };
            self.push(record).await?;
        }
        self.sends += 1;

        if info.eof {
            self.tx = None;
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<Option<RecvEvent>> {
        if self.current.is_none() {
            let record = match self.rx.recv().await {
                Some(record) => record,
                None => return Ok(None),
            };

            if record.header.is_data() {
                check_stream(&record.header, self.peer_streams)?;
                self.current = Some((Inbound::new(record.header), record.payload, 0));
            } else {
                let len = record.payload.len().min(buf.len());
                buf[..len].copy_from_slice(&record.payload[..len]);
                return Ok(Some(RecvEvent::Notification { len }));
            }
        }

        let Some((inbound, payload, offset)) = self.current.as_mut() else {
            return Ok(None);
        };
        let want = inbound.remaining().min(buf.len());
        buf[..want].copy_from_slice(&payload[*offset..*offset + want]);
        *offset += want;
        let event = inbound.take(want);
        if inbound.is_done() {
            self.current = None;
        }
        Ok(Some(event))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

/// Accepting side of a simulated listener.
pub struct SimListener {
    incoming: Mutex<mpsc::UnboundedReceiver<(SimAssociation, Endpoint)>>,
}

/// Connecting side of a simulated listener.
#[derive(Clone)]
pub struct SimConnector {
    outgoing: mpsc::UnboundedSender<(SimAssociation, Endpoint)>,
    streams: u16,
    fragment_point: usize,
    next_port: Arc<AtomicU16>,
}

/// Creates a listener and a connector that hands it new associations.
pub fn listener(streams: u16, fragment_point: usize) -> (SimListener, SimConnector) {
    let (outgoing, incoming) = mpsc::unbounded_channel();
    (
        SimListener {
            incoming: Mutex::new(incoming),
        },
        SimConnector {
            outgoing,
            streams,
            fragment_point,
            next_port: Arc::new(AtomicU16::new(40000)),
        },
    )
}

impl SimConnector {
    /// Opens an association; the listener sees it from a loopback address.
    pub fn connect(&self) -> Result<SimAssociation> {
        let (local, remote) = pair(self.streams, self.fragment_point);
        let port = self.next_port.fetch_add(1, AtomicOrdering::Relaxed);
        let peer = Endpoint::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        self.outgoing
            .send((remote, peer))
            .map_err(|_| Error::Connection("listener is gone".to_string()))?;
        Ok(local)
    }
}

#[async_trait]
impl Acceptor for SimListener {
    type Association = SimAssociation;

    /// Waits forever once every connector is dropped, like an idle socket.
    async fn accept(&self) -> Result<(SimAssociation, Endpoint)> {
        let next = self.incoming.lock().await.recv().await;
        match next {
            Some(accepted) => Ok(accepted),
            None => std::future::pending().await,
        }
    }
}
