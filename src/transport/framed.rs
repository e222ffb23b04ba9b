//! Associations carried over TCP.
//!
//! Each message is split into records (see [`crate::frame`]) that carry the
//! stream, sequence numbers, ordering and reliability of the message. The
//! connecting side opens with an init record announcing its outbound stream
//! count and adaptation indication; the accepting side answers lazily,
//! before the first message it sends.
//!
//! TCP never abandons data, so every partial-reliability policy is honored
//! in its strictest form: the policy travels with the message and is
//! reported on the receive side.

use crate::frame::{adaptation_notification, FrameHeader, FrameKind, InitChunk};
use crate::protocol::{RecvEvent, SendInfo, LINGER_SECS};
use crate::transport::segment::{check_stream, Inbound, Segmenter};
use crate::transport::{Acceptor, Association, Endpoint};
use crate::{Error, Result};
use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Backlog of the listening socket.
const LISTEN_BACKLOG: u32 = 100;

/// Socket and association options shared by both roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Outbound streams announced to the peer
    pub streams: u16,
    /// Largest fragment payload; zero leaves fragmentation to the transport
    pub fragment_point: usize,
    /// Adaptation layer indication; zero sends none
    pub adaptation: u32,
    pub no_delay: bool,
    pub send_buffer: Option<u32>,
    pub recv_buffer: Option<u32>,
    /// Restrict an IPv6 socket to IPv6 peers
    pub v6_only: bool,
    /// Local addresses to bind; only the first one is used
    pub local_addrs: Vec<IpAddr>,
    pub auth_chunks: bool,
    pub interleave: bool,
    pub udp_encaps_port: Option<u16>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            streams: 1,
            fragment_point: 0,
            adaptation: 0,
            no_delay: false,
            send_buffer: None,
            recv_buffer: None,
            v6_only: false,
            local_addrs: Vec::new(),
            auth_chunks: false,
            interleave: false,
            udp_encaps_port: None,
        }
    }
}

impl TransportOptions {
    /// Requested options this transport accepts but cannot honor.
    pub fn unsupported(&self) -> Vec<String> {
        let mut ignored = Vec::new();
        if self.auth_chunks {
            ignored.push("chunk authentication is not available, option ignored".to_string());
        }
        if self.interleave {
            ignored.push("message interleaving is not available, option ignored".to_string());
        }
        if let Some(port) = self.udp_encaps_port {
            ignored.push(format!(
                "UDP encapsulation on port {} is not available, option ignored",
                port
            ));
        }
        if self.local_addrs.len() > 1 {
            ignored.push(format!(
                "multi-homing is not available, binding only {}",
                self.local_addrs[0]
            ));
        }
        ignored
    }
}

/// Socket buffer sizes in effect after the options were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSizes {
    pub send: u32,
    pub recv: u32,
}

/// Applies the socket options of `options` to `socket`.
///
/// Options the platform refuses are returned as messages instead of
/// errors; the socket stays usable without them.
fn apply_options(socket: &TcpSocket, ipv6: bool, options: &TransportOptions) -> Vec<String> {
    let mut failures = Vec::new();
    if ipv6 {
        if let Err(e) = set_v6_only(socket, options.v6_only) {
            failures.push(format!("setsockopt IPV6_V6ONLY: {}", e));
        }
    }
    if let Some(size) = options.send_buffer {
        if let Err(e) = socket.set_send_buffer_size(size) {
            failures.push(format!("setsockopt SO_SNDBUF: {}", e));
        }
    }
    if let Some(size) = options.recv_buffer {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            failures.push(format!("setsockopt SO_RCVBUF: {}", e));
        }
    }
    failures
}

fn new_socket(addr: &SocketAddr, options: &TransportOptions) -> Result<TcpSocket> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    for failure in apply_options(&socket, addr.is_ipv6(), options) {
        warn!("{}", failure);
    }
    Ok(socket)
}

fn buffer_sizes(socket: &TcpSocket) -> Result<BufferSizes> {
    Ok(BufferSizes {
        send: socket.send_buffer_size()?,
        recv: socket.recv_buffer_size()?,
    })
}

#[cfg(unix)]
fn set_v6_only(socket: &TcpSocket, only: bool) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let value: libc::c_int = only.into();
    // SAFETY: the descriptor is owned by `socket` and `value` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_V6ONLY,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_v6_only(_socket: &TcpSocket, only: bool) -> Result<()> {
    if only {
        debug!("IPV6_V6ONLY is not settable on this platform");
    }
    Ok(())
}

/// Opens an association to `remote`.
///
/// # Errors
///
/// Returns `Error::Connection` if the peer refuses the connection, or an
/// I/O error if no socket can be created. Socket options that cannot be
/// applied are logged and skipped.
pub async fn connect(remote: SocketAddr, options: &TransportOptions) -> Result<FramedAssociation> {
    let socket = new_socket(&remote, options)?;
    if let Some(local) = options.local_addrs.first() {
        socket.bind(SocketAddr::new(*local, 0))?;
    }
    let sizes = buffer_sizes(&socket)?;

    let stream = socket
        .connect(remote)
        .await
        .map_err(|e| Error::Connection(format!("connect to {}: {}", remote, e)))?;

    let mut association = FramedAssociation::new(stream, options, sizes);
    association.send_init().await?;
    debug!("Association with {} established", remote);
    Ok(association)
}

/// Listening side of the framed transport.
pub struct FramedListener {
    listener: TcpListener,
    options: TransportOptions,
    sizes: BufferSizes,
}

impl FramedListener {
    /// Binds to `port` on the first local address, or on the wildcard
    /// address of the preferred family when none is given.
    pub fn bind(port: u16, prefer_v4: bool, options: TransportOptions) -> Result<Self> {
        let ip = match options.local_addrs.first() {
            Some(ip) => *ip,
            None if prefer_v4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            None => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let addr = SocketAddr::new(ip, port);

        let socket = new_socket(&addr, &options)?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let sizes = buffer_sizes(&socket)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        debug!("Listening on {}", addr);
        Ok(Self {
            listener,
            options,
            sizes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn buffer_sizes(&self) -> BufferSizes {
        self.sizes
    }
}

#[async_trait]
impl Acceptor for FramedListener {
    type Association = FramedAssociation;

    async fn accept(&self) -> Result<(FramedAssociation, Endpoint)> {
        let (stream, peer) = self.listener.accept().await?;
        let association = FramedAssociation::new(stream, &self.options, self.sizes);
        Ok((association, Endpoint::from(peer)))
    }
}

/// One association over a TCP connection.
pub struct FramedAssociation {
    reader: BufReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    segmenter: Segmenter,
    adaptation: u32,
    init_sent: bool,
    peer_streams: Option<u16>,
    notifications: VecDeque<Vec<u8>>,
    inbound: Option<Inbound>,
    out: Vec<u8>,
    sizes: BufferSizes,
    closed: bool,
}

impl FramedAssociation {
    fn new(stream: TcpStream, options: &TransportOptions, sizes: BufferSizes) -> Self {
        if let Err(e) = stream.set_nodelay(options.no_delay) {
            warn!("setsockopt TCP_NODELAY: {}", e);
        }
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: Some(write),
            segmenter: Segmenter::new(options.streams, options.fragment_point),
            adaptation: options.adaptation,
            init_sent: false,
            peer_streams: None,
            notifications: VecDeque::new(),
            inbound: None,
            out: Vec::new(),
            sizes,
            closed: false,
        }
    }

    pub fn buffer_sizes(&self) -> BufferSizes {
        self.sizes
    }

    /// Inbound stream count announced by the peer, once its init arrived.
    pub fn peer_streams(&self) -> Option<u16> {
        self.peer_streams
    }

    async fn send_init(&mut self) -> Result<()> {
        let chunk = InitChunk {
            streams: self.segmenter.streams(),
            adaptation: self.adaptation,
        };
        self.out.clear();
        self.out.extend_from_slice(&FrameHeader::init().to_bytes());
        self.out.extend_from_slice(&chunk.to_bytes());

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Transport("association is shut down for sending".to_string()))?;
        writer.write_all(&self.out).await?;

        self.init_sent = true;
        Ok(())
    }

    /// Reads one record header; `None` on a clean end of stream.
    async fn read_header(&mut self) -> Result<Option<FrameHeader>> {
        let mut bytes = [0u8; FrameHeader::SIZE];
        let mut filled = 0;
        while filled < bytes.len() {
            let n = self.reader.read(&mut bytes[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Protocol(format!(
                    "connection closed inside a record header after {} bytes",
                    filled
                )));
            }
            filled += n;
        }
        FrameHeader::from_bytes(&bytes).map(Some)
    }

    async fn read_body(&mut self, length: u32) -> Result<Vec<u8>> {
        let mut body = vec![0u8; length as usize];
        self.reader.read_exact(&mut body).await?;
        Ok(body)
    }

    async fn on_init(&mut self, header: FrameHeader) -> Result<()> {
        if self.peer_streams.is_some() {
            return Err(Error::Protocol("duplicate init record".to_string()));
        }
        let body = self.read_body(header.length).await?;
        let chunk = InitChunk::from_bytes(&body)?;
        trace!(
            "Peer init: {} streams, adaptation 0x{:08x}",
            chunk.streams,
            chunk.adaptation
        );
        self.peer_streams = Some(chunk.streams);
        if chunk.adaptation != 0 {
            self.notifications
                .push_back(adaptation_notification(chunk.adaptation));
        }
        Ok(())
    }
}

#[async_trait]
impl Association for FramedAssociation {
    async fn send(&mut self, payload: &[u8], info: &SendInfo) -> Result<()> {
        if !self.init_sent {
            self.send_init().await?;
        }

        let fragments = self.segmenter.segment(payload.len(), info)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Transport("association is shut down for sending".to_string()))?;
        for (header, range) in fragments {
            self.out.clear();
            self.out.extend_from_slice(&header.to_bytes());
            self.out.extend_from_slice(&payload[range]);
            writer.write_all(&self.out).await?;
        }

        if info.eof {
            if let Some(mut writer) = self.writer.take() {
                writer.shutdown().await?;
            }
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<Option<RecvEvent>> {
        loop {
            if let Some(body) = self.notifications.pop_front() {
                let len = body.len().min(buf.len());
                buf[..len].copy_from_slice(&body[..len]);
                return Ok(Some(RecvEvent::Notification { len }));
            }

            if let Some(inbound) = self.inbound.as_mut() {
                let want = inbound.remaining().min(buf.len());
                self.reader.read_exact(&mut buf[..want]).await?;
                let event = inbound.take(want);
                if inbound.is_done() {
                    self.inbound = None;
                }
                return Ok(Some(event));
            }

            let header = match self.read_header().await? {
                Some(header) => header,
                None => return Ok(None),
            };

            match header.kind {
                FrameKind::Init => self.on_init(header).await?,
                FrameKind::Notification => {
                    let body = self.read_body(header.length).await?;
                    self.notifications.push_back(body);
                }
                FrameKind::Data => {
                    let streams = self.peer_streams.ok_or_else(|| {
                        Error::Protocol("data record before init".to_string())
                    })?;
                    check_stream(&header, streams)?;
                    self.inbound = Some(Inbound::new(header));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown failed: {}", e);
            }
        }

        // Give queued data time to drain: wait for the peer to finish its
        // side, discarding anything it still sends.
        let linger = Duration::from_secs(LINGER_SECS);
        let mut sink = [0u8; 4096];
        let drained = tokio::time::timeout(linger, async {
            loop {
                match self.reader.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("Peer did not close within {}s", LINGER_SECS);
        }
        Ok(())
    }
}
