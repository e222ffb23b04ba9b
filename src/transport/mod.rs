//! The message-oriented transport the measurement engine runs on.
//!
//! An [`Association`] is a connected, multi-streamed channel that delivers
//! messages in one or more fragments and interleaves transport
//! notifications with data. An [`Acceptor`] yields associations on the
//! listening side. Two implementations ship with the crate:
//!
//! - [`framed`]: associations carried over TCP with a record framing, used
//!   by the command line tool.
//! - [`sim`]: in-process association pairs over channels, for tests.

pub mod framed;
pub mod segment;
pub mod sim;

use crate::protocol::{RecvEvent, SendInfo};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

/// Address of an association endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
}

impl Endpoint {
    pub fn port(&self) -> u16 {
        match self {
            Endpoint::V4(addr) => addr.port(),
            Endpoint::V6(addr) => addr.port(),
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, Endpoint::V4(_))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Endpoint::V4(v4),
            SocketAddr::V6(v6) => Endpoint::V6(v6),
        }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::V4(v4) => SocketAddr::V4(v4),
            Endpoint::V6(v6) => SocketAddr::V6(v6),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::V4(addr) => write!(f, "{}:{}", addr.ip(), addr.port()),
            Endpoint::V6(addr) => write!(f, "{}:{}", addr.ip(), addr.port()),
        }
    }
}

/// A connected association.
///
/// `#[async_trait]` keeps the trait usable as `Box<dyn Association>`.
#[async_trait]
pub trait Association: Send {
    /// Sends one message.
    ///
    /// Blocks until the transport has accepted the whole payload. A message
    /// sent with `info.eof` set is the last one: the transport begins an
    /// orderly shutdown of the sending direction after it.
    async fn send(&mut self, payload: &[u8], info: &SendInfo) -> Result<()>;

    /// Receives the next event into `buf`.
    ///
    /// Returns `Ok(None)` once the peer has shut down in order. A message
    /// longer than `buf` is delivered across several calls; only the last
    /// one carries the end-of-record flag.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<Option<RecvEvent>>;

    /// Shuts the association down. Calling it more than once is harmless.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<A: Association + ?Sized> Association for Box<A> {
    async fn send(&mut self, payload: &[u8], info: &SendInfo) -> Result<()> {
        (**self).send(payload, info).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<Option<RecvEvent>> {
        (**self).recv(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Source of incoming associations on the listening side.
#[async_trait]
pub trait Acceptor: Send + Sync {
    type Association: Association + 'static;

    /// Waits for the next association and returns it with the peer address.
    async fn accept(&self) -> Result<(Self::Association, Endpoint)>;
}
