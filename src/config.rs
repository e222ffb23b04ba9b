use crate::protocol::{
    Ordering, DEFAULT_LENGTH, DEFAULT_NUMBER_OF_MESSAGES, DEFAULT_PORT, MAX_LOCAL_ADDRS,
};
use crate::transport::framed::TransportOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Role of this instance.
///
/// The command line tool derives it from the presence of a destination
/// address: without one it listens, with one it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Accept associations and measure what arrives
    Server,
    /// Connect and send messages
    Client,
}

/// Address family restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv6 sockets that also accept IPv4 peers
    #[default]
    Any,
    V4Only,
    V6Only,
}

impl AddressFamily {
    /// Checks that `addr` may be used under this restriction.
    pub fn check(self, addr: &IpAddr) -> Result<()> {
        match (self, addr) {
            (AddressFamily::V4Only, IpAddr::V6(_)) => Err(Error::Config(
                "Can't use IPv6 address when IPv4 only".to_string(),
            )),
            (AddressFamily::V6Only, IpAddr::V4(_)) => Err(Error::Config(
                "Can't use IPv4 address when IPv6 only".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Configuration of one run.
///
/// Built once before any association exists and shared read-only
/// afterwards.
///
/// # Examples
///
/// ```
/// use sctperf::Config;
/// use std::time::Duration;
///
/// let config = Config::client("127.0.0.1".parse().unwrap(), 5001)
///     .with_length(4096)
///     .with_streams(4)
///     .with_runtime(Duration::from_secs(10));
///
/// assert_eq!(config.messages, 0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,

    pub port: u16,

    /// Destination (client mode)
    pub server_addr: Option<IpAddr>,

    /// Local addresses to bind, at most `MAX_LOCAL_ADDRS`
    pub local_addrs: Vec<IpAddr>,

    pub family: AddressFamily,

    /// Payload length of every message in bytes
    pub length: usize,

    /// Messages to send, the final one included; 0 runs until `runtime`
    pub messages: u64,

    /// Outbound streams
    pub streams: u16,

    /// Partial-reliability policy code: 0 none, 1 ttl, 2 rtx, 3 buf
    pub policy: u32,

    /// Parameter of the policy
    pub policy_value: u32,

    /// Wall-clock bound of a sender run
    pub runtime: Option<Duration>,

    pub unordered: bool,

    /// Rate report interval in seconds; 0 disables rate samples
    pub interval: u64,

    /// Adaptation layer indication; 0 sends none
    pub adaptation: u32,

    /// Chunk types to authenticate
    pub auth_chunks: Vec<u8>,

    /// Disable send coalescing
    pub no_delay: bool,

    /// Fragmentation point; 0 leaves it to the transport
    pub fragment_point: usize,

    pub interleave: bool,

    pub send_buffer: Option<u32>,

    pub recv_buffer: Option<u32>,

    pub udp_encaps_port: Option<u16>,

    pub verbose: bool,

    /// Trace every message; implies `verbose`
    pub very_verbose: bool,

    /// Print reports as JSON lines
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            port: DEFAULT_PORT,
            server_addr: None,
            local_addrs: Vec::new(),
            family: AddressFamily::Any,
            length: DEFAULT_LENGTH,
            messages: DEFAULT_NUMBER_OF_MESSAGES,
            streams: 1,
            policy: 0,
            policy_value: 0,
            runtime: None,
            unordered: false,
            interval: 0,
            adaptation: 0,
            auth_chunks: Vec::new(),
            no_delay: false,
            fragment_point: 0,
            interleave: false,
            send_buffer: None,
            recv_buffer: None,
            udp_encaps_port: None,
            verbose: false,
            very_verbose: false,
            json: false,
        }
    }
}

impl Config {
    /// Listening configuration on `port`.
    ///
    /// ```
    /// use sctperf::{Config, config::Mode};
    ///
    /// let config = Config::server(5001);
    /// assert_eq!(config.mode, Mode::Server);
    /// ```
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Sending configuration towards `server_addr:port`.
    pub fn client(server_addr: IpAddr, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_messages(mut self, messages: u64) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_streams(mut self, streams: u16) -> Self {
        self.streams = streams;
        self
    }

    /// Selects the partial-reliability policy by code and parameter.
    pub fn with_policy(mut self, policy: u32, value: u32) -> Self {
        self.policy = policy;
        self.policy_value = value;
        self
    }

    /// Bounds the run by wall-clock time. The message count becomes
    /// unbounded.
    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = Some(runtime);
        self.messages = 0;
        self
    }

    pub fn with_unordered(mut self, unordered: bool) -> Self {
        self.unordered = unordered;
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval = seconds;
        self
    }

    pub fn with_local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addrs.push(addr);
        self
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_fragment_point(mut self, fragment_point: usize) -> Self {
        self.fragment_point = fragment_point;
        self
    }

    pub fn with_adaptation(mut self, adaptation: u32) -> Self {
        self.adaptation = adaptation;
        self
    }

    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Per-message tracing. Turns on `verbose` as well.
    pub fn with_very_verbose(mut self, very_verbose: bool) -> Self {
        self.very_verbose = very_verbose;
        if very_verbose {
            self.verbose = true;
        }
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn ordering(&self) -> Ordering {
        Ordering::from_unordered(self.unordered)
    }

    /// Options handed to the transport.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            streams: self.streams,
            fragment_point: self.fragment_point,
            adaptation: self.adaptation,
            no_delay: self.no_delay,
            send_buffer: self.send_buffer,
            recv_buffer: self.recv_buffer,
            v6_only: self.family == AddressFamily::V6Only,
            local_addrs: self.local_addrs.clone(),
            auth_chunks: !self.auth_chunks.is_empty(),
            interleave: self.interleave,
            udp_encaps_port: self.udp_encaps_port,
        }
    }

    /// Checks the configuration before any socket is opened.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when an address does not fit the family
    /// restriction, too many local addresses are given, the stream count or
    /// message length is zero, or a sender has neither a message count nor
    /// a run time.
    pub fn validate(&self) -> Result<()> {
        if self.local_addrs.len() > MAX_LOCAL_ADDRS {
            return Err(Error::Config(format!(
                "At most {} local addresses can be bound, got {}",
                MAX_LOCAL_ADDRS,
                self.local_addrs.len()
            )));
        }
        for addr in &self.local_addrs {
            self.family.check(addr)?;
        }
        if self.streams == 0 {
            return Err(Error::Config("Stream count must be at least 1".to_string()));
        }

        if self.mode == Mode::Client {
            let server_addr = self
                .server_addr
                .ok_or_else(|| Error::Config("Client mode needs a server address".to_string()))?;
            self.family.check(&server_addr)?;
            if self.length == 0 {
                return Err(Error::Config("Message length must be at least 1".to_string()));
            }
            if self.messages == 0 && self.runtime.is_none() {
                return Err(Error::Config(
                    "An unbounded message count needs a run time".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn v6() -> IpAddr {
        IpAddr::V6(Ipv6Addr::LOCALHOST)
    }

    #[test]
    fn test_defaults() {
        let config = Config::client(v4(), DEFAULT_PORT);
        assert_eq!(config.length, 1024);
        assert_eq!(config.messages, 1024);
        assert_eq!(config.port, 5001);
        assert_eq!(config.streams, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runtime_unbounds_count() {
        let config = Config::client(v4(), 5001)
            .with_messages(50)
            .with_runtime(Duration::from_secs(2));
        assert_eq!(config.messages, 0);
        assert_eq!(config.runtime, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_unbounded_without_runtime_is_rejected() {
        let config = Config::client(v4(), 5001).with_messages(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_family_restrictions() {
        let err = Config::client(v6(), 5001)
            .with_family(AddressFamily::V4Only)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("Can't use IPv6 address when IPv4 only"));

        let err = Config::server(5001)
            .with_local_addr(v4())
            .with_family(AddressFamily::V6Only)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("Can't use IPv4 address when IPv6 only"));

        assert!(Config::server(5001)
            .with_local_addr(v6())
            .with_family(AddressFamily::V6Only)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_too_many_local_addrs() {
        let mut config = Config::server(5001);
        for _ in 0..=MAX_LOCAL_ADDRS {
            config = config.with_local_addr(v4());
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_streams_rejected() {
        assert!(Config::server(5001).with_streams(0).validate().is_err());
    }

    #[test]
    fn test_very_verbose_implies_verbose() {
        let config = Config::server(5001).with_very_verbose(true);
        assert!(config.verbose);
    }

    #[test]
    fn test_transport_options() {
        let config = Config::client(v6(), 5001)
            .with_streams(3)
            .with_fragment_point(500)
            .with_family(AddressFamily::V6Only)
            .with_no_delay(true);
        let options = config.transport_options();
        assert_eq!(options.streams, 3);
        assert_eq!(options.fragment_point, 500);
        assert!(options.v6_only);
        assert!(options.no_delay);
        assert!(!options.auth_chunks);
    }
}
