use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use log::info;
use sctperf::{AddressFamily, Client, Config, Server};
use std::net::IpAddr;
use std::time::Duration;

/// Without an address, listens and reports what arrives; with one, sends.
#[derive(Parser)]
#[command(name = "sctperf")]
#[command(about = "Throughput test for message-oriented, multi-streamed transports", long_about = None)]
struct Cli {
    /// Destination address; runs as sender when given
    address: Option<IpAddr>,

    /// Adaptation layer indication
    #[arg(short = 'a', value_name = "IND")]
    adaptation: Option<u32>,

    /// Chunk type to authenticate (repeatable)
    #[arg(short = 'A', value_name = "TYPE")]
    auth_chunks: Vec<u8>,

    /// Rate report interval in seconds; 0 disables
    #[arg(short = 'd', value_name = "SECS", default_value_t = 0)]
    interval: u64,

    /// Disable send coalescing
    #[arg(short = 'D')]
    no_delay: bool,

    /// Fragmentation point in bytes
    #[arg(short = 'f', value_name = "BYTES", default_value_t = 0)]
    fragment_point: usize,

    /// Enable message interleaving
    #[arg(short = 'I')]
    interleave: bool,

    /// Message length in bytes
    #[arg(short = 'l', value_name = "BYTES", default_value_t = sctperf::protocol::DEFAULT_LENGTH)]
    length: usize,

    /// Local address to bind (repeatable)
    #[arg(short = 'L', value_name = "ADDR")]
    local: Vec<IpAddr>,

    /// Number of messages to send; 0 needs -T
    #[arg(short = 'n', value_name = "COUNT", default_value_t = sctperf::protocol::DEFAULT_NUMBER_OF_MESSAGES)]
    messages: u64,

    /// Port
    #[arg(short = 'p', default_value_t = sctperf::protocol::DEFAULT_PORT)]
    port: u16,

    /// Partial reliability policy: 0 none, 1 ttl, 2 rtx, 3 buf
    #[arg(short = 'P', value_name = "POLICY", default_value_t = 0)]
    policy: u32,

    /// Receive buffer size in bytes
    #[arg(short = 'R', value_name = "BYTES")]
    recv_buffer: Option<u32>,

    /// Number of outbound streams
    #[arg(short = 's', value_name = "STREAMS", default_value_t = 1)]
    streams: u16,

    /// Send buffer size in bytes
    #[arg(short = 'S', value_name = "BYTES")]
    send_buffer: Option<u32>,

    /// Policy value (time-to-live in ms, retransmissions or priority)
    #[arg(short = 't', value_name = "VALUE", default_value_t = 0)]
    policy_value: u32,

    /// Run time in seconds; makes the message count unbounded
    #[arg(short = 'T', value_name = "SECS")]
    runtime: Option<u64>,

    /// Send unordered messages
    #[arg(short = 'u')]
    unordered: bool,

    /// UDP encapsulation port
    #[arg(short = 'U', value_name = "PORT")]
    udp_encaps_port: Option<u16>,

    /// Verbose
    #[arg(short = 'v')]
    verbose: bool,

    /// Very verbose, traces every message
    #[arg(short = 'V')]
    very_verbose: bool,

    /// IPv4 only
    #[arg(short = '4', conflicts_with = "ipv6_only")]
    ipv4_only: bool,

    /// IPv6 only
    #[arg(short = '6')]
    ipv6_only: bool,

    /// Print reports as JSON lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn family(&self) -> AddressFamily {
        if self.ipv4_only {
            AddressFamily::V4Only
        } else if self.ipv6_only {
            AddressFamily::V6Only
        } else {
            AddressFamily::Any
        }
    }

    fn into_config(self) -> Config {
        let family = self.family();
        let mut config = match self.address {
            Some(addr) => Config::client(addr, self.port),
            None => Config::server(self.port),
        }
        .with_length(self.length)
        .with_messages(self.messages)
        .with_streams(self.streams)
        .with_policy(self.policy, self.policy_value)
        .with_unordered(self.unordered)
        .with_interval(self.interval)
        .with_family(family)
        .with_fragment_point(self.fragment_point)
        .with_no_delay(self.no_delay)
        .with_verbose(self.verbose)
        .with_very_verbose(self.very_verbose)
        .with_json(self.json);

        if let Some(secs) = self.runtime {
            config = config.with_runtime(Duration::from_secs(secs));
        }
        if let Some(adaptation) = self.adaptation {
            config = config.with_adaptation(adaptation);
        }
        for addr in self.local {
            config = config.with_local_addr(addr);
        }
        config.auth_chunks = self.auth_chunks;
        config.interleave = self.interleave;
        config.send_buffer = self.send_buffer;
        config.recv_buffer = self.recv_buffer;
        config.udp_encaps_port = self.udp_encaps_port;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.very_verbose {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = cli.into_config();
    if let Err(e) = config.validate() {
        Cli::command().error(ErrorKind::ValueValidation, e).exit();
    }

    if config.server_addr.is_some() {
        let client = Client::new(config)?;
        let token = client.cancellation_token().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, sending the final message");
                token.cancel();
            }
        });
        client.run().await?;
    } else {
        let server = Server::new(config)?;
        let token = server.cancellation_token().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        server.run().await?;
    }

    Ok(())
}
