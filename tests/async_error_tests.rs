use sctperf::frame::{FrameHeader, InitChunk};
use sctperf::transport::framed::{self, FramedListener, TransportOptions};
use sctperf::transport::{Acceptor, Association};
use sctperf::{Client, Config, Error, Report};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

fn loopback_options() -> TransportOptions {
    TransportOptions {
        local_addrs: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        ..TransportOptions::default()
    }
}

/// Accepts one association and connects a raw TCP stream to it.
async fn raw_peer() -> (TcpStream, framed::FramedAssociation) {
    let listener = FramedListener::bind(0, true, loopback_options()).unwrap();
    let addr = listener.local_addr().unwrap();
    let (stream, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (stream.unwrap(), accepted.unwrap().0)
}

fn init_record(streams: u16) -> Vec<u8> {
    let mut bytes = FrameHeader::init().to_bytes().to_vec();
    bytes.extend_from_slice(
        &InitChunk {
            streams,
            adaptation: 0,
        }
        .to_bytes(),
    );
    bytes
}

/// Test that a refused connection ends the sender run with an empty summary
#[tokio::test]
async fn test_connect_refused_is_not_fatal() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = timeout(
        Duration::from_secs(5),
        framed::connect(addr, &TransportOptions::default()),
    )
    .await
    .expect("connect did not hang");
    assert!(matches!(result, Err(Error::Connection(_))));

    let summaries = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&summaries);
    let client = Client::new(Config::client(addr.ip(), addr.port()).with_messages(3))
        .unwrap()
        .with_sink(move |report: Report| {
            if let Report::Summary(stats) = report {
                log.lock().unwrap().push(stats);
            }
        });

    let stats = timeout(Duration::from_secs(5), client.run())
        .await
        .expect("run did not hang")
        .expect("run completes");
    assert_eq!(stats.messages, 0);
    assert!(stats.aborted);
    assert_eq!(*summaries.lock().unwrap(), vec![stats]);
}

/// Test handling of bytes that are not records
#[tokio::test]
async fn test_garbage_is_a_protocol_error() {
    let (mut raw, mut association) = raw_peer().await;
    raw.write_all(&[0xAB; FrameHeader::SIZE]).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let result = association.recv(&mut buf).await;
    assert!(matches!(result, Err(Error::Protocol(_))));
}

/// Test that data must follow an init record
#[tokio::test]
async fn test_data_before_init() {
    let (mut raw, mut association) = raw_peer().await;
    let header = FrameHeader::data(0, 0, 39, 0, true, false, 0, 0, 4);
    raw.write_all(&header.to_bytes()).await.unwrap();
    raw.write_all(b"data").await.unwrap();

    let mut buf = vec![0u8; 1024];
    let err = association.recv(&mut buf).await.unwrap_err();
    assert!(err.to_string().contains("before init"));
}

/// Test data on a stream the peer never announced
#[tokio::test]
async fn test_stream_out_of_range() {
    let (mut raw, mut association) = raw_peer().await;
    raw.write_all(&init_record(2)).await.unwrap();
    let header = FrameHeader::data(2, 0, 39, 0, true, false, 0, 0, 1);
    raw.write_all(&header.to_bytes()).await.unwrap();
    raw.write_all(b"x").await.unwrap();

    let mut buf = vec![0u8; 1024];
    assert!(matches!(
        association.recv(&mut buf).await,
        Err(Error::Protocol(_))
    ));
}

/// Test premature close inside a header
#[tokio::test]
async fn test_close_inside_header() {
    let (mut raw, mut association) = raw_peer().await;
    raw.write_all(&init_record(1)).await.unwrap();
    raw.write_all(&FrameHeader::notification(4).to_bytes()[..10])
        .await
        .unwrap();
    drop(raw);

    let mut buf = vec![0u8; 1024];
    assert!(matches!(
        association.recv(&mut buf).await,
        Err(Error::Protocol(_))
    ));
}

/// Test premature close inside a payload
#[tokio::test]
async fn test_close_inside_payload() {
    let (mut raw, mut association) = raw_peer().await;
    raw.write_all(&init_record(1)).await.unwrap();
    let header = FrameHeader::data(0, 0, 39, 0, true, false, 0, 0, 100);
    raw.write_all(&header.to_bytes()).await.unwrap();
    raw.write_all(&[0u8; 10]).await.unwrap();
    drop(raw);

    let mut buf = vec![0u8; 1024];
    assert!(matches!(association.recv(&mut buf).await, Err(Error::Io(_))));
}

/// Test a clean close between records
#[tokio::test]
async fn test_clean_close_between_records() {
    let (mut raw, mut association) = raw_peer().await;
    raw.write_all(&init_record(1)).await.unwrap();
    drop(raw);

    let mut buf = vec![0u8; 1024];
    assert!(association.recv(&mut buf).await.unwrap().is_none());
}

/// Test that the accept loop survives a misbehaving peer
#[tokio::test]
async fn test_server_survives_bad_peer() {
    use parking_lot::Mutex;
    use sctperf::Server;

    let config = Config::server(0).with_local_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let listener = FramedListener::bind(0, true, config.transport_options()).unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let reports = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&reports);
    let server = Server::new(config)
        .unwrap()
        .with_sink(move |report: Report| log.lock().push(report));
    let token = server.cancellation_token().clone();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"definitely not a record header....").await.unwrap();
    drop(raw);

    let client = Client::new(
        Config::client(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()).with_messages(5),
    )
    .unwrap()
    .with_sink(|_report: Report| {});
    let stats = client.run().await.unwrap();
    assert_eq!(stats.messages, 5);

    for _ in 0..300 {
        let good = reports
            .lock()
            .iter()
            .any(|r| matches!(r, Report::Completed { stats, .. } if stats.messages == 5));
        if good {
            token.cancel();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("good association was not reported");
}
