//! Integration tests: handshake, relay and viewer over real TCP on
//! localhost.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camrelay_core::auth::{FAILURE_MARKER, SUCCESS_MARKER, response_digest};
use camrelay_core::{
    Acceptor, AcceptorConfig, CamError, ClientConfig, Connection, ConnectionConfig, Frame,
    FrameFormat, FrameSlot, RelayConfig, RelayHandler, Secret, SharedFrame, StreamClient,
    StreamEnd,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

/// Start a relay server for `secret` on an OS-assigned port.
fn start_server(secret: &str, slot: &FrameSlot) -> (Acceptor, SocketAddr) {
    let config = AcceptorConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        poll_interval: Duration::from_millis(200),
        ..Default::default()
    };
    let handler = RelayHandler::new(
        Secret::from(secret),
        slot.clone(),
        RelayConfig {
            poll_interval: Duration::from_millis(10),
            handshake_timeout: WAIT,
        },
    );
    let mut acceptor = Acceptor::new(config, Arc::new(handler));
    let addr = acceptor.start().unwrap();
    (acceptor, addr)
}

async fn dial(addr: SocketAddr) -> Connection<TcpStream> {
    Connection::connect(
        &addr.to_string(),
        &ConnectionConfig::default(),
        WAIT,
        CancellationToken::new(),
    )
    .await
    .unwrap()
}

fn frame(seq: u64, data: &[u8]) -> Frame {
    Frame {
        seq,
        captured_at_ms: 1_700_000_000_000 + seq,
        width: 2,
        height: 1,
        format: FrameFormat::Raw,
        data: data.to_vec(),
    }
}

fn shared(frame: &Frame) -> SharedFrame {
    SharedFrame::try_from(frame).unwrap()
}

fn client_config() -> ClientConfig {
    ClientConfig {
        receive_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

// ── Wire-level scenarios ─────────────────────────────────────────

#[tokio::test]
async fn test_login_then_deduplicated_stream() {
    let slot = FrameSlot::new();
    let f1 = frame(1, b"F1");
    slot.publish(shared(&f1));
    let (mut acceptor, addr) = start_server("pw", &slot);

    let mut viewer = dial(addr).await;
    let challenge = viewer.receive(WAIT).await.unwrap();
    assert_eq!(challenge.len(), 128);
    assert!(challenge.iter().all(u8::is_ascii_alphanumeric));

    let digest = response_digest(&Secret::from("pw"), &challenge);
    viewer.send(digest.as_bytes()).await.unwrap();
    assert_eq!(&viewer.receive(WAIT).await.unwrap()[..], SUCCESS_MARKER);

    let got = viewer.receive(WAIT).await.unwrap();
    assert_eq!(Frame::from_bytes(&got).unwrap(), f1);

    // Publishing identical bytes is not a new frame.
    slot.publish(shared(&f1));
    let err = viewer
        .receive(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let f2 = frame(2, b"F2");
    slot.publish(shared(&f2));
    let got = viewer.receive(WAIT).await.unwrap();
    assert_eq!(Frame::from_bytes(&got).unwrap(), f2);

    acceptor.stop().await;
}

#[tokio::test]
async fn test_wrong_response_gets_fail_then_close() {
    let slot = FrameSlot::new();
    slot.publish(shared(&frame(1, b"F1")));
    let (mut acceptor, addr) = start_server("pw", &slot);

    let mut viewer = dial(addr).await;
    let challenge = viewer.receive(WAIT).await.unwrap();
    let digest = response_digest(&Secret::from("not-pw"), &challenge);
    viewer.send(digest.as_bytes()).await.unwrap();

    assert_eq!(&viewer.receive(WAIT).await.unwrap()[..], FAILURE_MARKER);
    let err = viewer.receive(WAIT).await.unwrap_err();
    assert!(matches!(
        err,
        CamError::ConnectionClosed | CamError::Connection(_)
    ));

    acceptor.stop().await;
}

#[tokio::test]
async fn test_each_connection_gets_a_fresh_challenge() {
    let slot = FrameSlot::new();
    let (mut acceptor, addr) = start_server("pw", &slot);

    let mut first = dial(addr).await;
    let mut second = dial(addr).await;
    let a = first.receive(WAIT).await.unwrap();
    let b = second.receive(WAIT).await.unwrap();
    assert_ne!(a, b);

    acceptor.stop().await;
}

// ── Viewer session ───────────────────────────────────────────────

#[tokio::test]
async fn test_viewer_streams_until_the_server_goes_away() {
    let slot = FrameSlot::new();
    slot.publish(shared(&frame(1, b"F1")));
    let (mut acceptor, addr) = start_server("pw", &slot);

    let mut client = StreamClient::connect(&addr.to_string(), client_config())
        .await
        .unwrap();
    client.login(&Secret::from("pw")).await.unwrap();
    assert!(client.is_connected());

    let publisher = tokio::spawn({
        let slot = slot.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            slot.publish(shared(&frame(2, b"F2")));
            tokio::time::sleep(Duration::from_millis(100)).await;
            acceptor.stop().await;
        }
    });

    let mut seen = Vec::new();
    let mut sink = |f: Frame| -> Result<(), CamError> {
        seen.push(f.seq);
        Ok(())
    };
    let summary = tokio::time::timeout(Duration::from_secs(10), client.stream(&mut sink))
        .await
        .expect("stream did not end");

    publisher.await.unwrap();
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(summary.frames_received, 2);
    assert_eq!(summary.end, StreamEnd::MissLimit);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_viewer_with_wrong_secret_is_refused() {
    let slot = FrameSlot::new();
    let (mut acceptor, addr) = start_server("pw", &slot);

    let mut client = StreamClient::connect(&addr.to_string(), client_config())
        .await
        .unwrap();
    let err = client.login(&Secret::from("guess")).await.unwrap_err();
    assert!(matches!(err, CamError::AuthFailed));
    assert!(!client.is_connected());

    acceptor.stop().await;
}

#[tokio::test]
async fn test_connect_to_nothing_fails_cleanly() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = StreamClient::connect(&format!("127.0.0.1:{port}"), client_config()).await;
    assert!(result.is_err());
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_with_an_active_stream_is_prompt() {
    let slot = FrameSlot::new();
    slot.publish(shared(&frame(1, b"F1")));
    let (mut acceptor, addr) = start_server("pw", &slot);

    let mut client = StreamClient::connect(&addr.to_string(), client_config())
        .await
        .unwrap();
    client.login(&Secret::from("pw")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let begun = Instant::now();
    acceptor.stop().await;
    assert!(begun.elapsed() <= Duration::from_secs(1));
    assert!(!acceptor.is_running());
    assert!(TcpStream::connect(addr).await.is_err());

    client.disconnect().await;
}
