//! True end-to-end tests: a real `warp` server bound to an ephemeral loopback
//! port, driven over the wire with `relay_common::ws_client` exactly as
//! `telemetry_core`'s own `tests/basic_tests.rs` drives its server with
//! `test_utils::ws_client` — just without the subprocess-spawning harness,
//! since this crate exposes its routes as a library (`src/lib.rs`) rather
//! than only as a binary.

use relay_common::ws_client::{self, RecvMessage, SentMessage};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use telemetry_relay::core::aggregator::{self, CoreEvent};
use telemetry_relay::server;

struct TestServer {
    addr: SocketAddr,
    events: flume::Sender<CoreEvent>,
}

impl TestServer {
    async fn start() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        tokio::spawn(aggregator::run(events_rx));

        let routes = server::routes(events_tx.clone());
        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self {
            addr,
            events: events_tx,
        }
    }

    fn ws_uri(&self, path: &str) -> http::Uri {
        format!("ws://{}{}", self.addr, path).parse().unwrap()
    }

    async fn shutdown(&self) {
        let _ = self
            .events
            .send_async(CoreEvent::Shutdown {
                now: relay_common::time::now(),
            })
            .await;
    }
}

async fn recv_json(rx: &mut ws_client::Receiver) -> Value {
    use futures::StreamExt;
    match rx.next().await.expect("stream ended").expect("recv error") {
        RecvMessage::Text(s) => serde_json::from_str(&s).expect("valid JSON"),
        RecvMessage::Binary(_) => panic!("expected text frame"),
    }
}

async fn send_json(tx: &ws_client::Sender, value: Value) {
    tx.unbounded_send(SentMessage::Text(value.to_string())).unwrap();
}

#[tokio::test]
async fn producer_handshake_promotes_and_listener_receives_fanout() {
    let server = TestServer::start().await;

    let (producer_tx, mut producer_rx) = ws_client::connect(&server.ws_uri("/pocket-parrot"))
        .await
        .expect("producer connects");
    let (_listener_tx, mut listener_rx) = ws_client::connect(&server.ws_uri("/listener"))
        .await
        .expect("listener connects");

    let connected = recv_json(&mut listener_rx).await;
    assert_eq!(connected["type"], "listener_connected");
    // The listener's own connection is a connection event, so it immediately
    // gets a stats snapshot too.
    let initial_stats = recv_json(&mut listener_rx).await;
    assert_eq!(initial_stats["type"], "stats");

    send_json(
        &producer_tx,
        json!({"type": "handshake", "deviceId": "D1"}),
    )
    .await;

    let promoted = recv_json(&mut producer_rx).await;
    assert_eq!(promoted["type"], "promoted");
    assert_eq!(promoted["role"], "sender");

    send_json(
        &producer_tx,
        json!({"type": "data", "data": {"id": "f1", "timestamp": 1000, "temperature": 21.5}}),
    )
    .await;

    let ack = recv_json(&mut producer_rx).await;
    assert_eq!(ack["type"], "ack");

    let sensor_data = recv_json(&mut listener_rx).await;
    assert_eq!(sensor_data["type"], "sensor_data");
    assert_eq!(sensor_data["temperature"], 21.5);

    server.shutdown().await;
}

#[tokio::test]
async fn second_producer_becomes_observer_then_is_promoted_on_disconnect() {
    let server = TestServer::start().await;

    let (mut a_tx, mut a_rx) = ws_client::connect(&server.ws_uri("/pocket-parrot"))
        .await
        .expect("a connects");
    let (b_tx, mut b_rx) = ws_client::connect(&server.ws_uri("/pocket-parrot"))
        .await
        .expect("b connects");

    send_json(&a_tx, json!({"type": "handshake", "deviceId": "D1"})).await;
    let _ = recv_json(&mut a_rx).await; // promoted

    send_json(&b_tx, json!({"type": "handshake", "deviceId": "D2"})).await;
    let welcome = recv_json(&mut b_rx).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["role"], "observer");
    let observer_mode = recv_json(&mut b_rx).await;
    assert_eq!(observer_mode["type"], "observer_mode");

    a_tx.close().await.unwrap();

    let sender_changed = recv_json(&mut b_rx).await;
    assert_eq!(sender_changed["type"], "sender_changed");
    let promoted = recv_json(&mut b_rx).await;
    assert_eq!(promoted["type"], "promoted");

    server.shutdown().await;
}

#[tokio::test]
async fn dashboard_sees_connect_and_kick() {
    let server = TestServer::start().await;

    let (dash_tx, mut dash_rx) = ws_client::connect(&server.ws_uri("/dashboard"))
        .await
        .expect("dashboard connects");
    // The dashboard's own connection is a connection event, so it immediately
    // gets a stats snapshot.
    let initial_stats = recv_json(&mut dash_rx).await;
    assert_eq!(initial_stats["type"], "stats");

    let (producer_tx, mut producer_rx) = ws_client::connect(&server.ws_uri("/pocket-parrot"))
        .await
        .expect("producer connects");
    // And so is the producer's.
    let producer_connect_stats = recv_json(&mut dash_rx).await;
    assert_eq!(producer_connect_stats["type"], "stats");

    send_json(
        &producer_tx,
        json!({"type": "handshake", "deviceId": "D1", "username": "alice"}),
    )
    .await;
    let _ = recv_json(&mut producer_rx).await; // promoted

    let connected = recv_json(&mut dash_rx).await;
    assert_eq!(connected["type"], "userConnected");
    assert_eq!(connected["username"], "alice");

    let user_id = connected["userId"].as_str().unwrap().to_owned();
    send_json(&dash_tx, json!({"type": "kickUser", "userId": user_id})).await;

    let kicked = recv_json(&mut producer_rx).await;
    assert_eq!(kicked["type"], "kicked");

    // Give the connection task a moment to observe the close-on-terminal-message
    // and notify the dashboard before we tear the server down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let disconnected = recv_json(&mut dash_rx).await;
    assert_eq!(disconnected["type"], "userDisconnected");

    server.shutdown().await;
}

#[tokio::test]
async fn metrics_route_reports_plain_text_exposition_format() {
    let server = TestServer::start().await;

    let body = plain_http_get(&format!("http://{}/metrics", server.addr)).await;
    assert!(body.contains("relay_active_producers 0"));
    assert!(body.contains("# TYPE relay_total_data_points counter"));

    server.shutdown().await;
}

/// A bare-bones GET over a plain `TcpStream`, avoiding pulling in a full HTTP
/// client crate for one assertion.
async fn plain_http_get(url: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let uri: http::Uri = url.parse().unwrap();
    let authority = uri.authority().unwrap().as_str();
    let path = uri.path();

    let mut stream = TcpStream::connect(authority).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
        .split("\r\n\r\n")
        .nth(1)
        .unwrap_or_default()
        .to_string()
}
