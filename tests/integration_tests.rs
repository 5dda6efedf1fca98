//! End-to-end tests: a real server on an OS-assigned port, driven by raw
//! WebSocket clients, reqwest for the admin routes, and the reconnecting
//! client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rt_client::{
    Backoff, ClientConfig, ConnectionManager, ConnectionState, OverflowPolicy,
};
use rt_protocol::{ClientMessage, NewQuoteData, ServerMessage};
use rt_server::{RealtimeServer, RestrictedChannels, ServerConfig, StaticTokenValidator};
use rt_transport::{CloseRequest, TransportConfig, TransportServer};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::frame::coding::CloseCode},
};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    server: Arc<RealtimeServer>,
    transport: TransportServer,
}

impl TestServer {
    fn port(&self) -> u16 {
        self.transport.port()
    }

    fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port())
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port())
    }
}

async fn start_server(server: RealtimeServer, admin_token: Option<&str>) -> TestServer {
    start_server_with(server, |config| {
        config.admin_token = admin_token.map(|t| SecretString::from(t.to_string()));
    })
    .await
}

async fn start_server_with(
    server: RealtimeServer,
    configure: impl FnOnce(&mut TransportConfig),
) -> TestServer {
    let mut config = TransportConfig {
        port: 0, // OS-assigned
        ..TransportConfig::default()
    };
    configure(&mut config);

    let server = Arc::new(server);
    server.init();
    let transport = TransportServer::start(config, server.clone()).await.unwrap();
    TestServer { server, transport }
}

async fn open(server: &TestServer) -> Ws {
    let (ws, _) = connect_async(server.ws_url())
        .await
        .expect("Failed to connect");
    ws
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON.
async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert nothing arrives for a short while.
async fn assert_silent(ws: &mut Ws) {
    if let Ok(Some(Ok(msg))) = timeout(Duration::from_millis(200), ws.next()).await {
        panic!("unexpected frame: {msg:?}");
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn fast_client(url: String) -> ClientConfig {
    ClientConfig::new(url).with_backoff(Backoff::new(
        Duration::from_millis(50),
        1.5,
        Duration::from_millis(200),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire protocol
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_gets_pong_with_echoed_timestamp() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let mut ws = open(&server).await;

    send(&mut ws, json!({"type": "ping", "timestamp": 1234})).await;
    let pong = recv(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["timestamp"], 1234);
    assert!(pong["serverTime"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn malformed_frame_does_not_close_the_connection() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let mut ws = open(&server).await;

    ws.send(Message::Text(String::from("{not json").into())).await.unwrap();
    let error = recv(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_MESSAGE");

    send(&mut ws, json!({"type": "teleport"})).await;
    assert_eq!(recv(&mut ws).await["code"], "INVALID_MESSAGE");

    send(&mut ws, json!({"type": "ping", "timestamp": 1})).await;
    assert_eq!(recv(&mut ws).await["type"], "pong");
    assert_eq!(server.server.registry().len(), 1);
}

#[tokio::test]
async fn invalid_channel_is_rejected() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let mut ws = open(&server).await;

    send(&mut ws, json!({"type": "subscribe", "channel": "not a channel"})).await;
    let error = recv(&mut ws).await;
    assert_eq!(error["code"], "INVALID_CHANNEL");
    assert!(server.server.registry().stats().channels.is_empty());
}

#[tokio::test]
async fn failed_auth_keeps_public_channels_and_blocks_restricted_ones() {
    let server = RealtimeServer::new(ServerConfig::default())
        .with_validator(StaticTokenValidator::new().with_token("good-token", "alice"))
        .with_channel_policy(RestrictedChannels::new(["customers"]));
    let server = start_server(server, None).await;
    let registry = server.server.registry().clone();
    let mut ws = open(&server).await;

    send(&mut ws, json!({"type": "authenticate", "token": "wrong"})).await;
    let rejected = recv(&mut ws).await;
    assert_eq!(rejected["type"], "auth_error");
    assert_eq!(rejected["code"], "INVALID_TOKEN");

    send(&mut ws, json!({"type": "subscribe", "channel": "quotes"})).await;
    send(&mut ws, json!({"type": "subscribe", "channel": "customers"})).await;
    let refused = recv(&mut ws).await;
    assert_eq!(refused["code"], "UNAUTHORIZED");
    assert_eq!(registry.channel_size("quotes"), 1);
    assert_eq!(registry.channel_size("customers"), 0);

    send(&mut ws, json!({"type": "authenticate", "token": "Bearer good-token"})).await;
    let accepted = recv(&mut ws).await;
    assert_eq!(accepted["type"], "auth_success");
    assert_eq!(accepted["userId"], "alice");

    send(&mut ws, json!({"type": "subscribe", "channel": "customers"})).await;
    eventually("restricted subscribe", || registry.channel_size("customers") == 1).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcasting & lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn broadcast_skips_the_client_that_unsubscribed() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let registry = server.server.registry().clone();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut ws = open(&server).await;
        send(&mut ws, json!({"type": "subscribe", "channel": "quotes"})).await;
        clients.push(ws);
    }
    eventually("three subscribers", || registry.channel_size("quotes") == 3).await;

    send(&mut clients[2], json!({"type": "unsubscribe", "channel": "quotes"})).await;
    eventually("unsubscribe", || registry.channel_size("quotes") == 2).await;

    let delivered = server
        .server
        .broadcaster()
        .broadcast_new_quote(NewQuoteData::new("q1", "QT-100"));
    assert_eq!(delivered, 2);

    for ws in &mut clients[..2] {
        let event = recv(ws).await;
        assert_eq!(event["type"], "new_quote");
        assert_eq!(event["data"]["quoteNumber"], "QT-100");
    }
    assert_silent(&mut clients[2]).await;
}

#[tokio::test]
async fn closed_socket_leaves_every_channel() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let registry = server.server.registry().clone();

    let mut ws = open(&server).await;
    send(&mut ws, json!({"type": "subscribe", "channel": "quotes"})).await;
    send(&mut ws, json!({"type": "subscribe", "channel": "activities"})).await;
    eventually("subscriptions", || registry.channel_size("activities") == 1).await;

    ws.close(None).await.unwrap();
    eventually("cleanup", || registry.is_empty()).await;
    assert_eq!(registry.channel_size("quotes"), 0);
    assert_eq!(registry.channel_size("activities"), 0);
}

#[tokio::test]
async fn silent_connection_is_evicted_by_the_heartbeat() {
    let config = ServerConfig::default()
        .with_heartbeat(Duration::from_millis(50), Duration::from_millis(150));
    let server = start_server(RealtimeServer::new(config), None).await;
    let registry = server.server.registry().clone();

    let mut ws = open(&server).await;
    send(&mut ws, json!({"type": "subscribe", "channel": "quotes"})).await;
    eventually("subscribe", || registry.channel_size("quotes") == 1).await;

    let close = loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("Timeout waiting for eviction")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Close(frame) = msg {
            break frame;
        }
    };
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Away));
    eventually("eviction cleanup", || registry.is_empty()).await;
    assert_eq!(registry.channel_size("quotes"), 0);
}

#[tokio::test]
async fn connections_beyond_the_limit_are_refused() {
    let server = start_server_with(RealtimeServer::new(ServerConfig::default()), |config| {
        config.max_connections = Some(1);
    })
    .await;

    let _first = open(&server).await;
    eventually("first connection", || server.server.registry().len() == 1).await;
    assert!(connect_async(server.ws_url()).await.is_err());
}

#[tokio::test]
async fn shutdown_closes_every_socket_with_going_away() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let mut ws = open(&server).await;
    eventually("connection", || server.server.registry().len() == 1).await;

    server.server.shutdown();
    let close = loop {
        match timeout(WAIT, ws.next()).await.expect("Timeout") {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Away));
    assert!(!server.server.is_running());
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin HTTP surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_connections_and_channels() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let mut ws = open(&server).await;
    send(&mut ws, json!({"type": "subscribe", "channel": "quotes"})).await;
    eventually("subscribe", || server.server.registry().channel_size("quotes") == 1).await;

    let health: Value = reqwest::get(server.http_url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["authEnabled"], false);
    assert_eq!(health["stats"]["connections"], 1);
    assert_eq!(health["stats"]["channels"]["quotes"], 1);
}

#[tokio::test]
async fn admin_broadcast_is_token_gated() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), Some("admin-secret")).await;
    let mut ws = open(&server).await;
    send(&mut ws, json!({"type": "subscribe", "channel": "quotes"})).await;
    eventually("subscribe", || server.server.registry().channel_size("quotes") == 1).await;

    let http = reqwest::Client::new();
    let body = json!({
        "channel": "quotes",
        "message": {"type": "new_quote", "data": {"quoteId": "q9", "quoteNumber": "QT-900"}},
    });

    let missing = http.post(server.http_url("/broadcast")).json(&body).send().await.unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = http
        .post(server.http_url("/broadcast"))
        .bearer_auth("nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);
    let error: Value = wrong.json().await.unwrap();
    assert_eq!(error["error"]["code"], "ADMIN_TOKEN_INVALID");

    let ok = http
        .post(server.http_url("/broadcast"))
        .bearer_auth("admin-secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let delivered: Value = ok.json().await.unwrap();
    assert_eq!(delivered["delivered"], 1);

    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "new_quote");
    assert_eq!(event["data"]["quoteNumber"], "QT-900");

    let bad_channel = http
        .post(server.http_url("/broadcast"))
        .bearer_auth("admin-secret")
        .json(&json!({"channel": "no spaces", "message": body["message"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_channel.status(), 400);
}

#[tokio::test]
async fn admin_broadcast_is_disabled_without_a_token() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let response = reqwest::Client::new()
        .post(server.http_url("/broadcast"))
        .bearer_auth("anything")
        .json(&json!({"message": {"type": "new_quote", "data": {"quoteId": "q1"}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnecting client
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn client_receives_new_quote_end_to_end() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let registry = server.server.registry().clone();

    let manager = ConnectionManager::new(fast_client(server.ws_url()));
    manager.subscribe("quotes").await.unwrap();
    manager.connect().await.unwrap();
    manager
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    eventually("client subscribe", || registry.channel_size("quotes") == 1).await;

    server
        .server
        .broadcaster()
        .broadcast_new_quote(NewQuoteData::new("q1", "QT-100"));

    eventually("new_quote delivery", || {
        matches!(manager.last_message(), Some(ServerMessage::NewQuote { .. }))
    })
    .await;
    match manager.last_message() {
        Some(ServerMessage::NewQuote { data }) => {
            assert_eq!(data.quote_id, "q1");
            assert_eq!(data.quote_number.as_deref(), Some("QT-100"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn forced_close_reconnects_and_replays_subscriptions() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let registry = server.server.registry().clone();

    let manager = ConnectionManager::new(fast_client(server.ws_url()));
    manager.connect().await.unwrap();
    manager
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    manager.subscribe("quotes").await.unwrap();
    eventually("first subscribe", || registry.channel_size("quotes") == 1).await;

    let first = registry.channel_snapshot("quotes")[0].id().clone();
    assert!(registry.close_connection(&first, CloseRequest::going_away("test eviction")));

    eventually("resubscribe on a new socket", || {
        let members = registry.channel_snapshot("quotes");
        members.len() == 1 && *members[0].id() != first
    })
    .await;
    manager
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    assert_eq!(manager.status().attempts, 0);
    assert_eq!(manager.subscriptions().await.unwrap(), vec!["quotes"]);
}

#[tokio::test]
async fn offline_outbox_flushes_in_order_after_connect() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let registry = server.server.registry().clone();

    let config = fast_client(server.ws_url()).with_outbox(3, OverflowPolicy::RejectNew);
    let manager = ConnectionManager::new(config);

    let queued = [
        ClientMessage::subscribe("quotes"),
        ClientMessage::subscribe("customers"),
        ClientMessage::unsubscribe("quotes"),
        // Rejected: the outbox already holds three
        ClientMessage::subscribe("activities"),
        ClientMessage::unsubscribe("customers"),
    ];
    for message in queued {
        assert!(!manager.send_message(message).await);
    }
    assert_eq!(manager.outbox_len().await.unwrap(), 3);

    manager.connect().await.unwrap();
    manager
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    // Quotes is only empty again once the unsubscribe ran after its subscribe
    eventually("flush", || {
        registry.channel_size("customers") == 1 && registry.channel_size("quotes") == 0
    })
    .await;
    assert_eq!(registry.channel_size("activities"), 0);
    assert_eq!(manager.outbox_len().await.unwrap(), 0);
    assert!(manager.send_message(ClientMessage::subscribe("activities")).await);
    eventually("live send", || registry.channel_size("activities") == 1).await;
}

#[tokio::test]
async fn client_token_unlocks_restricted_channels() {
    let server = RealtimeServer::new(ServerConfig::default())
        .with_validator(StaticTokenValidator::new().with_token("good-token", "alice"))
        .with_channel_policy(RestrictedChannels::new(["customers"]));
    let server = start_server(server, None).await;
    let registry = server.server.registry().clone();

    let manager = ConnectionManager::new(fast_client(server.ws_url()).with_token("good-token"));
    manager.subscribe("customers").await.unwrap();
    manager.connect().await.unwrap();

    eventually("authenticated subscribe", || registry.channel_size("customers") == 1).await;
    let member = registry.channel_snapshot("customers")[0].id().clone();
    assert!(registry.is_authenticated(&member));
    assert_eq!(
        registry.connection(&member).and_then(|c| c.user_id).as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn disconnect_leaves_no_pending_reconnect() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;
    let registry = server.server.registry().clone();

    let manager = ConnectionManager::new(fast_client(server.ws_url()));
    manager.connect().await.unwrap();
    manager
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    eventually("server sees client", || registry.len() == 1).await;

    manager.disconnect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    eventually("server cleanup", || registry.is_empty()).await;

    // Several backoff periods later, still nobody reconnected
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(registry.is_empty());
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn pong_updates_latency() {
    let server = start_server(RealtimeServer::new(ServerConfig::default()), None).await;

    let config = fast_client(server.ws_url()).with_ping_interval(Duration::from_millis(50));
    let manager = ConnectionManager::new(config);
    manager.connect().await.unwrap();

    let mut status = manager.watch_status();
    timeout(WAIT, status.wait_for(|s| s.latency.is_some()))
        .await
        .expect("Timeout waiting for a pong")
        .unwrap();
    assert!(manager.is_connected());
    assert!(matches!(manager.last_message(), Some(ServerMessage::Pong { .. })));
}
