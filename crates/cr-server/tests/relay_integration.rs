//! Relay integration tests
//!
//! Runs a real relay on a loopback port and talks to it with WebSocket
//! clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use cr_core::auth::hash_password;
use cr_core::config::{ServerConfig, UserEntry};
use cr_protocol::{decode, encode_text, Credentials, SyncMode, WireMessage};
use cr_server::{RelayServer, ServerState};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a client observed next on its link
#[derive(Debug, PartialEq)]
enum Next {
    Message(WireMessage),
    Closed,
    Silent,
}

struct TestRelay {
    addr: SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl TestRelay {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(mut config: ServerConfig) -> Self {
        config.auths = vec![
            UserEntry::new("alice", "alice-pw"),
            UserEntry::new("bob", "bob-pw"),
        ];

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let server = RelayServer::from_config(config, cancel.clone()).unwrap();
        let state = Arc::clone(server.state());
        tokio::spawn(server.serve(listener));

        Self {
            addr,
            state,
            cancel,
        }
    }

    async fn connect(&self) -> Ws {
        let url = format!("ws://{}/websocket", self.addr);
        let (ws, _) = connect_async(url).await.expect("Failed to connect to relay");
        ws
    }

    /// Connect and complete the handshake; returns the link and assigned id
    async fn join(&self, id: &str, user: &str, password: &str) -> (Ws, String) {
        let mut ws = self.connect().await;
        send(&mut ws, &register(id, user, &hash_password(password))).await;

        match next(&mut ws, Duration::from_secs(2)).await {
            Next::Message(WireMessage::Ready { user_id }) => (ws, user_id),
            other => panic!("expected ready, got {:?}", other),
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn register(id: &str, user: &str, hash: &str) -> WireMessage {
    WireMessage::Register {
        user_id: id.to_string(),
        credentials: Credentials::new(user, hash, SyncMode::Auto).unwrap(),
    }
}

async fn send(ws: &mut Ws, message: &WireMessage) {
    ws.send(Message::Text(encode_text(message)))
        .await
        .expect("Failed to send");
}

async fn next(ws: &mut Ws, wait: Duration) -> Next {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Next::Message(decode(text.as_bytes()).expect("bad frame from relay"));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Next::Message(decode(&data).expect("bad frame from relay"));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Next::Closed,
            }
        }
    };

    timeout(wait, read).await.unwrap_or(Next::Silent)
}

#[tokio::test]
async fn test_fan_out_to_siblings_only() {
    let relay = TestRelay::start().await;
    let (mut a1, a1_id) = relay.join("A1", "alice", "alice-pw").await;
    let (mut a2, _) = relay.join("A2", "alice", "alice-pw").await;
    let (mut b1, _) = relay.join("B1", "bob", "bob-pw").await;

    send(&mut a1, &WireMessage::clipboard_changed("A1", Bytes::from_static(b"P"))).await;

    assert_eq!(
        next(&mut a2, Duration::from_secs(2)).await,
        Next::Message(WireMessage::clipboard_changed(a1_id, Bytes::from_static(b"P")))
    );
    assert_eq!(next(&mut a1, Duration::from_millis(200)).await, Next::Silent);
    assert_eq!(next(&mut b1, Duration::from_millis(200)).await, Next::Silent);

    let stored = relay
        .state
        .content
        .clip_content_by_username("alice")
        .await
        .unwrap()
        .expect("content was not stored");
    assert_eq!(stored.content, Bytes::from_static(b"P"));
    assert_eq!(stored.device_id, "A1");
}

#[tokio::test]
async fn test_bad_credentials_close_without_ready() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;

    send(&mut ws, &register("A1", "alice", "badhash")).await;
    assert_eq!(next(&mut ws, Duration::from_secs(2)).await, Next::Closed);

    let mut ws = relay.connect().await;
    send(&mut ws, &register("A1", "alice", &hash_password("wrong"))).await;
    assert_eq!(next(&mut ws, Duration::from_secs(2)).await, Next::Closed);

    let mut ws = relay.connect().await;
    send(&mut ws, &register("A1", "mallory", &hash_password("x"))).await;
    assert_eq!(next(&mut ws, Duration::from_secs(2)).await, Next::Closed);
}

#[tokio::test]
async fn test_unauthenticated_clipboard_is_not_broadcast() {
    let relay = TestRelay::start().await;
    let (mut a2, _) = relay.join("A2", "alice", "alice-pw").await;

    let mut intruder = relay.connect().await;
    send(
        &mut intruder,
        &WireMessage::clipboard_changed("A1", Bytes::from_static(b"sneaky")),
    )
    .await;

    assert_eq!(next(&mut intruder, Duration::from_secs(2)).await, Next::Closed);
    assert_eq!(next(&mut a2, Duration::from_millis(200)).await, Next::Silent);
    assert!(relay
        .state
        .content
        .clip_content_by_username("alice")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_garbage_before_register_closes() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;

    ws.send(Message::Text("{ not json".to_string())).await.unwrap();
    assert_eq!(next(&mut ws, Duration::from_secs(2)).await, Next::Closed);
}

#[tokio::test]
async fn test_authenticated_session_survives_bad_frames() {
    let relay = TestRelay::start().await;
    let (mut a1, _) = relay.join("A1", "alice", "alice-pw").await;
    let (mut a2, _) = relay.join("A2", "alice", "alice-pw").await;

    a1.send(Message::Text("{ not json".to_string())).await.unwrap();
    a1.send(Message::Text(
        r#"{"action":"cbget","user_id":"A1","data":null}"#.to_string(),
    ))
    .await
    .unwrap();
    send(&mut a1, &register("A1", "alice", &hash_password("alice-pw"))).await;

    send(&mut a1, &WireMessage::clipboard_changed("A1", Bytes::from_static(b"still here"))).await;
    assert_eq!(
        next(&mut a2, Duration::from_secs(2)).await,
        Next::Message(WireMessage::clipboard_changed("A1", Bytes::from_static(b"still here")))
    );
}

#[tokio::test]
async fn test_terminate_unregisters() {
    let relay = TestRelay::start().await;
    let (mut a1, _) = relay.join("A1", "alice", "alice-pw").await;
    let (mut a2, _) = relay.join("A2", "alice", "alice-pw").await;

    send(&mut a2, &WireMessage::terminate("A2")).await;
    assert_eq!(next(&mut a2, Duration::from_secs(2)).await, Next::Closed);

    // The id is free again once the router dropped A2.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_a2_again, id) = relay.join("A2", "alice", "alice-pw").await;
    assert_eq!(id, "A2");

    send(&mut a1, &WireMessage::clipboard_changed("A1", Bytes::from_static(b"x"))).await;
    assert_eq!(next(&mut a1, Duration::from_millis(200)).await, Next::Silent);
}

#[tokio::test]
async fn test_colliding_device_ids() {
    let relay = TestRelay::start().await;
    let (_first, first_id) = relay.join("pc", "alice", "alice-pw").await;
    let (_second, second_id) = relay.join("pc", "alice", "alice-pw").await;

    assert_eq!(first_id, "pc");
    assert_eq!(second_id, "pc-2");
}

#[tokio::test]
async fn test_handshake_timeout() {
    let relay = TestRelay::start_with(ServerConfig {
        handshake_timeout: Duration::from_secs(1),
        ..Default::default()
    })
    .await;

    let mut ws = relay.connect().await;
    assert_eq!(next(&mut ws, Duration::from_secs(3)).await, Next::Closed);
}

/// Short keepalive settings: pings every 300ms, 1s of silence ends a session
fn keepalive_config() -> ServerConfig {
    ServerConfig {
        read_timeout: Duration::from_secs(1),
        ping_period: Duration::from_millis(300),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_peer_that_never_answers_pings_is_dropped() {
    let relay = TestRelay::start_with(keepalive_config()).await;
    let (mut silent, id) = relay.join("A1", "alice", "alice-pw").await;
    assert_eq!(id, "A1");

    // Not reading means the pings pile up unanswered.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let (_again, id) = relay.join("A1", "alice", "alice-pw").await;
    assert_eq!(id, "A1");
    assert_eq!(next(&mut silent, Duration::from_secs(2)).await, Next::Closed);
}

#[tokio::test]
async fn test_reading_peer_outlives_read_timeout() {
    let relay = TestRelay::start_with(keepalive_config()).await;
    let (mut a2, _) = relay.join("A2", "alice", "alice-pw").await;

    // Reading answers every ping, which keeps the session alive.
    assert_eq!(next(&mut a2, Duration::from_millis(2500)).await, Next::Silent);

    let (mut a1, _) = relay.join("A1", "alice", "alice-pw").await;
    send(&mut a1, &WireMessage::clipboard_changed("A1", Bytes::from_static(b"alive"))).await;
    assert_eq!(
        next(&mut a2, Duration::from_secs(2)).await,
        Next::Message(WireMessage::clipboard_changed("A1", Bytes::from_static(b"alive")))
    );
}

#[tokio::test]
async fn test_database_keeps_content_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        database_path: Some(dir.path().join("relay.db")),
        ..Default::default()
    };

    let relay = TestRelay::start_with(config.clone()).await;
    let (mut a1, _) = relay.join("A1", "alice", "alice-pw").await;
    send(&mut a1, &WireMessage::clipboard_changed("A1", Bytes::from_static(b"persisted"))).await;

    let stored = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(record) = relay
                .state
                .content
                .clip_content_by_username("alice")
                .await
                .unwrap()
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("content was not stored");
    assert_eq!(stored.content, Bytes::from_static(b"persisted"));
    drop(a1);
    drop(relay);

    let relay = TestRelay::start_with(config).await;
    let stored = relay
        .state
        .content
        .clip_content_by_username("alice")
        .await
        .unwrap()
        .expect("content did not survive the restart");
    assert_eq!(stored.content, Bytes::from_static(b"persisted"));
    assert_eq!(stored.device_id, "A1");

    // Accounts from the config were written to the database too.
    let (_b1, id) = relay.join("B1", "bob", "bob-pw").await;
    assert_eq!(id, "B1");
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let relay = TestRelay::start().await;
    let (mut a1, _) = relay.join("A1", "alice", "alice-pw").await;

    relay.cancel.cancel();
    assert_eq!(next(&mut a1, Duration::from_secs(2)).await, Next::Closed);
}
