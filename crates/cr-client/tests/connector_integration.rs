//! Connector integration tests
//!
//! Runs a real relay on a loopback port and connects in-process clients
//! backed by memory clipboards.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use cr_client::{ConnectError, Connector, ConnectorState, MemoryClipboard, Trigger};
use cr_core::config::{AuthConfig, BackoffConfig, ClientConfig, ServerConfig, UserEntry};
use cr_protocol::SyncMode;
use cr_server::{RelayServer, ServerState};

const WAIT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestRelay {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// Start on a port a previous relay just released
    async fn restart_on(addr: SocketAddr) -> Self {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            match TcpListener::bind(addr).await {
                Ok(listener) => return Self::serve(listener),
                Err(e) if tokio::time::Instant::now() < deadline => {
                    tracing::debug!("Port {} not free yet: {}", addr, e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to rebind {}: {}", addr, e),
            }
        }
    }

    fn serve(listener: TcpListener) -> Self {
        let config = ServerConfig {
            auths: vec![
                UserEntry::new("alice", "alice-pw"),
                UserEntry::new("bob", "bob-pw"),
            ],
            ..Default::default()
        };

        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = RelayServer::with_memory_store(config, cancel.clone());
        let state = Arc::clone(server.state());
        let task = tokio::spawn(server.serve(listener));

        Self {
            addr,
            state,
            cancel,
            task,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let _ = timeout(WAIT, self.task).await;
    }
}

struct TestClient {
    connector: Arc<Connector>,
    clipboard: MemoryClipboard,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TestClient {
    fn new(relay: SocketAddr, id: &str, user: &str, password: &str, mode: SyncMode) -> Self {
        let config = ClientConfig {
            server_address: relay.to_string(),
            device_id: Some(id.to_string()),
            auth: AuthConfig {
                user: user.to_string(),
                password: password.to_string(),
            },
            mode,
            handshake_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            backoff: BackoffConfig {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(300),
                multiplier: 1.5,
                jitter: 0.0,
            },
            ..Default::default()
        };

        let clipboard = MemoryClipboard::new(config.poll_interval);
        let connector = Connector::new(config, Arc::new(clipboard.clone())).unwrap();

        Self {
            connector: Arc::new(connector),
            clipboard,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    fn start(&mut self, triggers: Option<tokio::sync::mpsc::Receiver<Trigger>>) {
        let connector = Arc::clone(&self.connector);
        self.task = Some(tokio::spawn(connector.run(self.cancel.clone(), triggers)));
    }

    async fn wait_for_state(&self, state: ConnectorState) {
        let mut rx = self.connector.subscribe();
        timeout(WAIT, rx.wait_for(|current| *current == state))
            .await
            .unwrap_or_else(|_| panic!("connector never reached {}", state))
            .expect("state channel closed");
    }

    async fn wait_for_clipboard(&self, expected: &'static [u8]) {
        let result = timeout(WAIT, async {
            while self.clipboard.get() != Some(Bytes::from_static(expected)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "clipboard of {} is {:?}",
            self.connector.id(),
            self.clipboard.get()
        );
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            timeout(WAIT, task)
                .await
                .expect("connector did not stop")
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_clipboard_reaches_sibling_devices() {
    let relay = TestRelay::start().await;
    let mut laptop = TestClient::new(relay.addr, "laptop", "alice", "alice-pw", SyncMode::Auto);
    let mut desktop = TestClient::new(relay.addr, "desktop", "alice", "alice-pw", SyncMode::Auto);
    let mut other = TestClient::new(relay.addr, "other", "bob", "bob-pw", SyncMode::Auto);

    for client in [&mut laptop, &mut desktop, &mut other] {
        client.start(None);
    }
    for client in [&laptop, &desktop, &other] {
        client.wait_for_state(ConnectorState::Connected).await;
    }

    laptop.clipboard.set(Bytes::from_static(b"hello"));
    desktop.wait_for_clipboard(b"hello").await;

    // Applying the remote change must not bounce it back.
    desktop.clipboard.set(Bytes::from_static(b"reply"));
    laptop.wait_for_clipboard(b"reply").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(other.clipboard.get(), None);

    let stored = relay
        .state
        .content
        .clip_content_by_username("alice")
        .await
        .unwrap()
        .expect("content was not stored");
    assert_eq!(stored.content, Bytes::from_static(b"reply"));
    assert_eq!(stored.device_id, "desktop");

    for client in [&mut laptop, &mut desktop, &mut other] {
        client.stop().await;
    }
    relay.stop().await;
}

#[tokio::test]
async fn test_reconnects_after_relay_restart() {
    let relay = TestRelay::start().await;
    let addr = relay.addr;
    let mut laptop = TestClient::new(addr, "laptop", "alice", "alice-pw", SyncMode::Auto);
    let mut desktop = TestClient::new(addr, "desktop", "alice", "alice-pw", SyncMode::Auto);

    laptop.start(None);
    desktop.start(None);
    laptop.wait_for_state(ConnectorState::Connected).await;
    desktop.wait_for_state(ConnectorState::Connected).await;

    relay.stop().await;
    laptop.wait_for_state(ConnectorState::Reconnecting).await;

    let relay = TestRelay::restart_on(addr).await;
    laptop.wait_for_state(ConnectorState::Connected).await;
    desktop.wait_for_state(ConnectorState::Connected).await;
    assert_eq!(laptop.connector.id(), "laptop");

    laptop.clipboard.set(Bytes::from_static(b"after restart"));
    desktop.wait_for_clipboard(b"after restart").await;

    laptop.stop().await;
    desktop.stop().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_bad_password_is_rejected_and_retried() {
    let relay = TestRelay::start().await;
    let mut client = TestClient::new(relay.addr, "laptop", "alice", "wrong", SyncMode::Auto);

    let result = client.connector.connect().await;
    assert!(
        matches!(result, Err(ConnectError::Rejected)),
        "unexpected result: {:?}",
        result
    );
    assert_eq!(client.connector.state(), ConnectorState::Disconnected);

    client.start(None);
    client.wait_for_state(ConnectorState::Reconnecting).await;

    client.stop().await;
    assert_eq!(client.connector.state(), ConnectorState::Disconnected);
    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_releases_device_id() {
    let relay = TestRelay::start().await;
    let mut first = TestClient::new(relay.addr, "laptop", "alice", "alice-pw", SyncMode::Auto);

    first.start(None);
    first.wait_for_state(ConnectorState::Connected).await;
    first.stop().await;
    assert_eq!(first.connector.state(), ConnectorState::Disconnected);

    // The relay drops the session on terminate, so the id is free again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = TestClient::new(relay.addr, "laptop", "alice", "alice-pw", SyncMode::Auto);
    second.connector.connect().await.unwrap();
    assert_eq!(second.connector.id(), "laptop");

    second.connector.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_colliding_device_id_is_renamed() {
    let relay = TestRelay::start().await;
    let first = TestClient::new(relay.addr, "pc", "alice", "alice-pw", SyncMode::Auto);
    let second = TestClient::new(relay.addr, "pc", "alice", "alice-pw", SyncMode::Auto);

    first.connector.connect().await.unwrap();
    second.connector.connect().await.unwrap();
    assert_eq!(first.connector.id(), "pc");
    assert_eq!(second.connector.id(), "pc-2");

    first.connector.shutdown().await;
    second.connector.shutdown().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_manual_mode_triggers() {
    let relay = TestRelay::start().await;
    let mut laptop = TestClient::new(relay.addr, "laptop", "alice", "alice-pw", SyncMode::Auto);
    let mut phone = TestClient::new(relay.addr, "phone", "alice", "alice-pw", SyncMode::Manual);
    let (triggers, trigger_rx) = tokio::sync::mpsc::channel(4);

    laptop.start(None);
    phone.start(Some(trigger_rx));
    laptop.wait_for_state(ConnectorState::Connected).await;
    phone.wait_for_state(ConnectorState::Connected).await;

    // Manual mode does not watch the clipboard.
    phone.clipboard.set(Bytes::from_static(b"draft"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(laptop.clipboard.get(), None);

    triggers.send(Trigger::Upload).await.unwrap();
    laptop.wait_for_clipboard(b"draft").await;

    relay
        .state
        .content
        .insert_clip_content("script", "alice", Bytes::from_static(b"stored"))
        .await
        .unwrap();
    triggers.send(Trigger::Download).await.unwrap();
    phone.wait_for_clipboard(b"stored").await;

    laptop.stop().await;
    phone.stop().await;
    relay.stop().await;
}
