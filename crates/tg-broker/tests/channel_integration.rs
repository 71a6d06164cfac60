//! Channel and admin server integration tests
//!
//! Drives the TCP servers with newline-delimited JSON the way a client
//! adapter would.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tg_broker::server::{AdminServer, ChannelServer};
use tg_broker::{DefaultPolicy, TerminalBroker, TerminalPolicy};
use tg_core::admin::{AdminRequest, AdminResponse};
use tg_core::config::BrokerConfig;
use tg_core::{ConnectionId, ConnectionInfo, Environment};
use tg_protocol::{ChannelEvent, ServerMessage, SessionId};

fn test_config() -> BrokerConfig {
    BrokerConfig {
        default_shell: vec!["/bin/sh".to_string()],
        kill_escalation_wait: Duration::from_secs(1),
        environment: Environment::Test,
        scrollback: 2000,
        ..BrokerConfig::default()
    }
}

/// Running servers sharing one broker
struct Harness {
    broker: Arc<TerminalBroker>,
    channel_addr: String,
    admin_addr: String,
    cancel: CancellationToken,
}

impl Harness {
    async fn start(config: BrokerConfig) -> Self {
        Self::start_with_policy(config, Arc::new(DefaultPolicy)).await
    }

    async fn start_with_policy(config: BrokerConfig, policy: Arc<dyn TerminalPolicy>) -> Self {
        let broker = Arc::new(TerminalBroker::new(config, policy));
        let cancel = CancellationToken::new();

        let channel_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let channel_addr = channel_listener.local_addr().unwrap().to_string();
        let admin_addr = admin_listener.local_addr().unwrap().to_string();

        let channel = ChannelServer::new(channel_addr.clone(), Arc::clone(&broker))
            .with_shutdown_token(cancel.clone());
        tokio::spawn(async move {
            let _ = channel.serve(channel_listener).await;
        });

        let admin = AdminServer::new(admin_addr.clone(), Arc::clone(&broker))
            .with_shutdown_token(cancel.clone());
        tokio::spawn(async move {
            let _ = admin.serve(admin_listener).await;
        });

        Self {
            broker,
            channel_addr,
            admin_addr,
            cancel,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Line-oriented JSON test client
struct TestClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(address: &str) -> Self {
        let stream = TcpStream::connect(address)
            .await
            .expect("Failed to connect to test server");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    async fn send(&mut self, value: serde_json::Value) {
        self.send_raw(&value.to_string()).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> T {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(10), self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a frame")
            .expect("Failed to read frame");
        assert!(n > 0, "Server closed the connection");
        serde_json::from_str(&line).expect("Failed to parse frame")
    }

    async fn recv_event(&mut self) -> ChannelEvent {
        self.recv().await
    }

    /// Read session output for `identifier` until `needle` shows up
    async fn read_output_until(&mut self, identifier: &str, needle: &str) -> String {
        let mut seen = String::new();
        loop {
            match self.recv_event().await {
                ChannelEvent::Message {
                    identifier: id,
                    message: ServerMessage::Output { data },
                } if id == identifier => {
                    seen.push_str(&data);
                    if seen.contains(needle) {
                        return seen;
                    }
                }
                ChannelEvent::Message {
                    message: ServerMessage::Exit,
                    ..
                } => panic!("session exited before {:?} appeared: {:?}", needle, seen),
                _ => {}
            }
        }
    }

    async fn wait_for_exit(&mut self, identifier: &str) {
        loop {
            if let ChannelEvent::Message {
                identifier: id,
                message: ServerMessage::Exit,
            } = self.recv_event().await
            {
                if id == identifier {
                    return;
                }
            }
        }
    }

    async fn admin(&mut self, request: AdminRequest) -> AdminResponse {
        self.send(serde_json::to_value(&request).unwrap()).await;
        self.recv().await
    }
}

async fn subscribe_local(client: &mut TestClient, identifier: &str) -> SessionId {
    client
        .send(json!({
            "command": "subscribe",
            "identifier": identifier,
            "params": {"mode": "local"},
        }))
        .await;

    match client.recv_event().await {
        ChannelEvent::ConfirmSubscription {
            identifier: id,
            session_id,
            scrollback,
        } => {
            assert_eq!(id, identifier);
            assert_eq!(scrollback, 2000);
            session_id
        }
        other => panic!("expected confirmation, got {:?}", other),
    }
}

async fn wait_for_count(broker: &TerminalBroker, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while broker.registry().total_count() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry never reached {} sessions",
            expected
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Groups connections by the client's IP address
struct PeerIpPolicy;

impl TerminalPolicy for PeerIpPolicy {
    fn connection_identity(&self, connection: &ConnectionInfo) -> ConnectionId {
        match connection.peer_addr {
            Some(addr) => ConnectionId::new(format!("peer-{}", addr.ip())),
            None => ConnectionId::new(connection.label.clone()),
        }
    }
}

#[tokio::test]
async fn test_subscribe_input_output_unsubscribe() {
    let harness = Harness::start(test_config()).await;
    let mut client = TestClient::connect(&harness.channel_addr).await;

    let session_id = subscribe_local(&mut client, "term-1").await;
    assert!(harness.broker.registry().find(&session_id).is_some());

    client
        .send(json!({
            "command": "message",
            "identifier": "term-1",
            "data": {"type": "input", "data": "echo $((6*7))ok\n"},
        }))
        .await;
    client.read_output_until("term-1", "42ok").await;

    client
        .send(json!({"command": "unsubscribe", "identifier": "term-1"}))
        .await;
    client.wait_for_exit("term-1").await;
    wait_for_count(&harness.broker, 0).await;
}

#[tokio::test]
async fn test_invalid_params_rejected() {
    let harness = Harness::start(test_config()).await;
    let mut client = TestClient::connect(&harness.channel_addr).await;

    client
        .send(json!({
            "command": "subscribe",
            "identifier": "bad",
            "params": {"mode": "ssh", "host": "example.com; rm -rf /", "auth_method": "key"},
        }))
        .await;

    assert_eq!(
        client.recv_event().await,
        ChannelEvent::RejectSubscription {
            identifier: "bad".to_string(),
            reason: "invalid_params".to_string(),
        }
    );
    assert_eq!(harness.broker.registry().total_count(), 0);
}

#[tokio::test]
async fn test_capacity_rejection_reason() {
    let config = BrokerConfig {
        max_sessions: Some(1),
        ..test_config()
    };
    let harness = Harness::start(config).await;
    let mut client = TestClient::connect(&harness.channel_addr).await;

    subscribe_local(&mut client, "one").await;
    client
        .send(json!({
            "command": "subscribe",
            "identifier": "two",
            "params": {"mode": "local"},
        }))
        .await;

    loop {
        match client.recv_event().await {
            ChannelEvent::RejectSubscription { identifier, reason } => {
                assert_eq!(identifier, "two");
                assert_eq!(reason, "capacity");
                break;
            }
            // Prompt output from the first session may arrive first
            ChannelEvent::Message { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let harness = Harness::start(test_config()).await;
    let mut client = TestClient::connect(&harness.channel_addr).await;

    client.send_raw("this is not json").await;
    assert!(matches!(
        client.recv_event().await,
        ChannelEvent::Error { .. }
    ));

    client
        .send(json!({"command": "launch", "identifier": "x"}))
        .await;
    assert!(matches!(
        client.recv_event().await,
        ChannelEvent::Error { .. }
    ));

    // Unknown message types and unknown identifiers are ignored
    let session_id = subscribe_local(&mut client, "t").await;
    client
        .send(json!({"command": "message", "identifier": "t", "data": {"type": "paste"}}))
        .await;
    client
        .send(json!({"command": "message", "identifier": "nope", "data": {"type": "input", "data": "x"}}))
        .await;
    assert!(harness.broker.registry().find(&session_id).is_some());
}

#[tokio::test]
async fn test_duplicate_identifier_is_an_error() {
    let harness = Harness::start(test_config()).await;
    let mut client = TestClient::connect(&harness.channel_addr).await;

    subscribe_local(&mut client, "dup").await;
    client
        .send(json!({
            "command": "subscribe",
            "identifier": "dup",
            "params": {"mode": "local"},
        }))
        .await;

    loop {
        match client.recv_event().await {
            ChannelEvent::Error { message } => {
                assert!(message.contains("dup"));
                break;
            }
            ChannelEvent::Message { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(harness.broker.registry().total_count(), 1);
}

#[tokio::test]
async fn test_disconnect_closes_all_subscriptions() {
    let harness = Harness::start(test_config()).await;

    {
        let mut client = TestClient::connect(&harness.channel_addr).await;
        subscribe_local(&mut client, "a").await;
        subscribe_local(&mut client, "b").await;
        assert_eq!(harness.broker.registry().total_count(), 2);
    }

    wait_for_count(&harness.broker, 0).await;
}

#[tokio::test]
async fn test_admin_lists_and_disconnects_sessions() {
    let harness = Harness::start(test_config()).await;
    let mut client = TestClient::connect(&harness.channel_addr).await;
    let mut admin = TestClient::connect(&harness.admin_addr).await;

    assert_eq!(admin.admin(AdminRequest::Ping).await, AdminResponse::Pong);

    let first = subscribe_local(&mut client, "a").await;
    subscribe_local(&mut client, "b").await;

    let owner = match admin
        .admin(AdminRequest::ListSessions {
            connection_id: None,
        })
        .await
    {
        AdminResponse::Sessions { sessions } => {
            assert_eq!(sessions.len(), 2);
            sessions[0].connection_id.to_string()
        }
        other => panic!("unexpected response {:?}", other),
    };

    assert_eq!(
        admin
            .admin(AdminRequest::CountSessions {
                connection_id: owner
            })
            .await,
        AdminResponse::Count { count: 2 }
    );

    assert_eq!(
        admin
            .admin(AdminRequest::Disconnect {
                session_id: first.to_string()
            })
            .await,
        AdminResponse::Disconnected { found: true }
    );
    client.wait_for_exit("a").await;

    assert_eq!(
        admin.admin(AdminRequest::DisconnectAll).await,
        AdminResponse::DisconnectedAll { count: 1 }
    );
    client.wait_for_exit("b").await;

    match admin.admin(AdminRequest::Status).await {
        AdminResponse::Status(status) => assert_eq!(status.session_count, 0),
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_identity_sees_peer_address() {
    let harness = Harness::start_with_policy(test_config(), Arc::new(PeerIpPolicy)).await;
    let mut first = TestClient::connect(&harness.channel_addr).await;
    let mut second = TestClient::connect(&harness.channel_addr).await;
    let mut admin = TestClient::connect(&harness.admin_addr).await;

    subscribe_local(&mut first, "a").await;
    subscribe_local(&mut second, "b").await;

    match admin
        .admin(AdminRequest::ListSessions {
            connection_id: None,
        })
        .await
    {
        AdminResponse::Sessions { sessions } => {
            assert_eq!(sessions.len(), 2);
            for session in &sessions {
                assert_eq!(session.connection_id.to_string(), "peer-127.0.0.1");
            }
        }
        other => panic!("unexpected response {:?}", other),
    }

    assert_eq!(
        admin
            .admin(AdminRequest::CountSessions {
                connection_id: "peer-127.0.0.1".to_string()
            })
            .await,
        AdminResponse::Count { count: 2 }
    );
}
