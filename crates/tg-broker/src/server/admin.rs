//! Admin server
//!
//! Listens on localhost TCP for operator requests: status, session listing
//! and forced disconnects.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use tg_core::admin::{AdminRequest, AdminResponse, BrokerStatus};
use tg_core::ConnectionId;
use tg_protocol::{JsonLinesCodec, ProtocolError, SessionId};

use crate::broker::TerminalBroker;

/// Admin server for operator tools
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct AdminServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    broker: Arc<TerminalBroker>,
    /// When the broker started
    start_time: Instant,
    shutdown_token: CancellationToken,
}

impl AdminServer {
    /// Create a new admin server
    pub fn new(address: String, broker: Arc<TerminalBroker>) -> Self {
        Self {
            address,
            broker,
            start_time: Instant::now(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind admin server to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve an already-bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Admin server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if !peer_addr.ip().is_loopback() {
                                tracing::warn!("Rejected non-localhost admin connection from {}", peer_addr);
                                continue;
                            }

                            let broker = Arc::clone(&self.broker);
                            let start_time = self.start_time;
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, broker, start_time).await {
                                    tracing::warn!("Admin client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept admin connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_client(
    stream: TcpStream,
    broker: Arc<TerminalBroker>,
    start_time: Instant,
) -> Result<()> {
    let mut framed = Framed::new(stream, JsonLinesCodec::<AdminRequest, AdminResponse>::new());

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(request) => handle_request(request, &broker, start_time).await,
            Err(ProtocolError::Serialization(e)) => {
                // The codec stops after an error, so report it and hang up
                framed
                    .send(AdminResponse::Error {
                        message: format!("Invalid request: {}", e),
                    })
                    .await?;
                break;
            }
            Err(e) => return Err(e.into()),
        };
        framed.send(response).await?;
    }

    Ok(())
}

async fn handle_request(
    request: AdminRequest,
    broker: &TerminalBroker,
    start_time: Instant,
) -> AdminResponse {
    let registry = broker.registry();

    match request {
        AdminRequest::Ping => AdminResponse::Pong,

        AdminRequest::Status => AdminResponse::Status(BrokerStatus {
            uptime_secs: start_time.elapsed().as_secs(),
            session_count: registry.total_count(),
            max_sessions: broker.config().max_sessions,
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_address: broker.config().server.bind_address.clone(),
        }),

        AdminRequest::ListSessions { connection_id } => {
            let mut sessions = match connection_id {
                Some(id) => registry.list_by_identity(&ConnectionId::new(id)),
                None => registry.list_all().into_values().collect(),
            };
            sessions.sort_by_key(|s| s.started_at);
            AdminResponse::Sessions { sessions }
        }

        AdminRequest::CountSessions { connection_id } => AdminResponse::Count {
            count: registry.count_by_identity(&ConnectionId::new(connection_id)),
        },

        AdminRequest::Disconnect { session_id } => match session_id.parse::<SessionId>() {
            Ok(id) => AdminResponse::Disconnected {
                found: broker.force_disconnect(&id).await,
            },
            Err(_) => AdminResponse::Error {
                message: format!("Invalid session id: {}", session_id),
            },
        },

        AdminRequest::DisconnectAll => {
            let count = broker.force_disconnect_all().await;
            tracing::info!("Admin disconnected {} session(s)", count);
            AdminResponse::DisconnectedAll { count }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DefaultPolicy;
    use tg_core::config::BrokerConfig;

    fn broker() -> TerminalBroker {
        TerminalBroker::new(BrokerConfig::default(), Arc::new(DefaultPolicy))
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let broker = broker();
        let start = Instant::now();

        assert_eq!(
            handle_request(AdminRequest::Ping, &broker, start).await,
            AdminResponse::Pong
        );

        match handle_request(AdminRequest::Status, &broker, start).await {
            AdminResponse::Status(status) => {
                assert_eq!(status.session_count, 0);
                assert_eq!(status.max_sessions, None);
                assert_eq!(status.bind_address, "127.0.0.1:7681");
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_queries() {
        let broker = broker();
        let start = Instant::now();

        assert_eq!(
            handle_request(AdminRequest::ListSessions { connection_id: None }, &broker, start).await,
            AdminResponse::Sessions { sessions: vec![] }
        );
        assert_eq!(
            handle_request(
                AdminRequest::CountSessions {
                    connection_id: "conn-1".to_string()
                },
                &broker,
                start
            )
            .await,
            AdminResponse::Count { count: 0 }
        );
        assert_eq!(
            handle_request(AdminRequest::DisconnectAll, &broker, start).await,
            AdminResponse::DisconnectedAll { count: 0 }
        );
    }

    #[tokio::test]
    async fn test_disconnect_unknown_and_invalid() {
        let broker = broker();
        let start = Instant::now();

        let unknown = SessionId::new().to_string();
        assert_eq!(
            handle_request(AdminRequest::Disconnect { session_id: unknown }, &broker, start).await,
            AdminResponse::Disconnected { found: false }
        );

        let response = handle_request(
            AdminRequest::Disconnect {
                session_id: "not-a-uuid".to_string(),
            },
            &broker,
            start,
        )
        .await;
        assert!(matches!(response, AdminResponse::Error { .. }));
    }
}
