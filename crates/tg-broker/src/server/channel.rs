//! Channel server
//!
//! Listens on localhost TCP for client connections. Each connection carries
//! newline-delimited JSON envelopes and may hold many terminal
//! subscriptions, keyed by a client-chosen identifier.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use tg_core::{ConnectionId, ConnectionInfo};
use tg_protocol::{
    ChannelCommand, ChannelEvent, ClientMessage, JsonLinesCodec, ServerMessage, SubscribeParams,
    MAX_LINE_LENGTH,
};

use crate::broker::TerminalBroker;
use crate::session::TerminalSession;

/// Channel server bridging client connections to the broker
///
/// Listens on localhost (127.0.0.1) only.
pub struct ChannelServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    broker: Arc<TerminalBroker>,
    shutdown_token: CancellationToken,
}

impl ChannelServer {
    /// Create a new channel server
    pub fn new(address: String, broker: Arc<TerminalBroker>) -> Self {
        Self {
            address,
            broker,
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
            .with_context(|| format!("Failed to bind channel server to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Channel server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Channel server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Only accept connections from localhost
                            if !peer_addr.ip().is_loopback() {
                                tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                                continue;
                            }

                            let broker = Arc::clone(&self.broker);
                            let cancel = self.shutdown_token.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, broker, cancel).await {
                                    tracing::warn!("Channel connection from {} failed: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept channel connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Per-connection state
struct Connection {
    connection_id: ConnectionId,
    broker: Arc<TerminalBroker>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    subscriptions: HashMap<String, Arc<TerminalSession>>,
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    broker: Arc<TerminalBroker>,
    cancel: CancellationToken,
) -> Result<()> {
    let label = format!("conn-{}", uuid::Uuid::new_v4().simple());
    let info = ConnectionInfo::new(label).with_peer(peer_addr);
    let connection_id = broker.connection_identity(&info);
    tracing::info!("Channel connection {} from {}", connection_id, peer_addr);

    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut sink = FramedWrite::new(
        write_half,
        JsonLinesCodec::<ChannelCommand, ChannelEvent>::new(),
    );

    // Single writer owning the transmit side
    let (events, mut events_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if let Err(e) = sink.send(event).await {
                tracing::debug!("Channel write failed: {}", e);
                break;
            }
        }
    });

    let mut conn = Connection {
        connection_id,
        broker,
        events,
        subscriptions: HashMap::new(),
    };

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),

            line = lines.next() => match line {
                None => break Ok(()),
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ChannelCommand>(line) {
                        Ok(command) => conn.handle_command(command).await,
                        Err(e) => conn.send(ChannelEvent::Error {
                            message: format!("Invalid frame: {}", e),
                        }),
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    conn.send(ChannelEvent::Error {
                        message: format!("Frame exceeds {} bytes", MAX_LINE_LENGTH),
                    });
                    break Err(anyhow::anyhow!("frame too large"));
                }
                Some(Err(LinesCodecError::Io(e))) => break Err(e.into()),
            },
        }
    };

    tracing::info!(
        "Channel connection {} closed, unsubscribing {} session(s)",
        conn.connection_id,
        conn.subscriptions.len()
    );
    conn.close_all().await;

    drop(conn);
    let _ = writer.await;
    result
}

impl Connection {
    fn send(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Subscribe { identifier, params } => {
                self.subscribe(identifier, params).await;
            }
            ChannelCommand::Message { identifier, data } => {
                let Some(session) = self.subscriptions.get(&identifier) else {
                    tracing::debug!("Message for unknown subscription {}", identifier);
                    return;
                };
                if let Some(message) = ClientMessage::from_value(data) {
                    session.receive(message).await;
                }
            }
            ChannelCommand::Unsubscribe { identifier } => {
                if let Some(session) = self.subscriptions.remove(&identifier) {
                    tracing::debug!("Unsubscribing {} ({})", identifier, session.id());
                    tokio::spawn(async move { session.close().await });
                }
            }
        }
    }

    async fn subscribe(&mut self, identifier: String, params: serde_json::Value) {
        if self
            .subscriptions
            .get(&identifier)
            .is_some_and(|s| !s.is_closed())
        {
            self.send(ChannelEvent::Error {
                message: format!("Already subscribed: {}", identifier),
            });
            return;
        }

        let params = if params.is_null() {
            SubscribeParams::default()
        } else {
            match serde_json::from_value::<SubscribeParams>(params) {
                Ok(params) => params,
                Err(e) => {
                    tracing::debug!("Unparseable subscribe params for {}: {}", identifier, e);
                    self.send(ChannelEvent::RejectSubscription {
                        identifier,
                        reason: "invalid_params".to_string(),
                    });
                    return;
                }
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        match self
            .broker
            .subscribe(&self.connection_id, params, outbound)
            .await
        {
            Ok(session) => {
                self.send(ChannelEvent::ConfirmSubscription {
                    identifier: identifier.clone(),
                    session_id: session.id(),
                    scrollback: self.broker.config().scrollback,
                });
                spawn_forwarder(identifier.clone(), outbound_rx, self.events.clone());
                self.subscriptions.insert(identifier, session);
            }
            Err(e) => {
                self.send(ChannelEvent::RejectSubscription {
                    identifier,
                    reason: e.reason().to_string(),
                });
            }
        }
    }

    async fn close_all(&mut self) {
        let closing = self
            .subscriptions
            .drain()
            .map(|(_, session)| async move { session.close().await });
        futures::future::join_all(closing).await;
    }
}

/// Wrap a session's output in channel envelopes until its exit message
fn spawn_forwarder(
    identifier: String,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let exit = message.is_exit();
            let event = ChannelEvent::Message {
                identifier: identifier.clone(),
                message,
            };
            if events.send(event).is_err() || exit {
                break;
            }
        }
    });
}
