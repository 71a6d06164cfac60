//! Admin protocol for operator tools
//!
//! JSON-encoded requests and responses, one per line, over TCP on
//! localhost. Lets an operator inspect the session registry and
//! forcibly disconnect sessions independently of their owning clients.

use serde::{Deserialize, Serialize};

use crate::types::SessionEntry;

/// Request from an operator tool to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminRequest {
    /// Keepalive
    Ping,

    /// Broker status
    Status,

    /// List sessions, optionally only those owned by one connection identity
    ListSessions {
        #[serde(default)]
        connection_id: Option<String>,
    },

    /// Count sessions owned by a connection identity
    CountSessions { connection_id: String },

    /// Forcibly close one session
    Disconnect { session_id: String },

    /// Forcibly close every session
    DisconnectAll,
}

/// Response from the broker to an operator tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminResponse {
    /// Pong response
    Pong,

    /// Broker status
    Status(BrokerStatus),

    /// Session snapshots
    Sessions { sessions: Vec<SessionEntry> },

    /// Session count
    Count { count: usize },

    /// Result of a single disconnect
    Disconnected { found: bool },

    /// Result of disconnecting everything
    DisconnectedAll { count: usize },

    /// Error response
    Error { message: String },
}

/// Broker status information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatus {
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Number of active sessions
    pub session_count: usize,
    /// Session cap, if any
    pub max_sessions: Option<usize>,
    /// Broker version
    pub version: String,
    /// Channel listener address
    pub bind_address: String,
}
