//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use tg_protocol::SessionId;

/// Identity of the client connection that owns a session
///
/// Opaque to the broker; supplied by the transport layer (optionally
/// rewritten by the policy's connection-identity hook).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the transport knows about a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Transport-assigned connection label
    pub label: String,
    /// Remote address, if the transport has one
    pub peer_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// Create connection info without a peer address
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            peer_addr: None,
        }
    }

    /// Attach the peer address
    pub fn with_peer(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }
}

/// Kind of process backing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Local login shell
    Local,
    /// `ssh` client to a remote host
    Ssh,
}

impl SessionMode {
    /// Parse an exact mode string (`local` or `ssh`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "ssh" => Some(Self::Ssh),
            _ => None,
        }
    }

    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Local => "local",
            SessionMode::Ssh => "ssh",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SSH identity override produced by the policy's identity resolver
///
/// Computed once per session before authorization and reused verbatim
/// when the command is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Path to an SSH private key
    pub identity: Option<String>,
    /// Remote user to log in as when the client gave none
    pub user: Option<String>,
}

impl ResolvedIdentity {
    /// Identity with only a user override
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            identity: None,
            user: Some(user.into()),
        }
    }

    /// Set the identity file
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Whether the resolver supplied nothing
    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.user.is_none()
    }
}

/// Deployment environment, used to pick the default authorization policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Automated tests
    Test,
    /// Production: unauthorized subscriptions fail closed
    Production,
}

impl Environment {
    /// Whether this is a production deployment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Snapshot of a live session's metadata, as stored in the registry
///
/// Always handed out by value so callers never alias broker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Session ID
    pub session_id: SessionId,
    /// Owning connection identity
    pub connection_id: ConnectionId,
    /// Local shell or SSH
    pub mode: SessionMode,
    /// Process ID of the spawned process
    pub pid: u32,
    /// Start time, Unix milliseconds
    pub started_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_mode_parse_is_exact() {
        assert_eq!(SessionMode::parse("local"), Some(SessionMode::Local));
        assert_eq!(SessionMode::parse("ssh"), Some(SessionMode::Ssh));
        assert_eq!(SessionMode::parse("telnet"), None);
        assert_eq!(SessionMode::parse("SSH"), None);
        assert_eq!(SessionMode::parse(" local"), None);
    }

    #[test]
    fn test_environment_default_is_development() {
        assert_eq!(Environment::default(), Environment::Development);
        assert!(!Environment::Test.is_production());
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn test_environment_serde() {
        let env: Environment = serde_json::from_str("\"production\"").unwrap();
        assert_eq!(env, Environment::Production);
        assert_eq!(format!("{}", env), "production");
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("Production".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!("test".parse::<Environment>(), Ok(Environment::Test));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_resolved_identity_builders() {
        assert!(ResolvedIdentity::default().is_empty());

        let id = ResolvedIdentity::user("deploy").with_identity("/keys/id_ed25519");
        assert_eq!(id.user.as_deref(), Some("deploy"));
        assert_eq!(id.identity.as_deref(), Some("/keys/id_ed25519"));
        assert!(!id.is_empty());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::from("conn-7");
        assert_eq!(format!("{}", id), "conn-7");
        assert_eq!(id.as_str(), "conn-7");
    }
}
