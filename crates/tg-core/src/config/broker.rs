//! Broker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::Environment;

/// Configuration for the terminal broker
///
/// Set once at startup and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Command spawned for local sessions
    pub default_shell: Vec<String>,

    /// `TERM` passed to the PTY
    pub term: String,

    /// How long to wait after SIGTERM (and again after SIGKILL)
    #[serde(with = "duration_secs")]
    pub kill_escalation_wait: Duration,

    /// Maximum concurrent sessions (None = unlimited)
    pub max_sessions: Option<usize>,

    /// Maximum new sessions per rate-limit key within the window (None = disabled)
    pub rate_limit: Option<usize>,

    /// Sliding window for rate limiting
    #[serde(with = "duration_secs")]
    pub rate_limit_period: Duration,

    /// Scrollback lines advertised to the client widget
    pub scrollback: usize,

    /// Reject, in production, subscriptions the policy did not explicitly decide
    pub require_explicit_authorization: bool,

    /// Deployment environment
    pub environment: Environment,

    /// Listener addresses
    pub server: ServerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_shell: vec!["bash".to_string(), "--login".to_string()],
            term: "xterm-256color".to_string(),
            kill_escalation_wait: Duration::from_secs(3),
            max_sessions: None,
            rate_limit: None,
            rate_limit_period: Duration::from_secs(60),
            scrollback: 10_000,
            require_explicit_authorization: true,
            environment: Environment::default(),
            server: ServerConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Check values that would make the broker unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.default_shell.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "default_shell must name a program".to_string(),
                ))
            }
        }

        if self.term.trim().is_empty() {
            return Err(ConfigError::Invalid("term must not be empty".to_string()));
        }

        if self.rate_limit.is_some() && self.rate_limit_period.is_zero() {
            return Err(ConfigError::Invalid(
                "rate_limit_period must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Addresses the daemon listens on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Channel listener (loopback only)
    pub bind_address: String,

    /// Admin listener (loopback only, disabled when unset)
    pub admin_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7681".to_string(),
            admin_address: None,
        }
    }
}
