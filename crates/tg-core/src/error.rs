//! Core error types for termgate

use std::path::PathBuf;
use thiserror::Error;

/// Subscription parameters failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Mode missing or not `local`/`ssh`
    #[error("Invalid mode: {0:?}")]
    InvalidMode(Option<String>),

    /// SSH mode without a host
    #[error("SSH host is required")]
    MissingHost,

    /// Host contains characters outside the allowlist
    #[error("Invalid SSH host: {0:?}")]
    InvalidHost(String),

    /// User contains characters outside the allowlist
    #[error("Invalid SSH user: {0:?}")]
    InvalidUser(String),

    /// Auth method missing or not `key`/`password`
    #[error("Invalid SSH auth method: {0:?}")]
    InvalidAuthMethod(Option<String>),
}

/// The OS could not create the pseudo-terminal or start the process
#[derive(Error, Debug)]
pub enum SpawnError {
    /// Command vector was empty
    #[error("Empty command")]
    EmptyCommand,

    /// PTY allocation failed
    #[error("PTY allocation failed: {0}")]
    Pty(String),

    /// Exec of the target program failed
    #[error("Failed to spawn {program}: {message}")]
    Exec { program: String, message: String },
}

/// Reasons a subscription is refused before a session exists
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Parameters failed validation
    #[error("Invalid parameters: {0}")]
    Validation(#[from] ValidationError),

    /// Authorization hook (or the fail-closed default) denied the request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Too many subscriptions for this key within the window
    #[error("Rate limit exceeded for {key}")]
    RateLimited { key: String },

    /// Session cap reached
    #[error("Session limit reached ({max})")]
    Capacity { max: usize },

    /// Process could not be started
    #[error("Spawn failed: {0}")]
    Spawn(#[from] SpawnError),
}

impl BrokerError {
    /// Stable reason code reported to the client
    pub fn reason(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) => "invalid_params",
            BrokerError::Unauthorized(_) => "unauthorized",
            BrokerError::RateLimited { .. } => "rate_limited",
            BrokerError::Capacity { .. } => "capacity",
            BrokerError::Spawn(_) => "spawn_failed",
        }
    }
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session is stopping or its descriptors are closed
    #[error("Session closed")]
    Closed,

    /// I/O error on the PTY
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
