//! Subscription parameter validation
//!
//! Everything a client sends at subscribe time is untrusted. Hosts and users
//! end up as `ssh` arguments, so both are checked against strict character
//! allowlists rather than blocklists.

use serde_json::Value;
use tg_core::{ResolvedIdentity, SessionMode, ValidationError};
use tg_protocol::SubscribeParams;

/// Port used when the client gives none or an unusable one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How the `ssh` client authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Public key
    Key,
    /// Interactive password
    Password,
}

impl AuthMethod {
    /// Parse an exact auth method string (`key` or `password`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "key" => Some(Self::Key),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

/// Normalized SSH destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    /// Explicit user; `None` when the client sent none or an empty string
    pub user: Option<String>,
    pub auth_method: AuthMethod,
}

/// Parameters that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedParams {
    /// Local shell
    Local,
    /// SSH client session
    Ssh(SshTarget),
}

impl ValidatedParams {
    /// Session mode
    pub fn mode(&self) -> SessionMode {
        match self {
            ValidatedParams::Local => SessionMode::Local,
            ValidatedParams::Ssh(_) => SessionMode::Ssh,
        }
    }

    /// SSH target, if this is an SSH session
    pub fn ssh_target(&self) -> Option<&SshTarget> {
        match self {
            ValidatedParams::Local => None,
            ValidatedParams::Ssh(target) => Some(target),
        }
    }
}

/// Validate raw subscription parameters
pub fn validate(params: &SubscribeParams) -> Result<ValidatedParams, ValidationError> {
    let mode = params
        .mode
        .as_deref()
        .and_then(SessionMode::parse)
        .ok_or_else(|| ValidationError::InvalidMode(params.mode.clone()))?;

    match mode {
        SessionMode::Local => Ok(ValidatedParams::Local),
        SessionMode::Ssh => {
            let host = match params.host.as_deref() {
                None | Some("") => return Err(ValidationError::MissingHost),
                Some(host) => validate_host(host)?,
            };

            let user = match params.user.as_deref() {
                None | Some("") => None,
                Some(user) => {
                    validate_user(user)?;
                    Some(user.to_string())
                }
            };

            let auth_method = params
                .auth_method
                .as_deref()
                .and_then(AuthMethod::parse)
                .ok_or_else(|| ValidationError::InvalidAuthMethod(params.auth_method.clone()))?;

            Ok(ValidatedParams::Ssh(SshTarget {
                host,
                port: parse_port(params.port.as_ref()),
                user,
                auth_method,
            }))
        }
    }
}

/// Check a host against the allowlist
///
/// Letters, digits, `.`, `-`, `:`, `[` and `]` only: hostnames, IPv4 and
/// IPv6 (bare or bracketed). Whitespace anywhere rejects.
pub fn validate_host(host: &str) -> Result<String, ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::MissingHost);
    }
    if !host.chars().all(is_host_char) {
        return Err(ValidationError::InvalidHost(host.to_string()));
    }
    Ok(host.to_string())
}

/// Check a user name against the allowlist
///
/// ASCII alphanumerics, `.`, `-` and `_`. A leading `-` is refused so the
/// `user@host` argument can never be read as an option.
pub fn validate_user(user: &str) -> Result<(), ValidationError> {
    let valid = !user.is_empty()
        && !user.starts_with('-')
        && user.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidUser(user.to_string()))
    }
}

/// Validate the resolver's user when it becomes the effective user
///
/// Only applies when the client gave no explicit user; an empty resolved
/// user means the `root` fallback and needs no check.
pub fn validate_effective_user(
    target: &SshTarget,
    identity: &ResolvedIdentity,
) -> Result<(), ValidationError> {
    if target.user.is_some() {
        return Ok(());
    }
    match identity.user.as_deref() {
        None | Some("") => Ok(()),
        Some(user) => validate_user(user),
    }
}

/// Parse a port given as a JSON number or numeric string
///
/// Anything missing, non-numeric or outside 1-65535 falls back to 22.
pub fn parse_port(value: Option<&Value>) -> u16 {
    let port = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    port.and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
        .unwrap_or(DEFAULT_SSH_PORT)
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']')
}
