//! Raw subscription parameters
//!
//! These are supplied by the client when it subscribes and are untrusted.
//! Nothing here is validated; the broker's validator decides what is
//! acceptable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::TerminalSize;

/// Untyped key/value input supplied at subscribe time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// `local` or `ssh`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// SSH target host
    #[serde(default, alias = "ssh_host", skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// SSH user (empty = fall back to the resolved identity, then `root`)
    #[serde(default, alias = "ssh_user", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// SSH port, as a number or a numeric string
    #[serde(default, alias = "ssh_port", skip_serializing_if = "Option::is_none")]
    pub port: Option<Value>,

    /// `key` or `password`
    #[serde(
        default,
        alias = "ssh_auth_method",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_method: Option<String>,

    /// Initial terminal width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,

    /// Initial terminal height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,

    /// Any other keys, kept for policy hooks (e.g. a `host_id`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubscribeParams {
    /// Parameters for a local shell session
    pub fn local() -> Self {
        Self {
            mode: Some("local".to_string()),
            ..Self::default()
        }
    }

    /// Parameters for an SSH session
    pub fn ssh(host: impl Into<String>, auth_method: impl Into<String>) -> Self {
        Self {
            mode: Some("ssh".to_string()),
            host: Some(host.into()),
            auth_method: Some(auth_method.into()),
            ..Self::default()
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: impl Into<Value>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Initial terminal size, falling back to 24x80 for missing or zero values
    pub fn initial_size(&self) -> TerminalSize {
        let default = TerminalSize::default();
        TerminalSize::new(
            self.rows.filter(|r| *r > 0).unwrap_or(default.rows),
            self.cols.filter(|c| *c > 0).unwrap_or(default.cols),
        )
    }

    /// Look up an extra parameter by key
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
