//! Per-session messages
//!
//! Once a subscription has been confirmed, the client and the broker
//! exchange small JSON objects discriminated by a `type` field:
//!
//! - client → broker: `{"type":"input","data":"ls\n"}` and
//!   `{"type":"resize","cols":120,"rows":40}`
//! - broker → client: `{"type":"output","data":"..."}` and `{"type":"exit"}`
//!
//! Inbound messages with an unknown `type`, or with fields of the wrong
//! shape, are ignored rather than treated as errors.

use serde::{Deserialize, Serialize};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }

    /// A size with a zero dimension cannot be applied to a PTY
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// Message sent by the client to an active session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keystrokes to forward to the process
    Input { data: String },

    /// Terminal window resize
    Resize { cols: u16, rows: u16 },
}

impl ClientMessage {
    /// Interpret a raw JSON message.
    ///
    /// Returns `None` for unknown types and malformed payloads.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("Ignoring client message: {}", e);
                None
            }
        }
    }
}

/// Message pushed by the broker to the client of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Process output, decoded as UTF-8
    Output { data: String },

    /// The process has exited; no further output follows
    Exit,
}

impl ServerMessage {
    /// Whether this is the terminal `exit` event
    pub fn is_exit(&self) -> bool {
        matches!(self, ServerMessage::Exit)
    }
}
