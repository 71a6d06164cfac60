//! Channel envelope
//!
//! One duplex connection carries any number of subscriptions. Each
//! subscription is named by a client-chosen `identifier`, and every frame
//! in either direction names the subscription it belongs to.
//!
//! Message flow for one subscription:
//!
//! 1. Client sends `subscribe` with raw parameters
//! 2. Broker answers `confirm_subscription` (with the session id) or
//!    `reject_subscription` (with a reason code)
//! 3. `message` frames flow both ways: client messages carry
//!    [`ClientMessage`](crate::ClientMessage) JSON, broker messages carry
//!    [`ServerMessage`]
//! 4. Client sends `unsubscribe`, or the broker sends an `exit` message
//!    when the process ends

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ServerMessage;
use crate::session::SessionId;

/// Frame sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ChannelCommand {
    /// Open a terminal session
    Subscribe {
        identifier: String,
        /// Raw parameters, interpreted as [`SubscribeParams`](crate::SubscribeParams)
        #[serde(default)]
        params: Value,
    },

    /// Deliver a client message to an open session
    Message { identifier: String, data: Value },

    /// Close a session
    Unsubscribe { identifier: String },
}

impl ChannelCommand {
    /// The subscription this frame refers to
    pub fn identifier(&self) -> &str {
        match self {
            ChannelCommand::Subscribe { identifier, .. }
            | ChannelCommand::Message { identifier, .. }
            | ChannelCommand::Unsubscribe { identifier } => identifier,
        }
    }
}

/// Frame sent by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Subscription admitted and the process is running
    ConfirmSubscription {
        identifier: String,
        session_id: SessionId,
        /// Scrollback lines the client widget should keep
        scrollback: usize,
    },

    /// Subscription refused; nothing was spawned
    RejectSubscription { identifier: String, reason: String },

    /// A message from the session
    Message {
        identifier: String,
        message: ServerMessage,
    },

    /// Connection-level error (bad frame, duplicate identifier, ...)
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_command_shape() {
        let cmd: ChannelCommand = serde_json::from_value(json!({
            "command": "subscribe",
            "identifier": "term-1",
            "params": {"mode": "local"}
        }))
        .unwrap();

        assert_eq!(cmd.identifier(), "term-1");
        match cmd {
            ChannelCommand::Subscribe { params, .. } => {
                assert_eq!(params, json!({"mode": "local"}));
            }
            other => panic!("Expected Subscribe, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_without_params() {
        let cmd: ChannelCommand =
            serde_json::from_value(json!({"command": "subscribe", "identifier": "a"})).unwrap();
        assert!(matches!(cmd, ChannelCommand::Subscribe { params: Value::Null, .. }));
    }

    #[test]
    fn test_message_event_shape() {
        let event = ChannelEvent::Message {
            identifier: "term-1".to_string(),
            message: ServerMessage::Exit,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "message", "identifier": "term-1", "message": {"type": "exit"}})
        );
    }

    #[test]
    fn test_reject_event_shape() {
        let event = ChannelEvent::RejectSubscription {
            identifier: "x".to_string(),
            reason: "rate_limited".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "reject_subscription");
        assert_eq!(value["reason"], "rate_limited");
    }
}
