//! tg-protocol: Channel protocol for termgate terminal sessions
//!
//! This crate defines the messages exchanged between a client and the
//! terminal broker: the per-session `input`/`resize` and `output`/`exit`
//! messages, the raw subscription parameters, and the JSON-lines channel
//! envelope used by the reference transport.

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;
pub mod params;
pub mod session;

pub use channel::{ChannelCommand, ChannelEvent};
pub use codec::{JsonLinesCodec, MAX_LINE_LENGTH};
pub use error::ProtocolError;
pub use message::{ClientMessage, ServerMessage, TerminalSize};
pub use params::SubscribeParams;
pub use session::SessionId;
