//! tg-core: Core abstractions and configuration for termgate
//!
//! This crate provides the error taxonomy, shared domain types, the
//! session control trait and configuration structures used by the broker
//! and its servers.

pub mod admin;
pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{BrokerError, SessionError, SpawnError, ValidationError};
pub use types::{ConnectionId, ConnectionInfo, Environment, ResolvedIdentity, SessionEntry, SessionMode};
