//! tg-broker: Terminal session broker
//!
//! For every client subscription the broker validates the parameters,
//! resolves an SSH identity, asks the policy for authorization, applies
//! rate and capacity limits, spawns a PTY-backed shell (local or `ssh`),
//! bridges its I/O to the client, and tears the process down with signal
//! escalation when the subscription ends.
//!
//! The `server` module holds the reference channel transport and the admin
//! listener used by the `tg-broker` daemon.

pub mod broker;
pub mod command;
pub mod policy;
pub mod pty;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod session;
pub mod validate;

pub use broker::{Admission, TerminalBroker};
pub use policy::{Authorization, AuthorizationContext, DefaultPolicy, SessionContext, TerminalPolicy};
pub use rate_limit::RateLimiter;
pub use registry::{SessionRegistry, SlotReservation};
pub use session::TerminalSession;
