//! Session traits

use async_trait::async_trait;

use crate::types::SessionEntry;

/// Broker-side lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Subscription received, nothing checked yet
    Subscribed,
    /// Running the parameter validator
    Validating,
    /// Asking the policy for an SSH identity override
    ResolvingIdentity,
    /// Asking the policy whether the subscription is allowed
    Authorizing,
    /// Consulting the rate limiter
    RateLimiting,
    /// Checking the session cap
    CapacityCheck,
    /// Starting the process
    Spawning,
    /// Process running, I/O bridged
    Active,
    /// Teardown in progress
    Closing,
    /// Terminal state
    Closed,
}

/// Out-of-band control over a live session
///
/// The registry stores one of these per session so that administrative
/// disconnects can drive a session through teardown without going
/// through its owning client.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Snapshot of the session's metadata
    fn entry(&self) -> SessionEntry;

    /// Stop the session: end its reader, deregister it and terminate the
    /// process. Must be idempotent.
    async fn shutdown(&self);
}
