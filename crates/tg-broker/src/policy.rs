//! Host-application extension points
//!
//! A [`TerminalPolicy`] decides who may open terminals and observes what
//! flows through them. Every method has a default, so an application only
//! overrides what it needs.

use async_trait::async_trait;
use tg_core::config::BrokerConfig;
use tg_core::{BrokerError, ConnectionId, ConnectionInfo, ResolvedIdentity, SessionEntry, SessionMode};
use tg_protocol::{SessionId, SubscribeParams};

use crate::registry::SessionRegistry;

/// Outcome of the authorization hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Allow the subscription
    Granted,
    /// Refuse it, with a reason for the logs
    Denied(String),
    /// The policy has no opinion; configuration decides
    Unspecified,
}

/// Everything the authorization hook may look at
pub struct AuthorizationContext<'a> {
    /// Identity of the subscribing connection
    pub connection_id: &'a ConnectionId,
    /// Raw subscription parameters
    pub params: &'a SubscribeParams,
    /// Validated session mode
    pub mode: SessionMode,
    /// Identity chosen by the resolver (empty for local sessions)
    pub identity: &'a ResolvedIdentity,
    /// Read view of live sessions, e.g. for per-user caps
    pub registry: &'a SessionRegistry,
}

/// The session handed to lifecycle and I/O hooks
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub entry: SessionEntry,
    pub params: SubscribeParams,
}

impl SessionContext {
    /// Session ID
    pub fn session_id(&self) -> SessionId {
        self.entry.session_id
    }

    /// Owning connection identity
    pub fn connection_id(&self) -> &ConnectionId {
        &self.entry.connection_id
    }
}

/// Pluggable authorization, identity and audit hooks
///
/// Sync hooks run on the session's I/O path (the output hook on the reader
/// thread) and must not block.
#[async_trait]
pub trait TerminalPolicy: Send + Sync {
    /// Decide whether a validated subscription may proceed
    async fn authorize(&self, _ctx: &AuthorizationContext<'_>) -> Authorization {
        Authorization::Unspecified
    }

    /// Pick the SSH key and fallback user; called once per SSH subscription
    async fn resolve_identity(&self, _params: &SubscribeParams) -> ResolvedIdentity {
        ResolvedIdentity::default()
    }

    /// Derive the connection identity from transport information
    fn connection_identity(&self, connection: &ConnectionInfo) -> ConnectionId {
        ConnectionId::new(connection.label.clone())
    }

    /// Key that subscriptions are rate-limited under
    fn rate_limit_key(&self, connection_id: &ConnectionId, _params: &SubscribeParams) -> String {
        connection_id.to_string()
    }

    /// Called with each chunk of client input before it reaches the process
    fn on_input(&self, _session: &SessionContext, _data: &str) {}

    /// Called with each decoded chunk of process output
    fn on_output(&self, _session: &SessionContext, _data: &str) {}

    /// Called once when a session becomes active
    fn on_session_start(&self, _session: &SessionContext) {}

    /// Called once when an active session closes
    fn on_session_end(&self, _session: &SessionContext) {}
}

/// Policy that overrides nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl TerminalPolicy for DefaultPolicy {}

/// Turn an authorization decision into admit/reject
///
/// `Unspecified` is allowed when explicit authorization is not required,
/// rejected in production, and allowed with a warning elsewhere.
pub(crate) fn enforce(decision: Authorization, config: &BrokerConfig) -> Result<(), BrokerError> {
    match decision {
        Authorization::Granted => Ok(()),
        Authorization::Denied(reason) => Err(BrokerError::Unauthorized(reason)),
        Authorization::Unspecified if !config.require_explicit_authorization => Ok(()),
        Authorization::Unspecified if config.environment.is_production() => {
            tracing::error!(
                "Terminal subscription rejected: no authorization policy is configured. \
                 Implement TerminalPolicy::authorize or set require_explicit_authorization = false"
            );
            Err(BrokerError::Unauthorized(
                "no authorization policy configured".to_string(),
            ))
        }
        Authorization::Unspecified => {
            tracing::warn!(
                "Terminal subscription allowed without authorization ({} environment); \
                 this is rejected in production",
                config.environment
            );
            Ok(())
        }
    }
}
