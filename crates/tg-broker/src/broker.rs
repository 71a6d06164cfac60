//! Subscription admission and session startup
//!
//! Every subscription runs the same gate sequence: validate, resolve the SSH
//! identity, authorize, rate-limit, check capacity, build the command, and
//! only then spawn. Nothing is registered or spawned until every gate passes.

use std::sync::Arc;

use tg_core::config::BrokerConfig;
use tg_core::time::current_time_millis;
use tg_core::traits::SessionState;
use tg_core::{BrokerError, ConnectionId, ConnectionInfo, ResolvedIdentity, SessionEntry, SessionMode};
use tg_protocol::{ServerMessage, SessionId, SubscribeParams};
use tokio::sync::mpsc;

use crate::command;
use crate::policy::{self, AuthorizationContext, SessionContext, TerminalPolicy};
use crate::pty;
use crate::rate_limit::RateLimiter;
use crate::registry::{SessionRegistry, SlotReservation};
use crate::session::TerminalSession;
use crate::validate::{self, ValidatedParams};

/// A subscription that passed every gate and holds a capacity slot
///
/// Dropping it releases the slot without spawning anything.
#[derive(Debug)]
pub struct Admission {
    connection_id: ConnectionId,
    params: SubscribeParams,
    validated: ValidatedParams,
    identity: ResolvedIdentity,
    command: Vec<String>,
    reservation: SlotReservation,
}

impl Admission {
    /// Owning connection identity
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Validated parameters
    pub fn validated(&self) -> &ValidatedParams {
        &self.validated
    }

    /// Session mode
    pub fn mode(&self) -> SessionMode {
        self.validated.mode()
    }

    /// Identity chosen by the resolver
    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    /// Argument vector that will be spawned
    pub fn command(&self) -> &[String] {
        &self.command
    }
}

/// Terminal session broker
///
/// Holds the configuration, the policy, and the registry and rate-limit
/// tables. Each broker gets its own tables unless they are passed in.
pub struct TerminalBroker {
    config: Arc<BrokerConfig>,
    policy: Arc<dyn TerminalPolicy>,
    registry: Arc<SessionRegistry>,
    limiter: Arc<RateLimiter>,
}

impl TerminalBroker {
    /// Create a broker with fresh registry and rate-limit tables
    pub fn new(config: BrokerConfig, policy: Arc<dyn TerminalPolicy>) -> Self {
        Self::with_stores(
            config,
            policy,
            Arc::new(SessionRegistry::new()),
            Arc::new(RateLimiter::new()),
        )
    }

    /// Create a broker sharing existing tables
    pub fn with_stores(
        config: BrokerConfig,
        policy: Arc<dyn TerminalPolicy>,
        registry: Arc<SessionRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            policy,
            registry,
            limiter,
        }
    }

    /// Broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Live session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Subscription rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Derive a connection identity through the policy
    pub fn connection_identity(&self, connection: &ConnectionInfo) -> ConnectionId {
        self.policy.connection_identity(connection)
    }

    /// Run every admission gate without spawning
    pub async fn admit(
        &self,
        connection_id: &ConnectionId,
        params: SubscribeParams,
    ) -> Result<Admission, BrokerError> {
        let mut state = SessionState::Subscribed;
        let result = self.run_gates(connection_id, params, &mut state).await;

        if let Err(e) = &result {
            log_rejection(connection_id, state, e);
        }
        result
    }

    async fn run_gates(
        &self,
        connection_id: &ConnectionId,
        params: SubscribeParams,
        state: &mut SessionState,
    ) -> Result<Admission, BrokerError> {
        *state = SessionState::Validating;
        let validated = validate::validate(&params)?;

        *state = SessionState::ResolvingIdentity;
        let identity = match &validated {
            ValidatedParams::Ssh(target) => {
                let identity = self.policy.resolve_identity(&params).await;
                validate::validate_effective_user(target, &identity)?;
                identity
            }
            ValidatedParams::Local => ResolvedIdentity::default(),
        };

        *state = SessionState::Authorizing;
        let decision = self
            .policy
            .authorize(&AuthorizationContext {
                connection_id,
                params: &params,
                mode: validated.mode(),
                identity: &identity,
                registry: &self.registry,
            })
            .await;
        policy::enforce(decision, &self.config)?;

        *state = SessionState::RateLimiting;
        if let Some(limit) = self.config.rate_limit {
            let key = self.policy.rate_limit_key(connection_id, &params);
            if !self
                .limiter
                .admit(&key, limit, self.config.rate_limit_period)
            {
                return Err(BrokerError::RateLimited { key });
            }
        }

        *state = SessionState::CapacityCheck;
        let reservation = self
            .registry
            .reserve(self.config.max_sessions)
            .ok_or(BrokerError::Capacity {
                max: self.config.max_sessions.unwrap_or(0),
            })?;

        let command = command::build_command(&validated, &identity, &self.config.default_shell);
        tracing::debug!(
            "Admitted {} subscription from {}: {:?}",
            validated.mode(),
            connection_id,
            command
        );

        Ok(Admission {
            connection_id: connection_id.clone(),
            params,
            validated,
            identity,
            command,
            reservation,
        })
    }

    /// Spawn an admitted session and start bridging it to `outbound`
    pub async fn spawn(
        &self,
        admission: Admission,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Arc<TerminalSession>, BrokerError> {
        let Admission {
            connection_id,
            params,
            validated,
            command,
            reservation,
            ..
        } = admission;

        let env = [("TERM".to_string(), self.config.term.clone())];
        let (process, reader) = match pty::spawn(&command, &env, params.initial_size()) {
            Ok(spawned) => spawned,
            Err(e) => {
                let e = BrokerError::from(e);
                log_rejection(&connection_id, SessionState::Spawning, &e);
                return Err(e);
            }
        };

        let entry = SessionEntry {
            session_id: SessionId::new(),
            connection_id,
            mode: validated.mode(),
            pid: process.pid(),
            started_at: current_time_millis(),
        };

        let context = SessionContext { entry, params };
        let connection_id = context.connection_id().clone();
        TerminalSession::activate(
            context,
            process,
            reader,
            Arc::clone(&self.policy),
            Arc::clone(&self.registry),
            reservation,
            self.config.kill_escalation_wait,
            outbound,
        )
        .await
        .map_err(|e| {
            let e = BrokerError::from(e);
            log_rejection(&connection_id, SessionState::Spawning, &e);
            e
        })
    }

    /// Admit and spawn in one step
    pub async fn subscribe(
        &self,
        connection_id: &ConnectionId,
        params: SubscribeParams,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Arc<TerminalSession>, BrokerError> {
        let admission = self.admit(connection_id, params).await?;
        self.spawn(admission, outbound).await
    }

    /// Tear down one session out-of-band
    pub async fn force_disconnect(&self, session_id: &SessionId) -> bool {
        self.registry.force_disconnect(session_id).await
    }

    /// Tear down every live session
    pub async fn force_disconnect_all(&self) -> usize {
        self.registry.force_disconnect_all().await
    }
}

fn log_rejection(connection_id: &ConnectionId, state: SessionState, error: &BrokerError) {
    tracing::warn!(
        "Subscription from {} rejected at {:?}: {}",
        connection_id,
        state,
        error
    );
}
