//! Active terminal sessions
//!
//! A [`TerminalSession`] owns one PTY process after admission. It forwards
//! client input, runs the output read loop on its own thread and performs
//! teardown exactly once, whoever asks for it first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tg_core::traits::{SessionControl, SessionState};
use tg_core::{SessionEntry, SpawnError};
use tg_protocol::{ClientMessage, ServerMessage, SessionId, TerminalSize};
use tokio::sync::{mpsc, watch};

use crate::policy::{SessionContext, TerminalPolicy};
use crate::pty::{self, ProcessExit, PtyProcess, PtyReader};
use crate::registry::{SessionRegistry, SlotReservation};

/// Upper bound on waiting for the read loop during teardown
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A live PTY-backed session
pub struct TerminalSession {
    context: SessionContext,
    process: Arc<PtyProcess>,
    policy: Arc<dyn TerminalPolicy>,
    registry: Arc<SessionRegistry>,
    kill_escalation_wait: Duration,
    state: watch::Sender<SessionState>,
    reader_done: watch::Receiver<bool>,
}

/// Sets the reader-done flag however the read loop ends
struct ReaderDone(watch::Sender<bool>);

impl Drop for ReaderDone {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl TerminalSession {
    /// Register a freshly spawned process and start bridging its output
    ///
    /// Registers the session, fires the start hook, then starts the read
    /// loop. Output is sent to `outbound`, ending with an exit message.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn activate(
        context: SessionContext,
        process: PtyProcess,
        reader: PtyReader,
        policy: Arc<dyn TerminalPolicy>,
        registry: Arc<SessionRegistry>,
        reservation: SlotReservation,
        kill_escalation_wait: Duration,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Arc<Self>, SpawnError> {
        let (done_tx, done_rx) = watch::channel(false);
        let (state, _) = watch::channel(SessionState::Active);

        let session = Arc::new(Self {
            context,
            process: Arc::new(process),
            policy,
            registry,
            kill_escalation_wait,
            state,
            reader_done: done_rx,
        });

        session
            .registry
            .register(Arc::clone(&session) as Arc<dyn SessionControl>, reservation);
        session.policy.on_session_start(&session.context);

        let spawned = std::thread::Builder::new()
            .name(format!("tg-read-{}", session.pid()))
            .spawn({
                let done = ReaderDone(done_tx);
                let process = Arc::clone(&session.process);
                let policy = Arc::clone(&session.policy);
                let context = session.context.clone();
                move || {
                    let _done = done;
                    pty::run_read_loop(&process, reader, |message| {
                        if let ServerMessage::Output { data } = &message {
                            policy.on_output(&context, data);
                        }
                        // The client may already be gone; keep draining until stopped
                        let _ = outbound.send(message);
                    });
                }
            });

        if let Err(e) = spawned {
            tracing::error!("Failed to start reader for session {}: {}", session.id(), e);
            session.close().await;
            return Err(SpawnError::Exec {
                program: "reader thread".to_string(),
                message: e.to_string(),
            });
        }

        // Natural process exit ends the read loop; tear down from here
        let watcher = Arc::clone(&session);
        tokio::spawn(async move {
            let mut done = watcher.reader_done.clone();
            let _ = done.wait_for(|finished| *finished).await;
            if watcher.state() == SessionState::Active {
                tracing::info!("Session {} process ended", watcher.id());
                watcher.close().await;
            }
        });

        tracing::info!(
            "Session {} active for {} ({}, pid {})",
            session.id(),
            session.context.connection_id(),
            session.context.entry.mode,
            session.pid()
        );
        Ok(session)
    }

    /// Session ID
    pub fn id(&self) -> SessionId {
        self.context.session_id()
    }

    /// Registry entry for this session
    pub fn entry(&self) -> &SessionEntry {
        &self.context.entry
    }

    /// Context handed to policy hooks
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Process ID
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Current terminal size
    pub fn size(&self) -> TerminalSize {
        self.process.size()
    }

    /// Lifecycle state (`Active`, `Closing` or `Closed`)
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether teardown has finished
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Process exit status, once reaped
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.process.exit_status()
    }

    /// Handle a message from the client
    ///
    /// Ignored unless the session is active. A failed write closes the
    /// session.
    pub async fn receive(&self, message: ClientMessage) {
        if self.state() != SessionState::Active {
            return;
        }

        match message {
            ClientMessage::Input { data } => {
                self.policy.on_input(&self.context, &data);
                if let Err(e) = self.process.write(data.as_bytes()) {
                    tracing::warn!("Write to session {} failed: {}", self.id(), e);
                    self.close().await;
                }
            }
            ClientMessage::Resize { cols, rows } => {
                self.process.resize(TerminalSize::new(rows, cols));
            }
        }
    }

    /// Tear the session down
    ///
    /// The first caller performs teardown; later or concurrent callers wait
    /// for it to finish.
    pub async fn close(&self) {
        let began = self.state.send_if_modified(|state| {
            if *state == SessionState::Active {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if !began {
            self.wait_closed().await;
            return;
        }

        let id = self.id();
        tracing::info!("Closing session {}", id);
        self.policy.on_session_end(&self.context);

        self.process.begin_stop();
        if !self.wait_reader(READER_JOIN_TIMEOUT).await {
            tracing::warn!(
                "Reader for session {} did not stop within {:?}",
                id,
                READER_JOIN_TIMEOUT
            );
        }

        self.registry.deregister(&id);
        self.process.close_io();

        let outcome = self.process.terminate(self.kill_escalation_wait).await;
        tracing::debug!("Session {} process {}: {:?}", id, self.pid(), outcome);

        self.state.send_replace(SessionState::Closed);
        tracing::info!("Session {} closed", id);
    }

    async fn wait_reader(&self, timeout: Duration) -> bool {
        let mut done = self.reader_done.clone();
        // A dropped sender means the reader never started or already ended
        let finished = tokio::time::timeout(timeout, done.wait_for(|finished| *finished))
            .await
            .is_ok();
        finished
    }

    async fn wait_closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

#[async_trait]
impl SessionControl for TerminalSession {
    fn entry(&self) -> SessionEntry {
        self.context.entry.clone()
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}
