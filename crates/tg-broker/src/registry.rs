//! Live session registry
//!
//! Tracks every active session with its metadata and a control handle for
//! out-of-band disconnects. Reads hand out copies; only the broker and the
//! sessions themselves mutate it.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tg_core::traits::SessionControl;
use tg_core::{ConnectionId, SessionEntry};
use tg_protocol::SessionId;

struct RegisteredSession {
    entry: SessionEntry,
    control: Arc<dyn SessionControl>,
}

/// Thread-safe table of live sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionId, RegisteredSession>,
    /// Admissions that passed the capacity check but are not registered yet
    pending: Arc<AtomicUsize>,
}

/// A held capacity slot
///
/// Released on drop, or consumed by [`SessionRegistry::register`].
#[derive(Debug)]
pub struct SlotReservation {
    pending: Arc<AtomicUsize>,
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve a slot if live plus in-flight sessions are below `max`
    ///
    /// `None` for `max` means unlimited.
    pub fn reserve(&self, max: Option<usize>) -> Option<SlotReservation> {
        loop {
            let pending = self.pending.load(Ordering::Acquire);
            if let Some(max) = max {
                if self.sessions.len() + pending >= max {
                    return None;
                }
            }

            if self
                .pending
                .compare_exchange(pending, pending + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(SlotReservation {
                    pending: Arc::clone(&self.pending),
                });
            }
        }
    }

    /// Register a session, consuming its reservation
    pub fn register(
        &self,
        control: Arc<dyn SessionControl>,
        reservation: SlotReservation,
    ) -> SessionEntry {
        let entry = control.entry();
        tracing::debug!(
            "Registering session {} for {} (pid {})",
            entry.session_id,
            entry.connection_id,
            entry.pid
        );

        self.sessions.insert(
            entry.session_id,
            RegisteredSession {
                entry: entry.clone(),
                control,
            },
        );
        // Insert before releasing so the slot is never double-counted as free
        drop(reservation);
        entry
    }

    /// Remove a session; returns its entry if it was present
    pub fn deregister(&self, session_id: &SessionId) -> Option<SessionEntry> {
        let removed = self.sessions.remove(session_id).map(|(_, s)| s.entry);
        if removed.is_some() {
            tracing::debug!("Deregistered session {}", session_id);
        }
        removed
    }

    /// Copy of a session's metadata
    pub fn find(&self, session_id: &SessionId) -> Option<SessionEntry> {
        self.sessions.get(session_id).map(|s| s.entry.clone())
    }

    /// Copies of every live session
    pub fn list_all(&self) -> HashMap<SessionId, SessionEntry> {
        self.sessions
            .iter()
            .map(|s| (*s.key(), s.entry.clone()))
            .collect()
    }

    /// Sessions owned by a connection identity
    pub fn list_by_identity(&self, connection_id: &ConnectionId) -> Vec<SessionEntry> {
        self.sessions
            .iter()
            .filter(|s| &s.entry.connection_id == connection_id)
            .map(|s| s.entry.clone())
            .collect()
    }

    /// Number of sessions owned by a connection identity
    pub fn count_by_identity(&self, connection_id: &ConnectionId) -> usize {
        self.sessions
            .iter()
            .filter(|s| &s.entry.connection_id == connection_id)
            .count()
    }

    /// Number of live sessions
    pub fn total_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of admissions holding a slot but not yet registered
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Tear down a session out-of-band
    ///
    /// Returns `false` for an unknown id.
    pub async fn force_disconnect(&self, session_id: &SessionId) -> bool {
        // Clone the handle out so no shard lock is held across the await
        let control = match self.sessions.get(session_id) {
            Some(s) => Arc::clone(&s.control),
            None => return false,
        };

        tracing::info!("Force-disconnecting session {}", session_id);
        control.shutdown().await;
        self.sessions.remove(session_id);
        true
    }

    /// Tear down every live session; returns how many were disconnected
    pub async fn force_disconnect_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| *s.key()).collect();

        let mut count = 0;
        for id in ids {
            if self.force_disconnect(&id).await {
                count += 1;
            }
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
