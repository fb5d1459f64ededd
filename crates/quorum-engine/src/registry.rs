// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{EngineError, SessionHandle};

/// Maps session id → live handle, enforcing the concurrent-session cap.
///
/// Event-bus subscribers attach to the bus, not to handles, so a terminal
/// session pins nothing and is collected as soon as its run finishes.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Register a new session.  Refused with `busy` once the cap of live
    /// (non-terminal) sessions is reached.
    pub fn create(&self, handle: Arc<SessionHandle>) -> Result<(), EngineError> {
        let live = self.list(true).len();
        if live >= self.max_sessions {
            return Err(EngineError::Busy(live));
        }
        debug!(session = %handle.id, "session registered");
        self.sessions.insert(handle.id.clone(), handle);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|h| h.clone())
    }

    /// Signal cancellation into a session.  Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live session (teardown path).
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }

    pub fn list(&self, active_only: bool) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .filter(|e| !active_only || !e.value().phase().is_terminal())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Drop terminal sessions from the map.
    pub fn gc(&self) {
        self.sessions.retain(|_, h| !h.phase().is_terminal());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
