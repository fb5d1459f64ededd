// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::EngineError;

/// Session lifecycle phase, forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Created,
    Proposal,
    Refinement,
    Vote,
    Done,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Created => write!(f, "created"),
            SessionPhase::Proposal => write!(f, "proposal"),
            SessionPhase::Refinement => write!(f, "refinement"),
            SessionPhase::Vote => write!(f, "vote"),
            SessionPhase::Done => write!(f, "done"),
            SessionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Live state of one user request while its session runs.
///
/// Created by the engine, registered for cancellation and status queries,
/// and garbage-collected once terminal.
pub struct SessionHandle {
    pub id: String,
    pub campaign: Option<String>,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    phase: Mutex<SessionPhase>,
    proposals: Mutex<HashMap<String, String>>,
    refined: Mutex<HashMap<String, String>>,
    tally: Mutex<HashMap<String, f64>>,
    final_answer: Mutex<Option<String>>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, campaign: Option<String>) -> Self {
        Self {
            id: id.into(),
            campaign,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            phase: Mutex::new(SessionPhase::Created),
            proposals: Mutex::new(HashMap::new()),
            refined: Mutex::new(HashMap::new()),
            tally: Mutex::new(HashMap::new()),
            final_answer: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap()
    }

    /// Move the session forward.  Phases never go backwards; a violation is
    /// an internal error that fails this session only.
    pub fn advance(&self, next: SessionPhase) -> Result<(), EngineError> {
        let mut phase = self.phase.lock().unwrap();
        if next < *phase {
            return Err(EngineError::Internal(format!(
                "phase went backwards: {} -> {next}",
                *phase
            )));
        }
        *phase = next;
        Ok(())
    }

    pub fn set_proposal(&self, slot: &str, text: String) {
        self.proposals.lock().unwrap().insert(slot.into(), text);
    }

    pub fn proposals(&self) -> HashMap<String, String> {
        self.proposals.lock().unwrap().clone()
    }

    pub fn set_refined(&self, slot: &str, text: String) {
        self.refined.lock().unwrap().insert(slot.into(), text);
    }

    pub fn refined(&self) -> HashMap<String, String> {
        self.refined.lock().unwrap().clone()
    }

    pub fn set_tally(&self, totals: HashMap<String, f64>) {
        *self.tally.lock().unwrap() = totals;
    }

    pub fn tally(&self) -> HashMap<String, f64> {
        self.tally.lock().unwrap().clone()
    }

    pub fn set_final_answer(&self, answer: String) {
        *self.final_answer.lock().unwrap() = Some(answer);
    }

    pub fn final_answer(&self) -> Option<String> {
        self.final_answer.lock().unwrap().clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
