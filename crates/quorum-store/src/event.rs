// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol phase an event belongs to.  `Meta` covers orchestrator events
/// in the reserved `session` log and out-of-band inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Proposal,
    Refinement,
    Vote,
    Meta,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Proposal => write!(f, "proposal"),
            Phase::Refinement => write!(f, "refinement"),
            Phase::Vote => write!(f, "vote"),
            Phase::Meta => write!(f, "meta"),
        }
    }
}

/// One immutable record in a slot's collaboration log.
///
/// `ts` is unix seconds and nondecreasing within any one slot's log (the
/// store clamps it on append).  `event` is a short tag such as
/// `proposal.ok`, `refine.error`, `vote.ok`, `chat.ok`, `log.truncated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEvent {
    pub ts: i64,
    pub slot: String,
    pub session: String,
    pub phase: Phase,
    pub event: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl SlotEvent {
    pub fn new(
        slot: impl Into<String>,
        session: impl Into<String>,
        phase: Phase,
        event: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp(),
            slot: slot.into(),
            session: session.into(),
            phase,
            event: event.into(),
            text: text.into(),
            meta: HashMap::new(),
        }
    }

    /// Attach one meta entry (builder style).
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
