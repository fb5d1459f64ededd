// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Session-level failures surfaced to the public surface.  Per-slot LLM
/// failures are not errors at this level; the engine recovers locally and
/// the slot abstains.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Startup or per-session invariant violated by configuration
    /// (missing/disabled dexter, unknown slot).
    #[error("config error: {0}")]
    Config(String),

    /// The live-session cap is reached.
    #[error("busy: {0} live sessions")]
    Busy(usize),

    /// The overall session deadline elapsed.  `partial` carries whatever
    /// final answer had accumulated by then.
    #[error("session deadline exceeded")]
    Deadline { partial: Option<String> },

    /// The session was cancelled by the user.
    #[error("session canceled")]
    Canceled,

    /// Invariant violation inside the engine; the session fails, other
    /// sessions are unaffected.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] quorum_store::StoreError),
}

impl EngineError {
    /// Error class tag used in event meta and HTTP error bodies.
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::Busy(_) => "busy",
            EngineError::Deadline { .. } => "timeout",
            EngineError::Canceled => "canceled",
            EngineError::Internal(_) | EngineError::Store(_) => "internal",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
