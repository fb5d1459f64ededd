// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Per-call execution context: deadline and cancellation.
///
/// The deadline covers the whole call including retries; the engine passes
/// the stricter of the call deadline and the remaining phase budget.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub deadline: Duration,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(deadline: Duration, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            cancel: CancellationToken::new(),
        }
    }
}

/// Successful completion: the model's text plus call metadata.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub meta: CallMeta,
}

/// Metadata recorded alongside every completion (and mirrored into the
/// event log's `meta` map by the slot runtime).
#[derive(Debug, Clone, Default)]
pub struct CallMeta {
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
    pub retry_count: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
