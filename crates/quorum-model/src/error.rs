// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Typed failure of one LLM call.  Every variant carries the slot name so a
/// failure can be attributed in a multi-slot session without extra context.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Missing env var, empty endpoint, or another misconfiguration local to
    /// this slot.  Never retried; other slots proceed.
    #[error("config error for slot {slot}: {reason}")]
    Config { slot: String, reason: String },

    /// Network-level failure (connect, DNS, broken stream).  Transient.
    #[error("transport error for slot {slot}: {reason}")]
    Transport { slot: String, reason: String },

    /// HTTP 4xx from the provider.  Non-retryable except 429.
    #[error("provider returned {status} for slot {slot}: {reason}")]
    Provider4xx {
        slot: String,
        status: u16,
        reason: String,
    },

    /// HTTP 5xx from the provider.  Transient.
    #[error("provider returned {status} for slot {slot}: {reason}")]
    Provider5xx {
        slot: String,
        status: u16,
        reason: String,
    },

    /// The per-call deadline elapsed (including time spent in retries).
    #[error("call for slot {slot} timed out")]
    Timeout { slot: String },

    /// The call was cancelled via the context token.
    #[error("call for slot {slot} was canceled")]
    Canceled { slot: String },

    /// The provider answered 2xx but the body did not match the wire shape.
    #[error("undecodable response for slot {slot}: {reason}")]
    Decode { slot: String, reason: String },
}

impl CallError {
    /// Short class tag recorded in event meta and surfaced over HTTP.
    pub fn class(&self) -> &'static str {
        match self {
            CallError::Config { .. } => "config",
            CallError::Transport { .. } => "transport",
            CallError::Provider4xx { .. } => "provider_4xx",
            CallError::Provider5xx { .. } => "provider_5xx",
            CallError::Timeout { .. } => "timeout",
            CallError::Canceled { .. } => "canceled",
            CallError::Decode { .. } => "decode",
        }
    }

    /// Whether the retry loop may try again.  429 is the only retryable 4xx.
    /// A timed-out attempt is transient too; the overall call deadline is
    /// enforced by the retry loop, not by this classification.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Transport { .. }
            | CallError::Provider5xx { .. }
            | CallError::Timeout { .. } => true,
            CallError::Provider4xx { status, .. } => *status == 429,
            _ => false,
        }
    }

    pub fn slot(&self) -> &str {
        match self {
            CallError::Config { slot, .. }
            | CallError::Transport { slot, .. }
            | CallError::Provider4xx { slot, .. }
            | CallError::Provider5xx { slot, .. }
            | CallError::Timeout { slot }
            | CallError::Canceled { slot }
            | CallError::Decode { slot, .. } => slot,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn err_4xx(status: u16) -> CallError {
        CallError::Provider4xx {
            slot: "dexter".into(),
            status,
            reason: String::new(),
        }
    }

    #[test]
    fn class_tags_match_taxonomy() {
        assert_eq!(
            CallError::Config {
                slot: "a".into(),
                reason: String::new()
            }
            .class(),
            "config"
        );
        assert_eq!(CallError::Timeout { slot: "a".into() }.class(), "timeout");
        assert_eq!(CallError::Canceled { slot: "a".into() }.class(), "canceled");
        assert_eq!(err_4xx(404).class(), "provider_4xx");
    }

    #[test]
    fn only_429_is_a_transient_4xx() {
        assert!(err_4xx(429).is_transient());
        assert!(!err_4xx(400).is_transient());
        assert!(!err_4xx(401).is_transient());
        assert!(!err_4xx(404).is_transient());
    }

    #[test]
    fn transport_and_5xx_are_transient() {
        assert!(CallError::Transport {
            slot: "a".into(),
            reason: String::new()
        }
        .is_transient());
        assert!(CallError::Provider5xx {
            slot: "a".into(),
            status: 503,
            reason: String::new()
        }
        .is_transient());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(CallError::Timeout { slot: "a".into() }.is_transient());
    }

    #[test]
    fn terminal_classes_are_not_transient() {
        assert!(!CallError::Canceled { slot: "a".into() }.is_transient());
        assert!(!CallError::Decode {
            slot: "a".into(),
            reason: String::new()
        }
        .is_transient());
    }

    #[test]
    fn error_carries_slot_name() {
        assert_eq!(err_4xx(400).slot(), "dexter");
    }
}
