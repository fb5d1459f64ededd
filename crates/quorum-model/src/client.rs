// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider dispatch and the retry loop shared by every wire format.
//!
//! One trait, one operation: a single-shot chat call that returns the
//! assistant text plus call metadata.  The HTTP implementation dispatches on
//! [`Provider`], retries transient failures with exponential backoff, and
//! honours the per-call deadline and cancellation token in [`CallContext`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use quorum_config::{Provider, SlotConfig};
use rand::Rng;
use tracing::debug;

use crate::{anthropic, ollama, openai_compat, CallContext, CallError, CallMeta, Completion};

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;
/// Backoff base: 500 ms · 2^k for retry k.
const BACKOFF_BASE_MS: u64 = 500;
/// Uniform jitter added to every backoff, in [0, 250) ms.
const JITTER_MS: u64 = 250;

/// Single-shot chat call against one slot's endpoint.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        slot: &SlotConfig,
        system: &str,
        user: &str,
        ctx: &CallContext,
    ) -> Result<Completion, CallError>;
}

/// A wire-level failure plus an optional server-requested retry delay
/// (from a 429 `Retry-After` header).
pub(crate) struct WireError {
    pub error: CallError,
    pub retry_after: Option<Duration>,
}

impl From<CallError> for WireError {
    fn from(error: CallError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Map a reqwest send/read failure onto the error taxonomy.
pub(crate) fn request_error(slot: &str, e: reqwest::Error) -> WireError {
    if e.is_timeout() {
        CallError::Timeout { slot: slot.into() }.into()
    } else if e.is_decode() {
        CallError::Decode {
            slot: slot.into(),
            reason: e.to_string(),
        }
        .into()
    } else {
        CallError::Transport {
            slot: slot.into(),
            reason: e.to_string(),
        }
        .into()
    }
}

/// Map a non-2xx response onto the error taxonomy, consuming the body for
/// the reason text and capturing `Retry-After` on 429.
pub(crate) async fn status_error(slot: &str, resp: reqwest::Response) -> WireError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    let reason = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect::<String>();
    let error = if status >= 500 {
        CallError::Provider5xx {
            slot: slot.into(),
            status,
            reason,
        }
    } else {
        CallError::Provider4xx {
            slot: slot.into(),
            status,
            reason,
        }
    };
    WireError { error, retry_after }
}

/// HTTP chat client speaking the OpenAI-compatible, Anthropic, and Ollama
/// wire formats.
pub struct HttpChatClient {
    http: reqwest::Client,
    max_retries: u32,
}

impl Default for HttpChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpChatClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            max_retries: MAX_RETRIES,
        }
    }

    /// Override the retry budget (tests use 0 for deterministic one-shot calls).
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            max_retries,
        }
    }

    /// Resolve the API key for a slot, or decide none is needed.
    ///
    /// Local slots and Ollama endpoints authenticate with nothing; every
    /// other provider requires `api_key_env` to name a set environment
    /// variable.  The key value never leaves this function except inside the
    /// request header.
    fn resolve_api_key(slot: &SlotConfig) -> Result<Option<String>, CallError> {
        if slot.local_model || slot.provider == Provider::Ollama {
            return Ok(None);
        }
        match &slot.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => Ok(Some(key)),
                _ => Err(CallError::Config {
                    slot: slot.name.clone(),
                    reason: format!("environment variable {var} is not set"),
                }),
            },
            None => Err(CallError::Config {
                slot: slot.name.clone(),
                reason: "api_key_env is not configured".into(),
            }),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn chat(
        &self,
        slot: &SlotConfig,
        system: &str,
        user: &str,
        ctx: &CallContext,
    ) -> Result<Completion, CallError> {
        let endpoint = slot.effective_endpoint();
        if endpoint.is_empty() {
            return Err(CallError::Config {
                slot: slot.name.clone(),
                reason: "endpoint is not configured".into(),
            });
        }
        let api_key = Self::resolve_api_key(slot)?;

        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(CallError::Canceled {
                    slot: slot.name.clone(),
                });
            }
            let remaining = match ctx.deadline.checked_sub(start.elapsed()) {
                Some(d) if !d.is_zero() => d,
                _ => {
                    return Err(CallError::Timeout {
                        slot: slot.name.clone(),
                    })
                }
            };

            let call = async {
                match slot.provider {
                    Provider::OpenaiCompatible | Provider::CustomOpenaiCompatible => {
                        openai_compat::call(
                            &self.http,
                            slot,
                            api_key.as_deref(),
                            system,
                            user,
                            remaining,
                        )
                        .await
                    }
                    Provider::Anthropic => {
                        anthropic::call(
                            &self.http,
                            slot,
                            api_key.as_deref(),
                            system,
                            user,
                            remaining,
                        )
                        .await
                    }
                    Provider::Ollama => {
                        ollama::call(&self.http, slot, system, user, remaining).await
                    }
                }
            };
            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(CallError::Canceled { slot: slot.name.clone() });
                }
                r = call => r,
            };

            match result {
                Ok(text) => {
                    return Ok(Completion {
                        text,
                        meta: CallMeta {
                            provider: slot.provider.to_string(),
                            model: slot.model.clone(),
                            duration_ms: start.elapsed().as_millis() as u64,
                            retry_count: attempt,
                        },
                    });
                }
                Err(wire) => {
                    if attempt >= self.max_retries || !wire.error.is_transient() {
                        return Err(wire.error);
                    }
                    let delay = backoff_delay(attempt, wire.retry_after);
                    // Never sleep past the deadline; surface the underlying
                    // failure instead of burning the rest of the budget.
                    if start.elapsed() + delay >= ctx.deadline {
                        return Err(wire.error);
                    }
                    debug!(
                        slot = %slot.name,
                        attempt,
                        class = wire.error.class(),
                        delay_ms = delay.as_millis() as u64,
                        "transient call failure, backing off"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            return Err(CallError::Canceled { slot: slot.name.clone() });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Deterministic portion of the backoff schedule: 500 ms · 2^k.
fn backoff_base(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS << attempt.min(16))
}

/// Full backoff for retry `attempt`: base + jitter, floored at any
/// server-requested `Retry-After`.
fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MS));
    let delay = backoff_base(attempt) + jitter;
    match retry_after {
        Some(ra) => delay.max(ra),
        None => delay,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
