// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire shape for OpenAI-compatible chat completion endpoints.
//!
//! A large family of services speaks this format; both the
//! `openai-compatible` and `custom-openai-compatible` providers land here.
//! The request is a plain (non-streaming) `POST {endpoint}/chat/completions`
//! with a Bearer token; the reply text is `choices[0].message.content`.

use std::time::Duration;

use quorum_config::SlotConfig;
use serde_json::{json, Value};

use crate::client::{request_error, status_error, WireError};
use crate::CallError;

pub(crate) async fn call(
    http: &reqwest::Client,
    slot: &SlotConfig,
    api_key: Option<&str>,
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<String, WireError> {
    let url = format!("{}/chat/completions", slot.effective_endpoint());
    let body = json!({
        "model": slot.model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
        "temperature": slot.params.temperature,
        "top_p": slot.params.top_p,
        "max_tokens": slot.params.max_tokens,
        "frequency_penalty": slot.params.frequency_penalty,
        "presence_penalty": slot.params.presence_penalty,
    });

    let mut req = http.post(&url).timeout(timeout).json(&body);
    if let Some(key) = api_key {
        req = req.bearer_auth(key);
    }

    let resp = req.send().await.map_err(|e| request_error(&slot.name, e))?;
    if !resp.status().is_success() {
        return Err(status_error(&slot.name, resp).await);
    }
    let v: Value = resp.json().await.map_err(|e| request_error(&slot.name, e))?;
    extract(&slot.name, &v).map_err(WireError::from)
}

fn extract(slot: &str, v: &Value) -> Result<String, CallError> {
    v["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CallError::Decode {
            slot: slot.into(),
            reason: "missing choices[0].message.content".into(),
        })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
