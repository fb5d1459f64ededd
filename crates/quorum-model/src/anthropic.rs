// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire shape for the Anthropic Messages API.
//!
//! `POST {endpoint}/messages` with `x-api-key` auth and a pinned
//! `anthropic-version`.  The system prompt is a top-level field, not a
//! message; the reply text is `content[0].text`.

use std::time::Duration;

use quorum_config::SlotConfig;
use serde_json::{json, Value};

use crate::client::{request_error, status_error, WireError};
use crate::CallError;

/// Pinned API version sent on every request.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) async fn call(
    http: &reqwest::Client,
    slot: &SlotConfig,
    api_key: Option<&str>,
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<String, WireError> {
    let url = format!("{}/messages", slot.effective_endpoint());
    let body = json!({
        "model": slot.model,
        "system": system,
        "messages": [ { "role": "user", "content": user } ],
        "max_tokens": slot.params.max_tokens,
        "temperature": slot.params.temperature,
        "top_p": slot.params.top_p,
    });

    let mut req = http
        .post(&url)
        .timeout(timeout)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body);
    if let Some(key) = api_key {
        req = req.header("x-api-key", key);
    }

    let resp = req.send().await.map_err(|e| request_error(&slot.name, e))?;
    if !resp.status().is_success() {
        return Err(status_error(&slot.name, resp).await);
    }
    let v: Value = resp.json().await.map_err(|e| request_error(&slot.name, e))?;
    extract(&slot.name, &v).map_err(WireError::from)
}

fn extract(slot: &str, v: &Value) -> Result<String, CallError> {
    v["content"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CallError::Decode {
            slot: slot.into(),
            reason: "missing content[0].text".into(),
        })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_reads_first_content_block() {
        let v = json!({ "content": [ { "type": "text", "text": "hi there" } ] });
        assert_eq!(extract("dexter", &v).unwrap(), "hi there");
    }

    #[test]
    fn extract_missing_content_is_decode_error() {
        let v = json!({ "type": "error" });
        assert_eq!(extract("dexter", &v).unwrap_err().class(), "decode");
    }

    #[test]
    fn pinned_version_does_not_drift() {
        assert_eq!(ANTHROPIC_VERSION, "2023-06-01");
    }
}
