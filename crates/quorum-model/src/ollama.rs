// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire shape for the native Ollama chat API.
//!
//! `POST {endpoint}/api/chat` with `stream:false` and sampling knobs under
//! `options` (`num_ctx`, `num_predict` in Ollama's vocabulary).  No auth —
//! the endpoint is local.  The reply text is `message.content`.

use std::time::Duration;

use quorum_config::SlotConfig;
use serde_json::{json, Value};

use crate::client::{request_error, status_error, WireError};
use crate::CallError;

pub(crate) async fn call(
    http: &reqwest::Client,
    slot: &SlotConfig,
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<String, WireError> {
    let url = format!("{}/api/chat", slot.effective_endpoint());
    let body = json!({
        "model": slot.model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
        "stream": false,
        "options": {
            "temperature": slot.params.temperature,
            "top_p": slot.params.top_p,
            "num_ctx": slot.params.context_length,
            "num_predict": slot.params.max_tokens,
        },
    });

    let resp = http
        .post(&url)
        .timeout(timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| request_error(&slot.name, e))?;
    if !resp.status().is_success() {
        return Err(status_error(&slot.name, resp).await);
    }
    let v: Value = resp.json().await.map_err(|e| request_error(&slot.name, e))?;
    extract(&slot.name, &v).map_err(WireError::from)
}

fn extract(slot: &str, v: &Value) -> Result<String, CallError> {
    v["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CallError::Decode {
            slot: slot.into(),
            reason: "missing message.content".into(),
        })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_reads_message_content() {
        let v = json!({ "message": { "role": "assistant", "content": "local reply" } });
        assert_eq!(extract("dexter", &v).unwrap(), "local reply");
    }

    #[test]
    fn extract_missing_message_is_decode_error() {
        let v = json!({ "done": true });
        assert_eq!(extract("dexter", &v).unwrap_err().class(), "decode");
    }
}
