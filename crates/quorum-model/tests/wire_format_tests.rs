// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-format tests: spin up a minimal HTTP/1.1 mock server, point a slot
//! at it, issue a chat call, and assert both the HTTP request the client
//! sent and the completion (or error) it produced.
//!
//! These tests run without any API keys and without external network access.
//! They exercise the full client pipeline: serialisation → HTTP → decoding,
//! plus the retry loop.

use std::collections::HashMap;
use std::time::Duration;

use quorum_config::{Provider, SlotConfig};
use quorum_model::{CallContext, ChatClient, HttpChatClient};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// ── Minimal HTTP/1.1 mock server ──────────────────────────────────────────────

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Value,
}

/// Bind a mock server on a random loopback port that serves the given
/// `(status, body)` responses in order, one per connection, capturing each
/// request.  Returns the port and a receiver yielding captured requests.
async fn mock_server_seq(
    responses: Vec<(u16, String)>,
) -> (u16, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel::<CapturedRequest>();

    tokio::spawn(async move {
        for (status, resp_body) in responses {
            let (stream, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => return,
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            // Request line
            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.unwrap();
            let request_line = request_line.trim().to_string();
            let mut parts = request_line.splitn(3, ' ');
            let method = parts.next().unwrap_or("").to_string();
            let path = parts.next().unwrap_or("").to_string();

            // Headers
            let mut headers: HashMap<String, String> = HashMap::new();
            let mut content_length: usize = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    break;
                }
                if let Some((k, v)) = trimmed.split_once(": ") {
                    let key = k.to_lowercase();
                    if key == "content-length" {
                        content_length = v.parse().unwrap_or(0);
                    }
                    headers.insert(key, v.to_string());
                }
            }

            // Body
            let mut body_bytes = vec![0u8; content_length];
            reader.read_exact(&mut body_bytes).await.unwrap();
            let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

            let _ = tx.send(CapturedRequest {
                method,
                path,
                headers,
                body,
            });

            let response = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{resp_body}",
                resp_body.len(),
            );
            write_half.write_all(response.as_bytes()).await.unwrap();
            write_half.shutdown().await.ok();
        }
    });

    (port, rx)
}

async fn mock_server_once(
    status: u16,
    body: &str,
) -> (u16, mpsc::UnboundedReceiver<CapturedRequest>) {
    mock_server_seq(vec![(status, body.to_string())]).await
}

fn slot_for_port(name: &str, provider: Provider, port: u16) -> SlotConfig {
    SlotConfig {
        name: name.into(),
        provider,
        endpoint: Some(format!("http://127.0.0.1:{port}")),
        model: "test-model".into(),
        ..SlotConfig::default()
    }
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_compat_request_and_extraction() {
    let reply = r#"{"choices":[{"message":{"role":"assistant","content":"the answer"}}]}"#;
    let (port, mut rx) = mock_server_once(200, reply).await;

    std::env::set_var("QUORUM_WIRE_TEST_OPENAI_KEY", "sk-wire-test");
    let mut slot = slot_for_port("dexter", Provider::OpenaiCompatible, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_OPENAI_KEY".into());
    slot.params.temperature = 0.3;
    slot.params.max_tokens = 512;

    let client = HttpChatClient::with_max_retries(0);
    let out = client
        .chat(&slot, "system prompt", "user prompt", &CallContext::default())
        .await
        .unwrap();
    assert_eq!(out.text, "the answer");
    assert_eq!(out.meta.provider, "openai-compatible");
    assert_eq!(out.meta.retry_count, 0);

    let req = rx.recv().await.unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/chat/completions");
    assert_eq!(
        req.headers.get("authorization").map(String::as_str),
        Some("Bearer sk-wire-test")
    );
    assert_eq!(req.body["model"], "test-model");
    assert_eq!(req.body["messages"][0]["role"], "system");
    assert_eq!(req.body["messages"][0]["content"], "system prompt");
    assert_eq!(req.body["messages"][1]["role"], "user");
    assert_eq!(req.body["messages"][1]["content"], "user prompt");
    assert!((req.body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    assert_eq!(req.body["max_tokens"], 512);
    assert!(req.body.get("frequency_penalty").is_some());
    assert!(req.body.get("presence_penalty").is_some());
}

#[tokio::test]
async fn custom_openai_compatible_uses_same_wire_shape() {
    let reply = r#"{"choices":[{"message":{"content":"ok"}}]}"#;
    let (port, mut rx) = mock_server_once(200, reply).await;

    std::env::set_var("QUORUM_WIRE_TEST_CUSTOM_KEY", "sk-custom");
    let mut slot = slot_for_port("engineer", Provider::CustomOpenaiCompatible, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_CUSTOM_KEY".into());

    let out = HttpChatClient::with_max_retries(0)
        .chat(&slot, "s", "u", &CallContext::default())
        .await
        .unwrap();
    assert_eq!(out.text, "ok");
    assert_eq!(rx.recv().await.unwrap().path, "/chat/completions");
}

// ── Anthropic ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_request_and_extraction() {
    let reply = r#"{"content":[{"type":"text","text":"claude says"}]}"#;
    let (port, mut rx) = mock_server_once(200, reply).await;

    std::env::set_var("QUORUM_WIRE_TEST_ANTHROPIC_KEY", "sk-ant-wire");
    let mut slot = slot_for_port("analyst", Provider::Anthropic, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_ANTHROPIC_KEY".into());

    let out = HttpChatClient::with_max_retries(0)
        .chat(&slot, "sys", "usr", &CallContext::default())
        .await
        .unwrap();
    assert_eq!(out.text, "claude says");

    let req = rx.recv().await.unwrap();
    assert_eq!(req.path, "/messages");
    assert_eq!(
        req.headers.get("x-api-key").map(String::as_str),
        Some("sk-ant-wire")
    );
    assert_eq!(
        req.headers.get("anthropic-version").map(String::as_str),
        Some("2023-06-01")
    );
    // System prompt is a top-level field, not a message.
    assert_eq!(req.body["system"], "sys");
    assert_eq!(req.body["messages"][0]["role"], "user");
    assert_eq!(req.body["messages"][0]["content"], "usr");
    assert!(req.body.get("max_tokens").is_some());
}

// ── Ollama ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ollama_request_and_extraction() {
    let reply = r#"{"message":{"role":"assistant","content":"local"},"done":true}"#;
    let (port, mut rx) = mock_server_once(200, reply).await;

    let mut slot = slot_for_port("dexter", Provider::Ollama, port);
    slot.params.context_length = 2048;
    slot.params.max_tokens = 256;

    let out = HttpChatClient::with_max_retries(0)
        .chat(&slot, "sys", "usr", &CallContext::default())
        .await
        .unwrap();
    assert_eq!(out.text, "local");

    let req = rx.recv().await.unwrap();
    assert_eq!(req.path, "/api/chat");
    assert!(
        !req.headers.contains_key("authorization"),
        "ollama must not send auth"
    );
    assert_eq!(req.body["stream"], false);
    assert_eq!(req.body["options"]["num_ctx"], 2048);
    assert_eq!(req.body["options"]["num_predict"], 256);
}

#[tokio::test]
async fn local_model_defaults_endpoint_without_key() {
    // A local_model slot with no endpoint and no api_key_env must attempt
    // the default local endpoint rather than failing config resolution.
    // Nothing listens there in CI, so the call fails with transport — the
    // point is that it is NOT a config error.
    let slot = SlotConfig {
        name: "dexter".into(),
        provider: Provider::Ollama,
        local_model: true,
        endpoint: Some("http://127.0.0.1:1".into()), // closed port
        ..SlotConfig::default()
    };
    let err = HttpChatClient::with_max_retries(0)
        .chat(&slot, "s", "u", &CallContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.class(), "transport");
}

// ── Error mapping and retry ───────────────────────────────────────────────────

#[tokio::test]
async fn http_500_then_success_is_retried() {
    let good = r#"{"choices":[{"message":{"content":"recovered"}}]}"#;
    let (port, mut rx) = mock_server_seq(vec![
        (500, r#"{"error":"boom"}"#.to_string()),
        (200, good.to_string()),
    ])
    .await;

    std::env::set_var("QUORUM_WIRE_TEST_RETRY_KEY", "sk-retry");
    let mut slot = slot_for_port("dexter", Provider::OpenaiCompatible, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_RETRY_KEY".into());

    let out = HttpChatClient::new()
        .chat(&slot, "s", "u", &CallContext::default())
        .await
        .unwrap();
    assert_eq!(out.text, "recovered");
    assert_eq!(out.meta.retry_count, 1);

    // Both requests reached the server.
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
}

#[tokio::test]
async fn http_404_is_not_retried() {
    let (port, mut rx) = mock_server_seq(vec![
        (404, r#"{"error":"nope"}"#.to_string()),
        (200, r#"{"choices":[{"message":{"content":"never"}}]}"#.to_string()),
    ])
    .await;

    std::env::set_var("QUORUM_WIRE_TEST_404_KEY", "sk-404");
    let mut slot = slot_for_port("dexter", Provider::OpenaiCompatible, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_404_KEY".into());

    let err = HttpChatClient::new()
        .chat(&slot, "s", "u", &CallContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.class(), "provider_4xx");

    // Exactly one request reached the server.
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (port, _rx) = mock_server_once(200, r#"{"unexpected":"shape"}"#).await;

    std::env::set_var("QUORUM_WIRE_TEST_DECODE_KEY", "sk-decode");
    let mut slot = slot_for_port("dexter", Provider::OpenaiCompatible, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_DECODE_KEY".into());

    let err = HttpChatClient::with_max_retries(0)
        .chat(&slot, "s", "u", &CallContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.class(), "decode");
}

#[tokio::test]
async fn missing_env_var_fails_before_any_request() {
    let (port, mut rx) = mock_server_once(200, "{}").await;
    let mut slot = slot_for_port("analyst", Provider::OpenaiCompatible, port);
    slot.api_key_env = Some("QUORUM_WIRE_TEST_DEFINITELY_UNSET".into());

    let err = HttpChatClient::new()
        .chat(&slot, "s", "u", &CallContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.class(), "config");
    assert!(rx.try_recv().is_err(), "no request may be sent");
}

#[tokio::test]
async fn cancellation_aborts_promptly() {
    // Point at a server that never responds within the test budget by
    // using a listener that accepts but stays silent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _keep = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let slot = slot_for_port("dexter", Provider::Ollama, port);
    let ctx = CallContext::default();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let start = std::time::Instant::now();
    let err = HttpChatClient::new()
        .chat(&slot, "s", "u", &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.class(), "canceled");
    assert!(start.elapsed() < Duration::from_secs(2));
}
