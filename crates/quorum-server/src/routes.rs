// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use quorum_config::{Config, SlotConfig};
use quorum_engine::ExecutedSkill;
use quorum_sandbox::Limits;
use quorum_store::SlotEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ApiError, AppState};

// ── /chat ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<ExecutedSkill>,
    pub collaboration_session: String,
}

/// Run a full collaboration session and block until it is terminal.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    // Fix the session id here so failure bodies can point at the event log.
    let session_id = req
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    match state
        .engine
        .run_session(&req.message, req.campaign_id, Some(session_id.clone()))
        .await
    {
        Ok(outcome) => Ok(Json(ChatResponse {
            session_id: outcome.session_id.clone(),
            reply: outcome.reply,
            executed: outcome.executed,
            collaboration_session: outcome.session_id,
        })),
        Err(err) => Err(ApiError::from_engine(err).with_session(session_id)),
    }
}

// ── /collaboration ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HeadQuery {
    pub slot: String,
    #[serde(default = "default_head_n")]
    pub n: usize,
}

fn default_head_n() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct HeadResponse {
    pub items: Vec<SlotEvent>,
}

/// Newest-first read of one slot's log.
pub async fn collaboration_head(
    State(state): State<AppState>,
    Query(query): Query<HeadQuery>,
) -> Json<HeadResponse> {
    Json(HeadResponse {
        items: state.engine.store().head(&query.slot, query.n.max(1)),
    })
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub message: String,
}

/// Inject an out-of-band user message into a slot's log; it augments the
/// slot's next dispatched prompt.
pub async fn collaboration_input(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    Json(req): Json<InputRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .inject_input(&slot, &req.message)
        .map_err(ApiError::from_engine)?;
    Ok(Json(json!({ "ok": true })))
}

/// Direct single-slot chat outside any session.
pub async fn slot_chat(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    Json(req): Json<InputRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reply = state
        .engine
        .chat_slot(&slot, &req.message)
        .await
        .map_err(ApiError::from_engine)?;
    Ok(Json(json!({ "slot": slot, "reply": reply })))
}

// ── /config ───────────────────────────────────────────────────────────────────

pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json((*state.engine.config().snapshot()).clone())
}

/// Validate and atomically swap the whole configuration.  In-flight
/// sessions keep the snapshot they started with.
pub async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<Config>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let warnings = state
        .engine
        .config()
        .replace(config)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "config", e.to_string()))?;
    Ok(Json(json!({ "ok": true, "warnings": warnings })))
}

/// Replace one slot's configuration (or add a new slot).
pub async fn put_slot_config(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    Json(slot_config): Json<SlotConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if slot_config.name != slot {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "config",
            format!("body names slot {:?}, path names {slot:?}", slot_config.name),
        ));
    }
    let mut config = (*state.engine.config().snapshot()).clone();
    match config.slots.iter_mut().find(|s| s.name == slot) {
        Some(existing) => *existing = slot_config,
        None => config.slots.push(slot_config),
    }
    let warnings = state
        .engine
        .config()
        .replace(config)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "config", e.to_string()))?;
    Ok(Json(json!({ "ok": true, "warnings": warnings })))
}

// ── /sessions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default)]
    pub active: bool,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Json<serde_json::Value> {
    let sessions: Vec<_> = state
        .engine
        .registry()
        .list(query.active)
        .into_iter()
        .map(|h| {
            json!({
                "session_id": h.id,
                "phase": h.phase(),
                "campaign": h.campaign,
                "started_at": h.started_at.to_rfc3339(),
            })
        })
        .collect();
    Json(json!({ "sessions": sessions }))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.engine.registry().cancel(&id) {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "internal",
            format!("unknown session {id:?}"),
        ))
    }
}

// ── /skills ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct SkillRunRequest {
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn list_skills(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "skills": state.engine.skills().list() }))
}

/// Run the sandbox over a draft (or active) skill and record the verdict.
pub async fn test_skill(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SkillRunRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limits = Limits::from_config(&state.engine.config().snapshot().sandbox);
    let input = req.message.unwrap_or_else(|| "hello world".into());
    let report = state
        .engine
        .skills()
        .test(&id, &input, state.engine.sandbox().as_ref(), &limits)
        .await
        .map_err(ApiError::from_skill)?;
    Ok(Json(json!({
        "ok": report.ok,
        "stdout": report.stdout,
        "stderr": report.stderr,
        "exit_code": report.exit_code,
        "duration_ms": report.duration_ms,
    })))
}

/// Draft → active, only when the last sandbox test passed.
pub async fn promote_skill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .engine
        .skills()
        .promote(&id)
        .map_err(ApiError::from_skill)?;
    Ok(Json(json!({ "ok": true, "skill": record })))
}

pub async fn execute_skill(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SkillRunRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limits = Limits::from_config(&state.engine.config().snapshot().sandbox);
    let input = req.message.unwrap_or_default();
    let report = state
        .engine
        .skills()
        .execute(&id, &input, state.engine.sandbox().as_ref(), &limits)
        .await
        .map_err(ApiError::from_skill)?;
    Ok(Json(json!({
        "ok": report.ok,
        "stdout": report.stdout,
        "stderr": report.stderr,
        "exit_code": report.exit_code,
        "duration_ms": report.duration_ms,
    })))
}

// ── /health ───────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "version": state.version }))
}
