// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quorum_engine::{EngineError, SkillError};
use serde_json::json;

/// Well-formed JSON error for every failure path: `{error:{class,message},
/// session_id?}` with the status the contract demands (503 busy, 504
/// deadline).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub class: &'static str,
    pub message: String,
    pub session_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, class: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            class,
            message: message.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn from_engine(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Deadline { .. } => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Config(_) => StatusCode::BAD_REQUEST,
            EngineError::Canceled => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Internal(_) | EngineError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.class(), err.to_string())
    }

    pub fn from_skill(err: SkillError) -> Self {
        let status = match &err {
            SkillError::NotFound(_) => StatusCode::NOT_FOUND,
            SkillError::NotValidated(_) | SkillError::NotActive(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, "skill", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": { "class": self.class, "message": self.message }
        });
        if let Some(session) = &self.session_id {
            body["session_id"] = json!(session);
        }
        (self.status, Json(body)).into_response()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
