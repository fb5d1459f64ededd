// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP surface of the orchestrator.
//!
//! The engine never calls back into a UI: everything external goes through
//! these endpoints — a blocking `/chat`, a live `/events` SSE feed off the
//! event bus, pull access to the collaboration logs, config read/replace,
//! and the skill lifecycle.

mod error;
mod routes;
mod sse;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use quorum_engine::Engine;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server io: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub version: &'static str,
}

/// Assemble the full router.
pub fn router(engine: Arc<Engine>, version: &'static str) -> Router {
    let state = AppState { engine, version };
    Router::new()
        .route("/chat", post(routes::chat))
        .route("/events", get(sse::events))
        .route("/collaboration/head", get(routes::collaboration_head))
        .route("/collaboration/input/:slot", post(routes::collaboration_input))
        .route("/config", get(routes::get_config).put(routes::put_config))
        .route("/models/:slot/config", post(routes::put_slot_config))
        .route("/slots/:slot/chat", post(routes::slot_chat))
        .route("/sessions", get(routes::list_sessions))
        .route("/sessions/:id/cancel", post(routes::cancel_session))
        .route("/skills", get(routes::list_skills))
        .route("/skills/:id/test", post(routes::test_skill))
        .route("/skills/:id/promote", post(routes::promote_skill))
        .route("/skills/:id/execute", post(routes::execute_skill))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c, then cancel all live sessions.
pub async fn serve(addr: &str, engine: Arc<Engine>, version: &'static str) -> Result<(), ServeError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "http surface listening");

    let app = router(engine.clone(), version);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal, cancelling live sessions");
        })
        .await?;

    engine.shutdown();
    Ok(())
}
