// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Live event feed: a Server-Sent-Events bridge onto the event bus.
//!
//! Each connection is one bus subscriber.  A client that stops reading
//! loses its oldest undelivered events (the bus never blocks the engine);
//! new subscribers start from "now" — missed history is not replayed, the
//! pull API (`/collaboration/head`) covers that.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use quorum_store::SlotEvent;
use serde::Deserialize;
use tracing::debug;

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

/// Does an event pass this subscriber's filters?
pub(crate) fn matches(query: &EventsQuery, event: &SlotEvent) -> bool {
    if let Some(slot) = &query.slot {
        if event.slot != *slot {
            return false;
        }
    }
    if let Some(session) = &query.session {
        if event.session != *session {
            return false;
        }
    }
    true
}

/// GET /events — subscribe to the bus and stream matching events as JSON.
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut subscription = state
        .engine
        .store()
        .bus()
        .subscribe()
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "busy", e.to_string()))?;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            if !matches(&query, &event) {
                continue;
            }
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => debug!("unserializable event skipped: {e}"),
            }
        }
        debug!(dropped = subscription.dropped(), "event stream closed");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
