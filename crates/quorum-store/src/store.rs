// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only per-slot collaboration logs.
//!
//! Each slot's log is an ordered sequence of [`SlotEvent`]s; only that
//! slot's runtime appends to it (the engine appends to the reserved
//! `session` log), so appends serialize per slot and reads are linearizable
//! with them.  Every successful append is mirrored to the [`EventBus`].
//!
//! Persistence is optional: with a root directory configured, each
//! (slot, session) pair gets one append-only JSONL file whose line is
//! written out before the append reports success.  Correctness never
//! depends on the files; they are an audit trail.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::{EventBus, Phase, SlotEvent};

/// Marker event synthesized in place of dropped history when a log exceeds
/// the in-memory retention cap.
pub const TRUNCATED_EVENT: &str = "log.truncated";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("event encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Default)]
struct SlotLog {
    events: Vec<SlotEvent>,
    last_ts: i64,
}

/// Shared store of per-slot event logs.
pub struct CollabStore {
    logs: DashMap<String, SlotLog>,
    bus: Arc<EventBus>,
    retention: usize,
    persist_root: Option<PathBuf>,
}

impl CollabStore {
    pub fn new(bus: Arc<EventBus>, retention: usize) -> Self {
        Self {
            logs: DashMap::new(),
            bus,
            retention: retention.max(2),
            persist_root: None,
        }
    }

    /// Enable JSONL persistence under `root`.
    pub fn with_persistence(mut self, root: impl Into<PathBuf>) -> Self {
        self.persist_root = Some(root.into());
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Atomically append one event to its slot's log.
    ///
    /// The timestamp is clamped to keep the per-slot sequence nondecreasing.
    /// With persistence enabled the JSONL line is durable before this
    /// returns; on a write error nothing is appended or published.
    pub fn append(&self, mut event: SlotEvent) -> Result<(), StoreError> {
        let mut log = self.logs.entry(event.slot.clone()).or_default();
        if event.ts < log.last_ts {
            event.ts = log.last_ts;
        } else {
            log.last_ts = event.ts;
        }

        self.persist_line(&event)?;

        debug!(slot = %event.slot, session = %event.session, tag = %event.event, "append");
        let session = event.session.clone();
        let slot = event.slot.clone();
        log.events.push(event.clone());
        enforce_retention(&mut log.events, &slot, &session, self.retention);
        drop(log);

        self.bus.publish(event);
        Ok(())
    }

    /// Last `n` events for a slot, newest first.  Fewer if fewer exist.
    pub fn head(&self, slot: &str, n: usize) -> Vec<SlotEvent> {
        self.logs
            .get(slot)
            .map(|log| log.events.iter().rev().take(n.max(1)).cloned().collect())
            .unwrap_or_default()
    }

    /// Events strictly after `ts` for a slot, oldest first.
    pub fn tail_since(&self, slot: &str, ts: i64) -> Vec<SlotEvent> {
        self.logs
            .get(slot)
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| e.ts > ts)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All events of one session, grouped by slot, each group in append order.
    pub fn session_snapshot(&self, session: &str) -> HashMap<String, Vec<SlotEvent>> {
        let mut out = HashMap::new();
        for entry in self.logs.iter() {
            let events: Vec<SlotEvent> = entry
                .value()
                .events
                .iter()
                .filter(|e| e.session == session)
                .cloned()
                .collect();
            if !events.is_empty() {
                out.insert(entry.key().clone(), events);
            }
        }
        out
    }

    fn persist_line(&self, event: &SlotEvent) -> Result<(), StoreError> {
        let Some(root) = &self.persist_root else {
            return Ok(());
        };
        let dir = root.join(sanitize(&event.slot));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.jsonl", sanitize(&event.session)));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let line = serde_json::to_string(event)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }
}

/// Keep at most `retention` events per (slot, session) in memory, replacing
/// dropped history with a single `log.truncated` marker.
fn enforce_retention(events: &mut Vec<SlotEvent>, slot: &str, session: &str, retention: usize) {
    let count = events.iter().filter(|e| e.session == session).count();
    if count <= retention {
        return;
    }
    let mut to_remove = count - retention;
    let mut removed_ts: Option<i64> = None;
    events.retain(|e| {
        if to_remove > 0 && e.session == session && e.event != TRUNCATED_EVENT {
            to_remove -= 1;
            removed_ts = Some(e.ts);
            false
        } else {
            true
        }
    });
    let has_marker = events
        .iter()
        .any(|e| e.session == session && e.event == TRUNCATED_EVENT);
    if !has_marker {
        let idx = events
            .iter()
            .position(|e| e.session == session)
            .unwrap_or(0);
        let mut marker = SlotEvent::new(slot, session, Phase::Meta, TRUNCATED_EVENT, "");
        marker.ts = removed_ts.unwrap_or(marker.ts);
        events.insert(idx, marker);
    }
}

/// File-name-safe rendering of slot and session identifiers.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
