// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use quorum_config::SlotConfig;

use crate::{CallContext, CallError, CallMeta, ChatClient, Completion};

/// One scripted outcome for a slot's next call.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return this text.
    Reply(String),
    /// Fail with this error.
    Fail(CallError),
    /// Never answer: block until the call is cancelled (yields `canceled`)
    /// or the call deadline elapses (yields `timeout`).
    Hang,
}

/// A recorded call for prompt assertions in tests.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub slot: String,
    pub system: String,
    pub user: String,
}

/// Pre-scripted chat client for engine tests.  Each slot has an ordered
/// queue of [`ScriptStep`]s consumed one per call; a slot with an exhausted
/// (or absent) queue acknowledges deterministically.  No network access.
#[derive(Default)]
pub struct ScriptedChatClient {
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue scripted outcomes for a slot, consumed in order.
    pub fn script(&self, slot: &str, steps: impl IntoIterator<Item = ScriptStep>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(slot.to_string())
            .or_default()
            .extend(steps);
    }

    /// Builder-style convenience for test setup chains.
    pub fn with_script(self, slot: &str, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.script(slot, steps);
        self
    }

    /// Every call recorded so far, in call order.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls recorded for one slot, in call order.
    pub fn recorded_for(&self, slot: &str) -> Vec<RecordedCall> {
        self.recorded()
            .into_iter()
            .filter(|c| c.slot == slot)
            .collect()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(
        &self,
        slot: &SlotConfig,
        system: &str,
        user: &str,
        ctx: &CallContext,
    ) -> Result<Completion, CallError> {
        self.calls.lock().unwrap().push(RecordedCall {
            slot: slot.name.clone(),
            system: system.to_string(),
            user: user.to_string(),
        });

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&slot.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ScriptStep::Reply(format!("ack from {}", slot.name)));

        let meta = CallMeta {
            provider: "scripted".into(),
            model: slot.model.clone(),
            duration_ms: 0,
            retry_count: 0,
        };
        match step {
            ScriptStep::Reply(text) => Ok(Completion { text, meta }),
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(CallError::Canceled {
                        slot: slot.name.clone(),
                    }),
                    _ = tokio::time::sleep(ctx.deadline) => Err(CallError::Timeout {
                        slot: slot.name.clone(),
                    }),
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
