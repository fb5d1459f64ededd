// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-(slot, session) execution: one state machine driven by the engine.
//!
//! The runtime never self-advances.  For each dispatched phase it builds
//! nothing itself — the engine hands it the finished user prompt — and its
//! job is: acquire the slot's in-flight permit, invoke the chat client,
//! record the outcome in the slot's log, and transition.

use std::sync::{Arc, Mutex};

use quorum_config::SlotConfig;
use quorum_model::{CallContext, CallError, ChatClient};
use quorum_store::{CollabStore, Phase, SlotEvent};
use tokio::sync::Semaphore;
use tracing::warn;

/// Slot state within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Idle,
    Running(Phase),
    DoneProposal,
    DoneRefinement,
    DoneVote,
    Failed,
    Canceled,
}

pub(crate) struct SlotRuntime {
    slot: SlotConfig,
    session: String,
    campaign: Option<String>,
    store: Arc<CollabStore>,
    client: Arc<dyn ChatClient>,
    permits: Arc<Semaphore>,
    state: Mutex<SlotState>,
}

impl SlotRuntime {
    pub fn new(
        slot: SlotConfig,
        session: String,
        campaign: Option<String>,
        store: Arc<CollabStore>,
        client: Arc<dyn ChatClient>,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            slot,
            session,
            campaign,
            store,
            client,
            permits,
            state: Mutex::new(SlotState::Idle),
        }
    }

    pub fn slot_name(&self) -> &str {
        &self.slot.name
    }

    pub fn state(&self) -> SlotState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SlotState) {
        *self.state.lock().unwrap() = state;
    }

    /// Run one phase: invoke the model, log the outcome, transition.
    ///
    /// The permit bounds concurrent in-flight calls for this slot across
    /// sessions; waiting for a permit counts against the call deadline only
    /// indirectly (the phase barrier still applies).
    pub async fn dispatch(
        &self,
        phase: Phase,
        user_prompt: String,
        ctx: CallContext,
    ) -> Result<String, CallError> {
        self.set_state(SlotState::Running(phase));

        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                self.set_state(SlotState::Canceled);
                return Err(CallError::Canceled {
                    slot: self.slot.name.clone(),
                });
            }
        };

        match self
            .client
            .chat(&self.slot, &self.slot.prompt, &user_prompt, &ctx)
            .await
        {
            Ok(completion) => {
                let event = self
                    .event(phase, format!("{phase}.ok"), completion.text.clone())
                    .with_meta("provider", completion.meta.provider)
                    .with_meta("model", completion.meta.model)
                    .with_meta("duration_ms", completion.meta.duration_ms.to_string())
                    .with_meta("retry_count", completion.meta.retry_count.to_string());
                self.append(event);
                self.set_state(match phase {
                    Phase::Proposal => SlotState::DoneProposal,
                    Phase::Refinement => SlotState::DoneRefinement,
                    Phase::Vote | Phase::Meta => SlotState::DoneVote,
                });
                Ok(completion.text)
            }
            Err(err) if err.class() == "canceled" => {
                self.append(self.event(phase, format!("{phase}.canceled"), String::new()));
                self.set_state(SlotState::Canceled);
                Err(err)
            }
            Err(err) => {
                let event = self
                    .event(phase, format!("{phase}.error"), String::new())
                    .with_meta("error", err.class())
                    .with_meta("message", truncate(&err.to_string(), 200));
                self.append(event);
                self.set_state(SlotState::Failed);
                Err(err)
            }
        }
    }

    fn event(&self, phase: Phase, tag: String, text: String) -> SlotEvent {
        let mut event = SlotEvent::new(
            self.slot.log_namespace(),
            &self.session,
            phase,
            tag,
            text,
        );
        if let Some(campaign) = &self.campaign {
            event = event.with_meta("campaign", campaign.clone());
        }
        event
    }

    fn append(&self, event: SlotEvent) {
        // A log write failure degrades observability, not the phase result.
        if let Err(e) = self.store.append(event) {
            warn!(slot = %self.slot.name, "event append failed: {e}");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s[..cut].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
