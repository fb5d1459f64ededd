// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The collaboration engine: proposal → refinement → vote.
//!
//! One session drives every enabled slot through three phases with a
//! barrier between them.  A slot failure in any phase is recovered locally
//! (the slot abstains); the answer the user sees is dexter's refinement
//! whenever dexter produced one, with the vote ranking peer answers for
//! fallback and reporting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use quorum_config::{Config, SharedConfig, SlotConfig, CHIEF_SLOT, SESSION_SLOT};
use quorum_model::{CallContext, CallError, ChatClient};
use quorum_sandbox::{Limits, SandboxRunner};
use quorum_store::{CollabStore, Phase, SlotEvent};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::runtime::SlotRuntime;
use crate::vote::{parse_vote, pick_winner, tally_votes};
use crate::{
    extract_candidate, prompts, EngineError, SessionHandle, SessionPhase, SessionRegistry,
    SkillLibrary,
};

/// Result of the sandbox round for a skill extracted from the answer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutedSkill {
    pub ok: bool,
    pub skill_name: Option<String>,
    pub promoted: bool,
}

/// What a finished session hands back to the public surface.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub session_id: String,
    pub reply: String,
    pub winner: Option<String>,
    pub executed: Option<ExecutedSkill>,
}

pub struct Engine {
    config: SharedConfig,
    store: Arc<CollabStore>,
    client: Arc<dyn ChatClient>,
    registry: Arc<SessionRegistry>,
    sandbox: Arc<dyn SandboxRunner>,
    skills: Arc<SkillLibrary>,
    /// Per-slot in-flight call permits, shared across sessions.
    permits: DashMap<String, Arc<Semaphore>>,
    /// Out-of-band user inputs waiting for a slot's next prompt.
    pending_inputs: DashMap<String, Vec<String>>,
}

impl Engine {
    pub fn new(
        config: SharedConfig,
        store: Arc<CollabStore>,
        client: Arc<dyn ChatClient>,
        registry: Arc<SessionRegistry>,
        sandbox: Arc<dyn SandboxRunner>,
        skills: Arc<SkillLibrary>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            registry,
            sandbox,
            skills,
            permits: DashMap::new(),
            pending_inputs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CollabStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn skills(&self) -> &Arc<SkillLibrary> {
        &self.skills
    }

    pub fn sandbox(&self) -> &Arc<dyn SandboxRunner> {
        &self.sandbox
    }

    /// Cancel all live sessions (teardown path).
    pub fn shutdown(&self) {
        self.registry.cancel_all();
    }

    /// Queue an out-of-band user message for a slot and record it in the
    /// slot's log.  It augments the slot's next dispatched prompt only; it
    /// is never parsed as a vote.
    pub fn inject_input(&self, slot: &str, message: &str) -> Result<(), EngineError> {
        let cfg = self.config.snapshot();
        let slot_cfg = cfg
            .slot(slot)
            .ok_or_else(|| EngineError::Config(format!("unknown slot {slot:?}")))?;
        let event = SlotEvent::new(
            slot_cfg.log_namespace(),
            "oob",
            Phase::Meta,
            "input.user",
            message,
        );
        self.store.append(event)?;
        self.pending_inputs
            .entry(slot.to_string())
            .or_default()
            .push(message.to_string());
        Ok(())
    }

    fn drain_inputs(&self, slot: &str) -> Vec<String> {
        self.pending_inputs
            .get_mut(slot)
            .map(|mut queue| std::mem::take(queue.value_mut()))
            .unwrap_or_default()
    }

    fn permit_for(&self, slot: &str, cap: usize) -> Arc<Semaphore> {
        self.permits
            .entry(slot.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(cap.max(1))))
            .clone()
    }

    /// Direct single-slot chat outside any collaboration session.
    pub async fn chat_slot(&self, slot_name: &str, message: &str) -> Result<String, EngineError> {
        let cfg = self.config.snapshot();
        let slot = cfg
            .slot(slot_name)
            .filter(|s| s.enabled)
            .cloned()
            .ok_or_else(|| EngineError::Config(format!("unknown or disabled slot {slot_name:?}")))?;

        let prompt =
            prompts::with_injected_inputs(message.to_string(), &self.drain_inputs(slot_name));
        let ctx = CallContext::new(
            Duration::from_secs(cfg.engine.call_deadline_secs),
            tokio_util::sync::CancellationToken::new(),
        );
        let session = format!("chat-{}", uuid::Uuid::new_v4());
        match self.client.chat(&slot, &slot.prompt, &prompt, &ctx).await {
            Ok(completion) => {
                let event = SlotEvent::new(
                    slot.log_namespace(),
                    &session,
                    Phase::Meta,
                    "chat.ok",
                    completion.text.clone(),
                )
                .with_meta("provider", completion.meta.provider)
                .with_meta("model", completion.meta.model)
                .with_meta("duration_ms", completion.meta.duration_ms.to_string());
                self.store.append(event)?;
                Ok(completion.text)
            }
            Err(err) => {
                let event =
                    SlotEvent::new(slot.log_namespace(), &session, Phase::Meta, "chat.error", "")
                        .with_meta("error", err.class());
                self.store.append(event)?;
                Err(EngineError::Internal(err.to_string()))
            }
        }
    }

    /// Run the full three-phase protocol for one user message.
    ///
    /// Re-running an aborted session with the same id is allowed and
    /// appends a fresh generation of events under that id.
    pub async fn run_session(
        &self,
        user_message: &str,
        campaign: Option<String>,
        session_id: Option<String>,
    ) -> Result<ChatOutcome, EngineError> {
        let cfg = self.config.snapshot();
        let warnings = cfg
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let session = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = Arc::new(SessionHandle::new(&session, campaign));
        self.registry.create(handle.clone())?;
        info!(session = %session, "collaboration session started");

        let session_deadline = Duration::from_secs(cfg.engine.session_deadline_secs);
        let mut drive = Box::pin(self.drive(&cfg, &handle, user_message, &warnings));
        let result = tokio::select! {
            r = &mut drive => r,
            _ = tokio::time::sleep(session_deadline) => {
                // Hard deadline: cancel everything, give the protocol a
                // short grace to log cancellations, report what we have.
                handle.cancel.cancel();
                let _ = tokio::time::timeout(Duration::from_secs(5), &mut drive).await;
                Err(EngineError::Deadline {
                    partial: compose_final(&handle.proposals(), &handle.refined(), &handle.tally(), &cfg)
                        .ok()
                        .map(|(answer, _)| answer),
                })
            }
        };
        drop(drive);

        match &result {
            Ok(_) => {
                let _ = handle.advance(SessionPhase::Done);
            }
            Err(e) => {
                let _ = handle.advance(SessionPhase::Failed);
                self.append_meta(
                    &handle,
                    "session.failed",
                    String::new(),
                    &[("error", e.class().to_string())],
                );
            }
        }
        self.registry.gc();
        result
    }

    async fn drive(
        &self,
        cfg: &Config,
        handle: &Arc<SessionHandle>,
        user_message: &str,
        warnings: &[String],
    ) -> Result<ChatOutcome, EngineError> {
        self.append_meta(handle, "session.start", user_message.to_string(), &[]);
        for warning in warnings {
            self.append_meta(handle, "weights.unknown", warning.clone(), &[]);
        }

        let slots: Vec<SlotConfig> = cfg.collaboration_slots().cloned().collect();
        let names: Vec<String> = slots.iter().map(|s| s.name.clone()).collect();
        let runtimes: HashMap<String, Arc<SlotRuntime>> = slots
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    Arc::new(SlotRuntime::new(
                        s.clone(),
                        handle.id.clone(),
                        handle.campaign.clone(),
                        self.store.clone(),
                        self.client.clone(),
                        self.permit_for(&s.name, cfg.engine.max_inflight_per_slot),
                    )),
                )
            })
            .collect();

        // ── Phase 1: proposal ────────────────────────────────────────────────
        handle.advance(SessionPhase::Proposal)?;
        let jobs: Vec<(Arc<SlotRuntime>, String)> = slots
            .iter()
            .map(|s| {
                let peers: Vec<String> =
                    names.iter().filter(|n| **n != s.name).cloned().collect();
                let prompt = prompts::with_injected_inputs(
                    prompts::proposal_prompt(&peers, &s.role, user_message),
                    &self.drain_inputs(&s.name),
                );
                (runtimes[&s.name].clone(), prompt)
            })
            .collect();
        let phase1 = self.run_phase(cfg, handle, Phase::Proposal, jobs).await;
        for (name, result) in &phase1 {
            if let Ok(text) = result {
                handle.set_proposal(name, text.clone());
            }
        }
        if handle.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        // ── Phase 2: refinement ──────────────────────────────────────────────
        handle.advance(SessionPhase::Refinement)?;
        let proposals = handle.proposals();
        let mut participants: Vec<&SlotConfig> = slots
            .iter()
            .filter(|s| proposals.contains_key(&s.name))
            .collect();
        participants.sort_by(|a, b| a.name.cmp(&b.name));

        let jobs: Vec<(Arc<SlotRuntime>, String)> = participants
            .iter()
            .map(|s| {
                let peer_ctx: Vec<(String, String, String)> = participants
                    .iter()
                    .filter(|p| p.name != s.name)
                    .map(|p| (p.name.clone(), p.role.clone(), proposals[&p.name].clone()))
                    .collect();
                let prompt = prompts::with_injected_inputs(
                    prompts::refinement_prompt(
                        &proposals[&s.name],
                        &prompts::peer_context(&peer_ctx),
                    ),
                    &self.drain_inputs(&s.name),
                );
                (runtimes[&s.name].clone(), prompt)
            })
            .collect();
        let phase2 = self.run_phase(cfg, handle, Phase::Refinement, jobs).await;
        for (name, result) in &phase2 {
            if let Ok(text) = result {
                handle.set_refined(name, text.clone());
            }
        }
        if handle.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        // ── Phase 3: vote ────────────────────────────────────────────────────
        handle.advance(SessionPhase::Vote)?;
        let refined = handle.refined();
        let mut voters: Vec<&SlotConfig> = slots
            .iter()
            .filter(|s| refined.contains_key(&s.name))
            .collect();
        voters.sort_by(|a, b| a.name.cmp(&b.name));

        let mut ballots: Vec<(String, String)> = Vec::new();
        if !voters.is_empty() {
            let mut labeled: Vec<(String, String)> = refined
                .iter()
                .map(|(n, t)| (n.clone(), t.clone()))
                .collect();
            labeled.sort_by(|a, b| a.0.cmp(&b.0));
            let ballot_prompt = prompts::vote_prompt(&prompts::labeled_answers(&labeled));

            let jobs: Vec<(Arc<SlotRuntime>, String)> = voters
                .iter()
                .map(|s| {
                    let prompt = prompts::with_injected_inputs(
                        ballot_prompt.clone(),
                        &self.drain_inputs(&s.name),
                    );
                    (runtimes[&s.name].clone(), prompt)
                })
                .collect();
            let phase3 = self.run_phase(cfg, handle, Phase::Vote, jobs).await;
            for (voter, result) in &phase3 {
                if let Ok(raw) = result {
                    match parse_vote(raw, &names) {
                        Some(voted) => ballots.push((voter.clone(), voted)),
                        None => debug!(voter = %voter, "discarding unparseable ballot"),
                    }
                }
            }
        }
        if handle.cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        let totals = tally_votes(&ballots, |voter| cfg.weight(voter));
        handle.set_tally(totals.clone());

        let (answer, winner) =
            compose_final(&handle.proposals(), &handle.refined(), &totals, cfg)?;
        handle.set_final_answer(answer.clone());

        let totals_json =
            serde_json::to_string(&totals).unwrap_or_else(|_| "{}".into());
        self.append_meta(
            handle,
            "vote.tally",
            winner.clone().unwrap_or_default(),
            &[("totals", totals_json)],
        );

        let executed = self.maybe_run_skill(cfg, handle, &answer).await;

        self.append_meta(
            handle,
            "session.done",
            answer.clone(),
            &[("winner", winner.clone().unwrap_or_default())],
        );
        Ok(ChatOutcome {
            session_id: handle.id.clone(),
            reply: answer,
            winner,
            executed,
        })
    }

    /// Dispatch one phase to every job in parallel and wait at the barrier:
    /// all slots terminal, or the phase deadline cancels the stragglers.
    async fn run_phase(
        &self,
        cfg: &Config,
        handle: &Arc<SessionHandle>,
        phase: Phase,
        jobs: Vec<(Arc<SlotRuntime>, String)>,
    ) -> HashMap<String, Result<String, CallError>> {
        let phase_deadline = Duration::from_secs(cfg.engine.phase_deadline_secs);
        // The stricter of the per-call and per-phase budgets wins.
        let call_deadline = Duration::from_secs(
            cfg.engine.call_deadline_secs.min(cfg.engine.phase_deadline_secs),
        );
        let phase_cancel = handle.cancel.child_token();

        let mut join_set = JoinSet::new();
        for (runtime, prompt) in jobs {
            let ctx = CallContext::new(call_deadline, phase_cancel.clone());
            join_set.spawn(async move {
                let name = runtime.slot_name().to_string();
                let result = runtime.dispatch(phase, prompt, ctx).await;
                (name, result)
            });
        }

        let mut results = HashMap::new();
        let collect = async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((name, result)) => {
                        results.insert(name, result);
                    }
                    Err(e) => warn!("slot task join error: {e}"),
                }
            }
        };
        if tokio::time::timeout(phase_deadline, collect).await.is_err() {
            debug!(%phase, session = %handle.id, "phase deadline, cancelling stragglers");
            phase_cancel.cancel();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((name, result)) => {
                        results.insert(name, result);
                    }
                    Err(e) => warn!("slot task join error: {e}"),
                }
            }
        }
        results
    }

    async fn maybe_run_skill(
        &self,
        cfg: &Config,
        handle: &Arc<SessionHandle>,
        answer: &str,
    ) -> Option<ExecutedSkill> {
        let candidate = extract_candidate(answer)?;
        let name = candidate.name.clone();
        let record = match self.skills.create_draft(&candidate) {
            Ok(r) => r,
            Err(e) => {
                warn!(skill = %name, "draft creation failed: {e}");
                return Some(ExecutedSkill {
                    ok: false,
                    skill_name: Some(name),
                    promoted: false,
                });
            }
        };
        self.append_meta(handle, "skill.draft", name.clone(), &[("id", record.id.clone())]);

        let limits = Limits::from_config(&cfg.sandbox);
        let report = self
            .skills
            .test(&record.id, "hello world", self.sandbox.as_ref(), &limits)
            .await;
        match report {
            Ok(report) if report.ok => {
                let promoted = self.skills.promote(&record.id).is_ok();
                self.append_meta(
                    handle,
                    "skill.promoted",
                    name.clone(),
                    &[("id", record.id.clone())],
                );
                Some(ExecutedSkill {
                    ok: true,
                    skill_name: Some(name),
                    promoted,
                })
            }
            Ok(_) => Some(ExecutedSkill {
                ok: false,
                skill_name: Some(name),
                promoted: false,
            }),
            Err(e) => {
                warn!(skill = %name, "sandbox test failed: {e}");
                Some(ExecutedSkill {
                    ok: false,
                    skill_name: Some(name),
                    promoted: false,
                })
            }
        }
    }

    /// Append an orchestrator meta-event to the reserved `session` log.
    fn append_meta(
        &self,
        handle: &Arc<SessionHandle>,
        tag: &str,
        text: String,
        meta: &[(&str, String)],
    ) {
        let mut event = SlotEvent::new(SESSION_SLOT, &handle.id, Phase::Meta, tag, text);
        if let Some(campaign) = &handle.campaign {
            event = event.with_meta("campaign", campaign.clone());
        }
        for (key, value) in meta {
            event = event.with_meta(*key, value.clone());
        }
        if let Err(e) = self.store.append(event) {
            warn!(session = %handle.id, "meta append failed: {e}");
        }
    }
}

/// Final-answer composition.
///
/// 1. Dexter's refinement, when it exists, is always the user-facing text.
/// 2. Otherwise the highest-voted peer's refinement.
/// 3. Otherwise the highest-voted peer's proposal, then dexter's proposal.
/// The reported winner is always the preferred peer (dexter is ineligible).
fn compose_final(
    proposals: &HashMap<String, String>,
    refined: &HashMap<String, String>,
    totals: &HashMap<String, f64>,
    cfg: &Config,
) -> Result<(String, Option<String>), EngineError> {
    let peer_refined: Vec<&str> = refined
        .keys()
        .map(String::as_str)
        .filter(|n| *n != CHIEF_SLOT)
        .collect();
    let peer_proposed: Vec<&str> = proposals
        .keys()
        .map(String::as_str)
        .filter(|n| *n != CHIEF_SLOT)
        .collect();

    let winner = if !peer_refined.is_empty() {
        pick_winner(peer_refined, totals, |s| cfg.weight(s))
    } else {
        pick_winner(peer_proposed, totals, |s| cfg.weight(s))
    };

    if let Some(text) = refined.get(CHIEF_SLOT) {
        return Ok((text.clone(), winner));
    }
    if let Some(w) = &winner {
        if let Some(text) = refined.get(w) {
            return Ok((text.clone(), winner.clone()));
        }
        if let Some(text) = proposals.get(w) {
            return Ok((text.clone(), winner.clone()));
        }
    }
    if let Some(text) = proposals.get(CHIEF_SLOT) {
        return Ok((text.clone(), None));
    }
    Err(EngineError::Internal(
        "no slot produced any text".into(),
    ))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
