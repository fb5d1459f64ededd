// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Phase prompt templates.
//!
//! Each phase builds a fresh user prompt; the slot's configured system
//! prompt rides alongside on every call.  Out-of-band user inputs injected
//! via the collaboration-input channel are appended to whichever prompt the
//! slot is dispatched with next.

/// Phase 1: propose a solution, aware of who else is on the team.
pub fn proposal_prompt(peer_names: &[String], role: &str, user_message: &str) -> String {
    let peers = if peer_names.is_empty() {
        "none".to_string()
    } else {
        peer_names.join(", ")
    };
    let role = if role.is_empty() { "a team member" } else { role };
    format!(
        "You are participating in a team with peers {peers}. The user request \
         follows. Produce your best solution/answer as {role}. User: {user_message}"
    )
}

/// Phase 2: revise the own proposal in light of every peer's.
pub fn refinement_prompt(own_proposal: &str, peer_context: &str) -> String {
    let peers = if peer_context.is_empty() {
        "(no peer proposals)"
    } else {
        peer_context
    };
    format!(
        "Your previous proposal was: {own_proposal}. Your peers proposed: {peers}. \
         Revise your proposal, integrating peer insights where they improve \
         correctness and clarity. Return only the refined answer."
    )
}

/// Phase 3: pick the best refined answer by slot name.
pub fn vote_prompt(labeled_answers: &str) -> String {
    format!(
        "Each team member's refined answer follows: {labeled_answers}. Choose \
         the best answer by returning exactly the name of one slot, and \
         nothing else."
    )
}

/// Concatenation of peer proposals, each prefixed with name and role.
pub fn peer_context(peers: &[(String, String, String)]) -> String {
    peers
        .iter()
        .map(|(name, role, text)| {
            if role.is_empty() {
                format!("[{name}] {text}")
            } else {
                format!("[{name}, {role}] {text}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Refined answers labeled by slot name for the vote prompt.
pub fn labeled_answers(answers: &[(String, String)]) -> String {
    answers
        .iter()
        .map(|(name, text)| format!("[{name}] {text}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Append queued out-of-band user inputs to a phase prompt.
pub fn with_injected_inputs(prompt: String, inputs: &[String]) -> String {
    if inputs.is_empty() {
        return prompt;
    }
    let mut out = prompt;
    out.push_str("\nAdditional user input for you:");
    for input in inputs {
        out.push_str("\n- ");
        out.push_str(input);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
