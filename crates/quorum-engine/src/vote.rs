// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Vote parsing, weighted tallying, and deterministic tie-breaking.

use std::collections::HashMap;

/// Parse one ballot: lowercase, strip whitespace, and match against the
/// candidate names.  Anything else is discarded.
pub fn parse_vote(raw: &str, candidates: &[String]) -> Option<String> {
    let cleaned = raw.trim().to_lowercase();
    candidates.iter().find(|c| **c == cleaned).cloned()
}

/// Sum each ballot weighted by its voter.
pub fn tally_votes(
    ballots: &[(String, String)],
    weight_of: impl Fn(&str) -> f64,
) -> HashMap<String, f64> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for (voter, voted) in ballots {
        *totals.entry(voted.clone()).or_default() += weight_of(voter);
    }
    totals
}

/// Winner among `candidates`: highest vote total, ties broken by the
/// candidate's own weight, then by lexicographically smallest name.
/// Candidates absent from `totals` count zero votes, so with no ballots at
/// all the weights and names alone decide.
pub fn pick_winner<'a>(
    candidates: impl IntoIterator<Item = &'a str>,
    totals: &HashMap<String, f64>,
    weight_of: impl Fn(&str) -> f64,
) -> Option<String> {
    candidates
        .into_iter()
        .max_by(|a, b| {
            let (ta, tb) = (
                totals.get(*a).copied().unwrap_or(0.0),
                totals.get(*b).copied().unwrap_or(0.0),
            );
            ta.total_cmp(&tb)
                .then(weight_of(a).total_cmp(&weight_of(b)))
                // Smaller name wins the final tie, so rank it higher.
                .then_with(|| b.cmp(a))
        })
        .map(str::to_string)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
