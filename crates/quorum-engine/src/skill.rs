// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Candidate skills and the skill library.
//!
//! A winning answer may carry a fenced code block flagged as a skill.  The
//! engine extracts it into a draft record, validates it in the sandbox, and
//! promotes it to the active library on a passing run.  Records persist as
//! one JSON file per skill so the library survives restarts; promotion is
//! at-most-once with idempotent re-runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use quorum_sandbox::{Limits, SandboxError, SandboxReport, SandboxRunner};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill {0:?} not found")]
    NotFound(String),
    #[error("skill {0:?} has not passed a sandbox test")]
    NotValidated(String),
    #[error("skill {0:?} is not active")]
    NotActive(String),
    #[error("skill io: {0}")]
    Io(#[from] std::io::Error),
    #[error("skill encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillState {
    Draft,
    Active,
}

/// One skill in the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: String,
    pub name: String,
    pub source: String,
    /// Name of the entry operation: `entry(message) -> string`.
    pub entry: String,
    pub state: SkillState,
    pub created_at: DateTime<Utc>,
    pub last_test_ok: Option<bool>,
    pub last_tested_at: Option<DateTime<Utc>>,
}

/// A skill candidate extracted from an answer, not yet in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSkill {
    pub name: String,
    pub source: String,
    pub entry: String,
}

/// Extract a skill candidate from an answer's fenced code blocks.
///
/// A block qualifies when its fence info string mentions `skill`
/// (" ```skill ", " ```python skill ", …).  The entry operation is the
/// first `def` in the block; the name comes from a `# skill: <name>` line
/// when present, else the entry name.  Returns the first qualifying block.
pub fn extract_candidate(answer: &str) -> Option<CandidateSkill> {
    let mut in_block = false;
    let mut qualifies = false;
    let mut body: Vec<&str> = Vec::new();
    for line in answer.lines() {
        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix("```") {
            if in_block {
                if qualifies {
                    return candidate_from_source(&body.join("\n"));
                }
                in_block = false;
                body.clear();
            } else {
                in_block = true;
                qualifies = info
                    .to_lowercase()
                    .split_whitespace()
                    .any(|word| word == "skill");
            }
            continue;
        }
        if in_block && qualifies {
            body.push(line);
        }
    }
    None
}

fn candidate_from_source(source: &str) -> Option<CandidateSkill> {
    let entry = source.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("def ")?;
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        (!name.is_empty() && rest[name.len()..].starts_with('(')).then_some(name)
    })?;
    let name = source
        .lines()
        .find_map(|line| line.trim().strip_prefix("# skill:"))
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| entry.clone());
    Some(CandidateSkill {
        name,
        source: source.to_string(),
        entry,
    })
}

/// Persistent library of skills, one JSON file per record.
pub struct SkillLibrary {
    dir: PathBuf,
    skills: Mutex<HashMap<String, SkillRecord>>,
}

impl SkillLibrary {
    /// Open (or create) the library directory and load existing records.
    /// Unreadable record files are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SkillError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut skills = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(SkillError::from)
                .and_then(|text| serde_json::from_str::<SkillRecord>(&text).map_err(Into::into))
            {
                Ok(record) => {
                    skills.insert(record.id.clone(), record);
                }
                Err(e) => warn!(path = %path.display(), "skipping unreadable skill record: {e}"),
            }
        }
        Ok(Self {
            dir,
            skills: Mutex::new(skills),
        })
    }

    /// Add a new draft from an extracted candidate.
    pub fn create_draft(&self, candidate: &CandidateSkill) -> Result<SkillRecord, SkillError> {
        let record = SkillRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: candidate.name.clone(),
            source: candidate.source.clone(),
            entry: candidate.entry.clone(),
            state: SkillState::Draft,
            created_at: Utc::now(),
            last_test_ok: None,
            last_tested_at: None,
        };
        self.persist(&record)?;
        self.skills
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        debug!(skill = %record.name, id = %record.id, "skill draft created");
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<SkillRecord> {
        self.skills.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SkillRecord> {
        let mut all: Vec<_> = self.skills.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Run the skill in the sandbox and record the verdict.
    pub async fn test(
        &self,
        id: &str,
        input: &str,
        sandbox: &dyn SandboxRunner,
        limits: &Limits,
    ) -> Result<SandboxReport, SkillError> {
        let record = self.get(id).ok_or_else(|| SkillError::NotFound(id.into()))?;
        let report = sandbox
            .run(&record.source, &record.entry, input, limits)
            .await?;
        self.update(id, |r| {
            r.last_test_ok = Some(report.ok);
            r.last_tested_at = Some(Utc::now());
        })?;
        Ok(report)
    }

    /// Promote draft → active.  Requires the most recent test to have
    /// passed; re-promoting an active skill is a no-op.
    pub fn promote(&self, id: &str) -> Result<SkillRecord, SkillError> {
        let record = self.get(id).ok_or_else(|| SkillError::NotFound(id.into()))?;
        if record.state == SkillState::Active {
            return Ok(record);
        }
        if record.last_test_ok != Some(true) {
            return Err(SkillError::NotValidated(id.into()));
        }
        self.update(id, |r| r.state = SkillState::Active)?;
        Ok(self.get(id).expect("record present"))
    }

    /// Execute an active skill with an input message.
    pub async fn execute(
        &self,
        id: &str,
        input: &str,
        sandbox: &dyn SandboxRunner,
        limits: &Limits,
    ) -> Result<SandboxReport, SkillError> {
        let record = self.get(id).ok_or_else(|| SkillError::NotFound(id.into()))?;
        if record.state != SkillState::Active {
            return Err(SkillError::NotActive(id.into()));
        }
        Ok(sandbox
            .run(&record.source, &record.entry, input, limits)
            .await?)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut SkillRecord)) -> Result<(), SkillError> {
        let mut skills = self.skills.lock().unwrap();
        let record = skills
            .get_mut(id)
            .ok_or_else(|| SkillError::NotFound(id.into()))?;
        f(record);
        let snapshot = record.clone();
        drop(skills);
        self.persist(&snapshot)
    }

    fn persist(&self, record: &SkillRecord) -> Result<(), SkillError> {
        let path = self.dir.join(format!("{}.json", record.id));
        std::fs::write(path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    // ── Extraction ────────────────────────────────────────────────────────────

    #[test]
    fn extracts_flagged_block_with_named_skill() {
        let answer = "Here is the tool you asked for:\n\
                      ```python skill\n\
                      # skill: greeter\n\
                      def handle(message):\n\
                          return 'hi ' + message\n\
                      ```\n\
                      Use it wisely.";
        let cand = extract_candidate(answer).unwrap();
        assert_eq!(cand.name, "greeter");
        assert_eq!(cand.entry, "handle");
        assert!(cand.source.contains("def handle"));
    }

    #[test]
    fn bare_skill_fence_qualifies() {
        let answer = "```skill\ndef run(message):\n    return message\n```";
        let cand = extract_candidate(answer).unwrap();
        assert_eq!(cand.entry, "run");
        assert_eq!(cand.name, "run", "name falls back to entry");
    }

    #[test]
    fn plain_code_blocks_are_ignored() {
        let answer = "```python\ndef handle(message):\n    return message\n```";
        assert!(extract_candidate(answer).is_none());
    }

    #[test]
    fn block_without_entry_function_is_rejected() {
        let answer = "```skill\nprint('no function here')\n```";
        assert!(extract_candidate(answer).is_none());
    }

    #[test]
    fn answer_without_blocks_yields_nothing() {
        assert!(extract_candidate("just prose, no code").is_none());
    }

    #[test]
    fn first_qualifying_block_wins() {
        let answer = "```python\ndef a(m):\n    return m\n```\n\
                      ```skill\ndef b(m):\n    return m\n```\n\
                      ```skill\ndef c(m):\n    return m\n```";
        assert_eq!(extract_candidate(answer).unwrap().entry, "b");
    }

    // ── Library lifecycle ─────────────────────────────────────────────────────

    struct FixedSandbox {
        ok: bool,
    }

    #[async_trait]
    impl SandboxRunner for FixedSandbox {
        async fn run(
            &self,
            _source: &str,
            _entry: &str,
            input: &str,
            _limits: &Limits,
        ) -> Result<SandboxReport, SandboxError> {
            Ok(SandboxReport {
                ok: self.ok,
                stdout: format!("out: {input}"),
                stderr: String::new(),
                exit_code: if self.ok { 0 } else { 1 },
                duration_ms: 1,
            })
        }
    }

    fn candidate() -> CandidateSkill {
        CandidateSkill {
            name: "greeter".into(),
            source: "def handle(message):\n    return 'hi'".into(),
            entry: "handle".into(),
        }
    }

    #[tokio::test]
    async fn draft_test_promote_flow() {
        let dir = tempfile::tempdir().unwrap();
        let lib = SkillLibrary::open(dir.path()).unwrap();
        let record = lib.create_draft(&candidate()).unwrap();
        assert_eq!(record.state, SkillState::Draft);

        let report = lib
            .test(&record.id, "hello world", &FixedSandbox { ok: true }, &Limits::default())
            .await
            .unwrap();
        assert!(report.ok);

        let promoted = lib.promote(&record.id).unwrap();
        assert_eq!(promoted.state, SkillState::Active);
    }

    #[tokio::test]
    async fn promote_without_passing_test_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let lib = SkillLibrary::open(dir.path()).unwrap();
        let record = lib.create_draft(&candidate()).unwrap();
        assert!(matches!(
            lib.promote(&record.id),
            Err(SkillError::NotValidated(_))
        ));

        lib.test(&record.id, "x", &FixedSandbox { ok: false }, &Limits::default())
            .await
            .unwrap();
        assert!(matches!(
            lib.promote(&record.id),
            Err(SkillError::NotValidated(_))
        ));
    }

    #[tokio::test]
    async fn execute_requires_active_state() {
        let dir = tempfile::tempdir().unwrap();
        let lib = SkillLibrary::open(dir.path()).unwrap();
        let record = lib.create_draft(&candidate()).unwrap();
        assert!(matches!(
            lib.execute(&record.id, "x", &FixedSandbox { ok: true }, &Limits::default())
                .await,
            Err(SkillError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn library_reloads_records_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let lib = SkillLibrary::open(dir.path()).unwrap();
            let record = lib.create_draft(&candidate()).unwrap();
            lib.test(&record.id, "x", &FixedSandbox { ok: true }, &Limits::default())
                .await
                .unwrap();
            lib.promote(&record.id).unwrap();
            record.id
        };
        let reopened = SkillLibrary::open(dir.path()).unwrap();
        let record = reopened.get(&id).expect("record survives restart");
        assert_eq!(record.state, SkillState::Active);
        assert_eq!(record.last_test_ok, Some(true));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let lib = SkillLibrary::open(dir.path()).unwrap();
        assert!(matches!(lib.promote("ghost"), Err(SkillError::NotFound(_))));
    }
}
