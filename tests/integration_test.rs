// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Wiring smoke tests: a config file loaded from disk drives a full
/// collaboration session end to end with the scripted model client.
use std::io::Write;
use std::sync::Arc;

use quorum_config::SharedConfig;
use quorum_engine::{Engine, SessionRegistry, SkillLibrary};
use quorum_model::{ScriptStep, ScriptedChatClient};
use quorum_sandbox::ProcessSandbox;
use quorum_store::{CollabStore, EventBus};

const TEAM_YAML: &str = "\
slots:
  - name: dexter
    local_model: true
    role: chief orchestrator
    prompt: You speak for the team.
  - name: analyst
    local_model: true
    role: systems analyst
vote_weights:
  analyst: 0.7
engine:
  phase_deadline_secs: 5
  call_deadline_secs: 5
  session_deadline_secs: 20
";

#[tokio::test]
async fn config_file_drives_a_full_session() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{TEAM_YAML}").unwrap();
    let config = quorum_config::load(Some(file.path())).unwrap();
    assert_eq!(config.slots.len(), 2);
    assert_eq!(config.weight("analyst"), 0.7);

    let client = ScriptedChatClient::new();
    client.script(
        "dexter",
        vec![
            ScriptStep::Reply("proposal".into()),
            ScriptStep::Reply("the final word".into()),
            ScriptStep::Reply("analyst".into()),
        ],
    );
    client.script(
        "analyst",
        vec![
            ScriptStep::Reply("peer proposal".into()),
            ScriptStep::Reply("peer refinement".into()),
            ScriptStep::Reply("dexter".into()),
        ],
    );

    let bus = Arc::new(EventBus::new(
        config.engine.bus_capacity,
        config.engine.max_subscribers,
    ));
    let store = Arc::new(CollabStore::new(bus.clone(), config.engine.log_retention));
    let registry = Arc::new(SessionRegistry::new(config.engine.max_sessions));
    let skills_dir = tempfile::tempdir().unwrap();
    let skills = Arc::new(SkillLibrary::open(skills_dir.path()).unwrap());
    let engine = Engine::new(
        SharedConfig::new(config),
        store.clone(),
        Arc::new(client),
        registry,
        Arc::new(ProcessSandbox::new("python3")),
        skills,
    );

    // A live bus subscriber sees the session's events as they happen.
    let mut subscription = bus.subscribe().unwrap();

    let outcome = engine
        .run_session("summarize the design", None, None)
        .await
        .unwrap();
    assert_eq!(outcome.reply, "the final word");
    assert_eq!(outcome.winner.as_deref(), Some("analyst"));

    // The subscriber observed the meta start event first.
    let first = subscription.recv().await.unwrap();
    assert_eq!(first.event, "session.start");
    assert_eq!(first.session, outcome.session_id);

    // Pull API agrees with the push API.
    let head = store.head("dexter", 1);
    assert_eq!(head[0].event, "vote.ok");
}
