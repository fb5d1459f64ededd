// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of the distinguished chief-orchestrator slot.  A config without an
/// enabled slot of this name cannot run a collaboration session.
pub const CHIEF_SLOT: &str = "dexter";

/// Reserved virtual slot name used by the engine for orchestrator meta-events
/// (`session.start`, `vote.tally`, …).  A user-defined slot may not take it.
pub const SESSION_SLOT: &str = "session";

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for enabled-by-default
/// fields.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The collaboration team.  One entry per slot; order is not significant.
    /// A slot named `dexter` must be present and enabled.
    #[serde(default = "default_slots")]
    pub slots: Vec<SlotConfig>,
    /// Voting weight per slot name.  Slots absent from the map weigh 1.0.
    /// Weights are nonnegative and need not sum to 1.
    #[serde(default)]
    pub vote_weights: HashMap<String, f64>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            vote_weights: HashMap::new(),
            engine: EngineConfig::default(),
            server: ServerConfig::default(),
            sandbox: SandboxConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Default team: a single local dexter slot.  A bare `quorum serve` with no
/// config file starts an Ollama-backed one-slot team.
fn default_slots() -> Vec<SlotConfig> {
    vec![SlotConfig {
        name: CHIEF_SLOT.into(),
        local_model: true,
        identity: "Dexter, chief orchestrator".into(),
        role: "chief orchestrator".into(),
        prompt: "You are the chief orchestrator of a team of models. \
                 You speak for the team; your answer is the one the user sees."
            .into(),
        ..SlotConfig::default()
    }]
}

impl Config {
    /// Look up a slot by name.
    pub fn slot(&self, name: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Slots that take part in collaboration sessions.
    pub fn collaboration_slots(&self) -> impl Iterator<Item = &SlotConfig> {
        self.slots
            .iter()
            .filter(|s| s.enabled && s.collaboration_enabled)
    }

    /// Voting weight for a slot; absent names weigh 1.0.
    pub fn weight(&self, slot: &str) -> f64 {
        self.vote_weights.get(slot).copied().unwrap_or(1.0)
    }

    /// Validate structural invariants.
    ///
    /// Returns warnings (non-fatal findings such as weight entries that name
    /// no configured slot) on success, an error on any violated invariant:
    /// missing/disabled dexter, a slot taking the reserved `session` name,
    /// duplicate or non-lowercase slot names, sampling parameters out of
    /// range, or negative vote weights.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        let chief = self
            .slot(CHIEF_SLOT)
            .ok_or_else(|| anyhow::anyhow!("config: required slot {CHIEF_SLOT:?} is missing"))?;
        if !chief.enabled || !chief.collaboration_enabled {
            anyhow::bail!("config: required slot {CHIEF_SLOT:?} is disabled");
        }

        let mut seen = std::collections::HashSet::new();
        for slot in &self.slots {
            if slot.name == SESSION_SLOT {
                anyhow::bail!("config: slot name {SESSION_SLOT:?} is reserved for the engine");
            }
            if slot.name != slot.name.to_lowercase() {
                anyhow::bail!("config: slot name {:?} must be lowercase", slot.name);
            }
            if !seen.insert(slot.name.as_str()) {
                anyhow::bail!("config: duplicate slot name {:?}", slot.name);
            }
            slot.params
                .validate()
                .map_err(|e| anyhow::anyhow!("config: slot {:?}: {e}", slot.name))?;
        }

        let mut warnings = Vec::new();
        for (name, w) in &self.vote_weights {
            if *w < 0.0 {
                anyhow::bail!("config: vote weight for {name:?} is negative ({w})");
            }
            if self.slot(name).is_none() {
                warnings.push(format!("vote weight names unknown slot {name:?}; ignored"));
            }
        }
        Ok(warnings)
    }
}

/// One configured LLM participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    /// Unique, stable, lowercase identifier.
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Wire protocol spoken by the endpoint.
    #[serde(default)]
    pub provider: Provider,
    /// Absolute URL of the chat resource base.  When unset and `local_model`
    /// is true, the local endpoint default applies.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Provider-specific model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.  The key value
    /// itself is never persisted in config and never logged.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// When true, `api_key_env` is ignored and `endpoint` defaults to the
    /// local model endpoint.
    #[serde(default)]
    pub local_model: bool,
    /// Free-text identity shown to peers ("Ava, systems analyst").
    #[serde(default)]
    pub identity: String,
    /// Free-text role used in phase prompts ("systems analyst").
    #[serde(default)]
    pub role: String,
    /// System prompt sent on every call for this slot.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub params: SamplingParams,
    /// If false the slot is never dispatched into a session.
    #[serde(default = "default_true")]
    pub collaboration_enabled: bool,
    /// Opaque identifier for the slot's log namespace.  Defaults to the slot
    /// name when empty.
    #[serde(default)]
    pub collaboration_directory: String,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            provider: Provider::default(),
            endpoint: None,
            model: default_model(),
            api_key_env: None,
            local_model: false,
            identity: String::new(),
            role: String::new(),
            prompt: String::new(),
            params: SamplingParams::default(),
            collaboration_enabled: true,
            collaboration_directory: String::new(),
        }
    }
}

impl SlotConfig {
    /// Effective log namespace: `collaboration_directory` or the slot name.
    pub fn log_namespace(&self) -> &str {
        if self.collaboration_directory.is_empty() {
            &self.name
        } else {
            &self.collaboration_directory
        }
    }

    /// Effective endpoint URL, applying the local-model default.
    pub fn effective_endpoint(&self) -> String {
        match &self.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None if self.local_model => default_local_endpoint(),
            None => String::new(),
        }
    }
}

fn default_model() -> String {
    "llama3.2".into()
}

fn default_local_endpoint() -> String {
    "http://127.0.0.1:11434".into()
}

/// Wire protocol families recognised by the LLM client.  Unknown values are
/// rejected at load time by serde.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    #[default]
    OpenaiCompatible,
    Anthropic,
    Ollama,
    CustomOpenaiCompatible,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenaiCompatible => write!(f, "openai-compatible"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::Ollama => write!(f, "ollama"),
            Provider::CustomOpenaiCompatible => write!(f, "custom-openai-compatible"),
        }
    }
}

/// Sampling knobs forwarded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingParams {
    #[serde(default = "SamplingParams::default_temperature")]
    pub temperature: f32,
    #[serde(default = "SamplingParams::default_top_p")]
    pub top_p: f32,
    #[serde(default = "SamplingParams::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "SamplingParams::default_context_length")]
    pub context_length: u32,
}

impl SamplingParams {
    fn default_temperature() -> f32 {
        0.7
    }
    fn default_top_p() -> f32 {
        1.0
    }
    fn default_max_tokens() -> u32 {
        4096
    }
    fn default_context_length() -> u32 {
        8192
    }

    /// Range-check every knob.  The ranges are the provider-API contracts:
    /// temperature 0–2, top_p 0–1, penalties −2–2, counts strictly positive.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature {} out of [0, 2]", self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(format!("top_p {} out of [0, 1]", self.top_p));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be positive".into());
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(format!(
                "frequency_penalty {} out of [-2, 2]",
                self.frequency_penalty
            ));
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(format!(
                "presence_penalty {} out of [-2, 2]",
                self.presence_penalty
            ));
        }
        if self.context_length == 0 {
            return Err("context_length must be positive".into());
        }
        Ok(())
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: Self::default_temperature(),
            top_p: Self::default_top_p(),
            max_tokens: Self::default_max_tokens(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            context_length: Self::default_context_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-phase barrier deadline in seconds.  Slots still running when it
    /// elapses are cancelled and counted as failed for the phase.
    #[serde(default = "EngineConfig::default_phase_deadline_secs")]
    pub phase_deadline_secs: u64,
    /// Per-LLM-call deadline in seconds.  Independent of the phase deadline;
    /// the stricter one wins.
    #[serde(default = "EngineConfig::default_call_deadline_secs")]
    pub call_deadline_secs: u64,
    /// Hard per-session deadline in seconds, after which the session fails
    /// with whatever answer has accumulated.
    #[serde(default = "EngineConfig::default_session_deadline_secs")]
    pub session_deadline_secs: u64,
    /// Maximum concurrent live sessions; creation beyond the cap is refused
    /// with a busy error.
    #[serde(default = "EngineConfig::default_max_sessions")]
    pub max_sessions: usize,
    /// Maximum concurrent in-flight LLM calls per slot; excess calls queue.
    #[serde(default = "EngineConfig::default_max_inflight_per_slot")]
    pub max_inflight_per_slot: usize,
    /// Event-bus channel capacity.  A subscriber that falls further behind
    /// loses its oldest undelivered events.
    #[serde(default = "EngineConfig::default_bus_capacity")]
    pub bus_capacity: usize,
    /// Maximum concurrent event-bus subscribers.
    #[serde(default = "EngineConfig::default_max_subscribers")]
    pub max_subscribers: usize,
    /// Maximum events retained per (slot, session) log when running without
    /// persistence; older events are dropped behind a `log.truncated` marker.
    #[serde(default = "EngineConfig::default_log_retention")]
    pub log_retention: usize,
}

impl EngineConfig {
    fn default_phase_deadline_secs() -> u64 {
        90
    }
    fn default_call_deadline_secs() -> u64 {
        120
    }
    fn default_session_deadline_secs() -> u64 {
        600
    }
    fn default_max_sessions() -> usize {
        32
    }
    fn default_max_inflight_per_slot() -> usize {
        4
    }
    fn default_bus_capacity() -> usize {
        1024
    }
    fn default_max_subscribers() -> usize {
        64
    }
    fn default_log_retention() -> usize {
        1024
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_deadline_secs: Self::default_phase_deadline_secs(),
            call_deadline_secs: Self::default_call_deadline_secs(),
            session_deadline_secs: Self::default_session_deadline_secs(),
            max_sessions: Self::default_max_sessions(),
            max_inflight_per_slot: Self::default_max_inflight_per_slot(),
            bus_capacity: Self::default_bus_capacity(),
            max_subscribers: Self::default_max_subscribers(),
            log_retention: Self::default_log_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address for the HTTP surface.
    #[serde(default = "ServerConfig::default_bind")]
    pub bind: String,
}

impl ServerConfig {
    fn default_bind() -> String {
        "127.0.0.1:8787".into()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Interpreter used by the process back-end.
    #[serde(default = "SandboxConfig::default_interpreter")]
    pub interpreter: String,
    /// Use a Docker container instead of a plain subprocess.
    #[serde(default)]
    pub use_docker: bool,
    /// Docker image to use when `use_docker` is true.
    #[serde(default)]
    pub docker_image: Option<String>,
    /// Wall-clock timeout for one skill run, in seconds.
    #[serde(default = "SandboxConfig::default_wall_timeout_secs")]
    pub wall_timeout_secs: u64,
    /// Address-space cap for the skill process, in MiB.
    #[serde(default = "SandboxConfig::default_memory_limit_mib")]
    pub memory_limit_mib: u64,
    /// Captured-stdout cap in bytes; output beyond it is truncated with a
    /// marker.  Installation-wide, not per skill.
    #[serde(default = "SandboxConfig::default_stdout_cap_bytes")]
    pub stdout_cap_bytes: usize,
    /// Directory holding the skill library.  Defaults to
    /// `<data_dir>/quorum/skills`.
    #[serde(default)]
    pub skills_dir: Option<String>,
}

impl SandboxConfig {
    fn default_interpreter() -> String {
        "python3".into()
    }
    fn default_wall_timeout_secs() -> u64 {
        10
    }
    fn default_memory_limit_mib() -> u64 {
        256
    }
    fn default_stdout_cap_bytes() -> usize {
        1024 * 1024
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: Self::default_interpreter(),
            use_docker: false,
            docker_image: None,
            wall_timeout_secs: Self::default_wall_timeout_secs(),
            memory_limit_mib: Self::default_memory_limit_mib(),
            stdout_cap_bytes: Self::default_stdout_cap_bytes(),
            skills_dir: None,
        }
    }
}

/// Optional event-log persistence.  The engine never depends on it for
/// correctness; when `root` is unset the store is in-memory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Root directory for append-only JSONL event logs, one file per
    /// (slot, session).
    #[serde(default)]
    pub root: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn default_config_has_enabled_dexter() {
        let c = Config::default();
        let chief = c.slot(CHIEF_SLOT).expect("dexter present");
        assert!(chief.enabled);
        assert!(chief.collaboration_enabled);
        assert!(chief.local_model);
    }

    #[test]
    fn default_config_validates_without_warnings() {
        let warnings = Config::default().validate().unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn default_weight_is_one() {
        let c = Config::default();
        assert_eq!(c.weight("nonexistent"), 1.0);
    }

    #[test]
    fn default_engine_deadlines() {
        let e = EngineConfig::default();
        assert_eq!(e.phase_deadline_secs, 90);
        assert_eq!(e.call_deadline_secs, 120);
        assert_eq!(e.session_deadline_secs, 600);
        assert_eq!(e.max_sessions, 32);
    }

    #[test]
    fn local_slot_endpoint_defaults() {
        let s = SlotConfig {
            local_model: true,
            ..SlotConfig::default()
        };
        assert_eq!(s.effective_endpoint(), "http://127.0.0.1:11434");
    }

    #[test]
    fn explicit_endpoint_wins_and_is_trimmed() {
        let s = SlotConfig {
            endpoint: Some("https://api.example.com/v1/".into()),
            ..SlotConfig::default()
        };
        assert_eq!(s.effective_endpoint(), "https://api.example.com/v1");
    }

    #[test]
    fn log_namespace_falls_back_to_name() {
        let mut s = SlotConfig {
            name: "analyst".into(),
            ..SlotConfig::default()
        };
        assert_eq!(s.log_namespace(), "analyst");
        s.collaboration_directory = "analyst-logs".into();
        assert_eq!(s.log_namespace(), "analyst-logs");
    }

    // ── Validation ───────────────────────────────────────────────────────────

    #[test]
    fn missing_dexter_is_rejected() {
        let c = Config {
            slots: vec![SlotConfig {
                name: "analyst".into(),
                ..SlotConfig::default()
            }],
            ..Config::default()
        };
        let err = c.validate().unwrap_err().to_string();
        assert!(err.contains("dexter"), "{err}");
    }

    #[test]
    fn disabled_dexter_is_rejected() {
        let mut c = Config::default();
        c.slots[0].enabled = false;
        assert!(c.validate().is_err());
    }

    #[test]
    fn reserved_session_slot_name_is_rejected() {
        let mut c = Config::default();
        c.slots.push(SlotConfig {
            name: SESSION_SLOT.into(),
            ..SlotConfig::default()
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn uppercase_slot_name_is_rejected() {
        let mut c = Config::default();
        c.slots.push(SlotConfig {
            name: "Analyst".into(),
            ..SlotConfig::default()
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn duplicate_slot_name_is_rejected() {
        let mut c = Config::default();
        c.slots.push(c.slots[0].clone());
        assert!(c.validate().is_err());
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut c = Config::default();
        c.slots[0].params.temperature = 2.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_max_tokens_is_rejected() {
        let mut c = Config::default();
        c.slots[0].params.max_tokens = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut c = Config::default();
        c.vote_weights.insert(CHIEF_SLOT.into(), -0.5);
        assert!(c.validate().is_err());
    }

    #[test]
    fn unknown_weight_slot_is_a_warning_not_an_error() {
        let mut c = Config::default();
        c.vote_weights.insert("ghost".into(), 0.5);
        let warnings = c.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("ghost"));
    }

    // ── Serde ────────────────────────────────────────────────────────────────

    #[test]
    fn provider_kebab_case_round_trip() {
        for (p, s) in [
            (Provider::OpenaiCompatible, "openai-compatible"),
            (Provider::Anthropic, "anthropic"),
            (Provider::Ollama, "ollama"),
            (Provider::CustomOpenaiCompatible, "custom-openai-compatible"),
        ] {
            let yaml = serde_yaml::to_string(&p).unwrap();
            assert_eq!(yaml.trim(), s);
            let back: Provider = serde_yaml::from_str(s).unwrap();
            assert_eq!(back, p);
        }
    }

    #[test]
    fn unknown_provider_is_rejected_at_load() {
        let res: Result<Provider, _> = serde_yaml::from_str("bedrock");
        assert!(res.is_err());
    }

    #[test]
    fn unknown_slot_field_is_rejected_at_load() {
        let yaml = "name: dexter\nshoe_size: 42\n";
        let res: Result<SlotConfig, _> = serde_yaml::from_str(yaml);
        assert!(res.is_err(), "unknown fields must be rejected");
    }

    #[test]
    fn config_yaml_round_trip_preserves_semantic_fields() {
        let mut c = Config::default();
        c.vote_weights.insert(CHIEF_SLOT.into(), 1.5);
        c.engine.phase_deadline_secs = 45;
        c.slots[0].params.temperature = 0.3;
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.weight(CHIEF_SLOT), 1.5);
        assert_eq!(back.engine.phase_deadline_secs, 45);
        assert_eq!(back.slots[0].params.temperature, 0.3);
    }

    #[test]
    fn partial_slot_yaml_fills_defaults() {
        let yaml = "name: engineer\nrole: software engineer\n";
        let s: SlotConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(s.enabled);
        assert!(s.collaboration_enabled);
        assert_eq!(s.provider, Provider::OpenaiCompatible);
        assert_eq!(s.params.max_tokens, 4096);
    }

    #[test]
    fn sampling_params_boundaries_are_inclusive() {
        let p = SamplingParams {
            temperature: 2.0,
            top_p: 0.0,
            frequency_penalty: -2.0,
            presence_penalty: 2.0,
            ..SamplingParams::default()
        };
        assert!(p.validate().is_ok());
    }
}
