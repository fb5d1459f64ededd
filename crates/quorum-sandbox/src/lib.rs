// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Isolated execution of candidate skills.
//!
//! A skill is a unit of source code with a single entry operation of shape
//! `entry(message: string) -> string`.  Before a skill is promoted into the
//! library it must run here and be judged: `ok` means exit code 0 within the
//! wall-clock limit with output on stdout.
//!
//! Two back-ends satisfy the same contract: a subprocess with resource
//! limits ([`ProcessSandbox`]) and a Docker container with the network
//! disabled ([`DockerSandbox`]).  The engine depends only on the
//! [`SandboxRunner`] trait.

mod docker;
mod process;

use std::time::Duration;

use async_trait::async_trait;
use quorum_config::SandboxConfig;
use thiserror::Error;

pub use docker::DockerSandbox;
pub use process::ProcessSandbox;

/// Marker appended where captured output was cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sandbox spawn failed: {0}")]
    Spawn(String),
}

/// Resource limits for one skill run.
#[derive(Debug, Clone)]
pub struct Limits {
    pub wall_timeout: Duration,
    pub memory_bytes: u64,
    pub stdout_cap: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            wall_timeout: Duration::from_secs(10),
            memory_bytes: 256 * 1024 * 1024,
            stdout_cap: 1024 * 1024,
        }
    }
}

impl Limits {
    pub fn from_config(cfg: &SandboxConfig) -> Self {
        Self {
            wall_timeout: Duration::from_secs(cfg.wall_timeout_secs),
            memory_bytes: cfg.memory_limit_mib * 1024 * 1024,
            stdout_cap: cfg.stdout_cap_bytes,
        }
    }
}

/// Outcome of one sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxReport {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Execute `source`, invoking `entry(input)`, under `limits`.
    ///
    /// An `Err` is an infrastructure failure (could not write or spawn);
    /// a skill that crashes, times out, or prints nothing is a normal
    /// `Ok(report)` with `ok == false`.
    async fn run(
        &self,
        source: &str,
        entry: &str,
        input: &str,
        limits: &Limits,
    ) -> Result<SandboxReport, SandboxError>;
}

/// Build the configured back-end.
pub fn from_config(cfg: &SandboxConfig) -> std::sync::Arc<dyn SandboxRunner> {
    if cfg.use_docker {
        std::sync::Arc::new(DockerSandbox::new(
            cfg.docker_image
                .clone()
                .unwrap_or_else(|| "python:3-alpine".into()),
        ))
    } else {
        std::sync::Arc::new(ProcessSandbox::new(cfg.interpreter.clone()))
    }
}

/// Judge a finished run: pass iff it exited 0 inside the limit and produced
/// stdout.
pub(crate) fn judge(exit_code: i32, timed_out: bool, stdout: &str) -> bool {
    !timed_out && exit_code == 0 && !stdout.trim().is_empty()
}

/// Cap captured output, marking the cut.
pub(crate) fn cap_output(raw: &[u8], cap: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= cap {
        return text.into_owned();
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

/// Skill source plus the harness that reads the input message from stdin,
/// calls the entry operation, and prints its result.
pub(crate) fn harness(source: &str, entry: &str) -> String {
    format!(
        "{source}\n\n\
         if __name__ == \"__main__\":\n\
         \x20   import sys\n\
         \x20   _message = sys.stdin.read()\n\
         \x20   _result = {entry}(_message)\n\
         \x20   sys.stdout.write(\"\" if _result is None else str(_result))\n"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Judgement ─────────────────────────────────────────────────────────────

    #[test]
    fn judge_requires_exit_zero_and_output() {
        assert!(judge(0, false, "result"));
        assert!(!judge(1, false, "result"));
        assert!(!judge(0, true, "result"));
        assert!(!judge(0, false, ""));
        assert!(!judge(0, false, "   \n"));
    }

    // ── Output capping ────────────────────────────────────────────────────────

    #[test]
    fn cap_output_passes_short_output_through() {
        assert_eq!(cap_output(b"hello", 1024), "hello");
    }

    #[test]
    fn cap_output_truncates_with_marker() {
        let out = cap_output(b"abcdefgh", 4);
        assert!(out.starts_with("abcd"));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn cap_output_respects_char_boundaries() {
        let s = "héllo wörld".as_bytes();
        // A cap landing inside a multi-byte char must back off, not panic.
        for cap in 0..s.len() {
            let _ = cap_output(s, cap);
        }
    }

    // ── Harness ───────────────────────────────────────────────────────────────

    #[test]
    fn harness_appends_entry_invocation() {
        let h = harness("def greet(message):\n    return 'hi ' + message", "greet");
        assert!(h.contains("def greet"));
        assert!(h.contains("_result = greet(_message)"));
        assert!(h.contains("sys.stdin.read()"));
    }

    // ── Limits ────────────────────────────────────────────────────────────────

    #[test]
    fn default_limits_match_contract() {
        let l = Limits::default();
        assert_eq!(l.wall_timeout, Duration::from_secs(10));
        assert_eq!(l.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(l.stdout_cap, 1024 * 1024);
    }

    #[test]
    fn limits_from_config() {
        let cfg = SandboxConfig {
            wall_timeout_secs: 3,
            memory_limit_mib: 64,
            stdout_cap_bytes: 100,
            ..SandboxConfig::default()
        };
        let l = Limits::from_config(&cfg);
        assert_eq!(l.wall_timeout, Duration::from_secs(3));
        assert_eq!(l.memory_bytes, 64 * 1024 * 1024);
        assert_eq!(l.stdout_cap, 100);
    }
}
