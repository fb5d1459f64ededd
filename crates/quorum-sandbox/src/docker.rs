// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{cap_output, harness, judge, Limits, SandboxError, SandboxReport, SandboxRunner};

/// Container back-end: the skill runs in a throwaway Docker container with
/// the network disabled, a read-only root, a memory cap, and the source
/// mounted read-only.  Requires a working `docker` on the host.
pub struct DockerSandbox {
    image: String,
}

impl DockerSandbox {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    /// Arguments for one run; split out so the invocation is testable
    /// without Docker installed.
    fn run_args(&self, skill_dir: &str, memory_bytes: u64) -> Vec<String> {
        vec![
            "run".into(),
            "--rm".into(),
            "-i".into(),
            "--network".into(),
            "none".into(),
            "--memory".into(),
            format!("{}m", memory_bytes / (1024 * 1024)),
            "--read-only".into(),
            "--tmpfs".into(),
            "/tmp".into(),
            "-v".into(),
            format!("{skill_dir}:/skill:ro"),
            self.image.clone(),
            "python3".into(),
            "/skill/skill.py".into(),
        ]
    }
}

#[async_trait]
impl SandboxRunner for DockerSandbox {
    async fn run(
        &self,
        source: &str,
        entry: &str,
        input: &str,
        limits: &Limits,
    ) -> Result<SandboxReport, SandboxError> {
        let scratch = tempfile::tempdir()?;
        std::fs::write(scratch.path().join("skill.py"), harness(source, entry))?;

        let skill_dir = scratch.path().display().to_string();
        debug!(entry, image = %self.image, "docker sandbox run");

        let mut cmd = Command::new("docker");
        cmd.args(self.run_args(&skill_dir, limits.memory_bytes))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            drop(stdin);
        }

        let waited = tokio::time::timeout(limits.wall_timeout, child.wait_with_output()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match waited {
            Ok(Ok(output)) => {
                let stdout = cap_output(&output.stdout, limits.stdout_cap);
                let stderr = cap_output(&output.stderr, limits.stdout_cap);
                let exit_code = output.status.code().unwrap_or(-1);
                Ok(SandboxReport {
                    ok: judge(exit_code, false, &stdout),
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms,
                })
            }
            Ok(Err(e)) => Err(SandboxError::Io(e)),
            Err(_) => Ok(SandboxReport {
                ok: false,
                stdout: String::new(),
                stderr: format!("[timeout after {:?}]", limits.wall_timeout),
                exit_code: -1,
                duration_ms,
            }),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
