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

/// Subprocess back-end: the skill runs under an interpreter in a throwaway
/// scratch directory with a cleared environment, its own session, and an
/// address-space cap.  Isolation is OS-level best effort; use
/// [`crate::DockerSandbox`] when a network-disabled container is required.
pub struct ProcessSandbox {
    interpreter: String,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    async fn run(
        &self,
        source: &str,
        entry: &str,
        input: &str,
        limits: &Limits,
    ) -> Result<SandboxReport, SandboxError> {
        // Scratch directory: holds the skill file, serves as cwd, and is
        // discarded when this function returns.
        let scratch = tempfile::tempdir()?;
        let skill_path = scratch.path().join("skill.py");
        std::fs::write(&skill_path, harness(source, entry))?;

        debug!(entry, interpreter = %self.interpreter, "sandbox run");

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&skill_path)
            .current_dir(scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A skill must not see the orchestrator's environment (API keys
            // live there).  PATH survives so the interpreter can run.
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .kill_on_drop(true);

        // setsid() detaches the skill from the controlling terminal;
        // RLIMIT_AS enforces the memory cap at the kernel level.
        #[cfg(unix)]
        {
            let memory_bytes = limits.memory_bytes;
            unsafe {
                cmd.pre_exec(move || {
                    libc::setsid();
                    let lim = libc::rlimit {
                        rlim_cur: memory_bytes,
                        rlim_max: memory_bytes,
                    };
                    libc::setrlimit(libc::RLIMIT_AS, &lim);
                    Ok(())
                });
            }
        }

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
            // Timeout: dropping the future killed the child (kill_on_drop).
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
