// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The subprocess runner: the single place the agent spawns external
//! programs. Takes a fully-constructed argv vector, never a shell string.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Default timeout for external commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Hard ceiling for per-handler overrides (disk customization, VM import).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Environment variables forwarded to children; everything else is scrubbed.
const KEPT_ENV: &[&str] = &["PATH", "LANG"];

#[derive(Debug)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// What handlers report on a nonzero exit: stderr, falling back to stdout.
    pub fn error_message(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            self.stderr.clone()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("timeout")]
    Timeout,
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Execute `program` with `args`, capturing trimmed stdout/stderr.
///
/// The child gets a scrubbed environment and no stdin. On timeout the child
/// is killed (`kill_on_drop`) and [`ExecError::Timeout`] is returned; no
/// partial output is ever surfaced.
pub async fn run(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    let timeout = timeout.min(MAX_TIMEOUT);

    let rendered = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(cmd = %rendered, "exec");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env_clear();
    for var in KEPT_ENV {
        if let Ok(value) = std::env::var(var) {
            cmd.env(var, value);
        }
    }

    let child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?,
        // Dropping the future kills the child via kill_on_drop.
        Err(_) => return Err(ExecError::Timeout),
    };

    Ok(ExecOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_trimmed_stdout() {
        let out = run("echo", &["hello".to_string()], DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let out = run("false", &[], DEFAULT_TIMEOUT).await.unwrap();
        assert!(!out.success());
        assert_eq!(out.code, 1);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let err = run("sleep", &["30".to_string()], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout));
        assert_eq!(err.to_string(), "timeout");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run("no-such-program-xyz", &[], DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn environment_is_scrubbed() {
        std::env::set_var("BLOCKHOST_TEST_SECRET", "hunter2");
        let out = run("env", &[], DEFAULT_TIMEOUT).await.unwrap();
        std::env::remove_var("BLOCKHOST_TEST_SECRET");
        assert!(!out.stdout.contains("BLOCKHOST_TEST_SECRET"));
    }
}
