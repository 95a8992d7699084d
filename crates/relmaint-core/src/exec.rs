//! External command execution.
//!
//! Every version-control and shell operation goes through a [`CommandRunner`]
//! so that callers can substitute a recording fake in tests.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Structured failure of an external command.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("failed to run `{command}`: {detail}")]
    Spawn { command: String, detail: String },

    #[error("`{command}` exited with {} in {cwd}: {}", display_code(*code), stderr.trim())]
    Failed {
        command: String,
        cwd: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl ExecError {
    /// Exit code of a command that ran to completion, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            Self::Spawn { .. } => None,
        }
    }
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

/// Runs a program in a working directory and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String, ExecError>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String, ExecError> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(%command, cwd = %cwd.display(), "exec");

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| ExecError::Spawn {
                command: command.clone(),
                detail: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(ExecError::Failed {
                command,
                cwd: cwd.display().to_string(),
                code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_runner_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = SystemRunner
            .run("git", &["--version"], dir.path())
            .await
            .unwrap();
        assert!(out.starts_with("git version"));
    }

    #[tokio::test]
    async fn system_runner_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemRunner
            .run("git", &["rev-parse", "HEAD"], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Failed { .. }));
        assert!(err.code().is_some());
        assert!(err.to_string().contains("git rev-parse HEAD"));
    }

    #[tokio::test]
    async fn system_runner_reports_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemRunner
            .run("definitely-not-a-real-binary-relmaint", &[], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert_eq!(err.code(), None);
    }
}
