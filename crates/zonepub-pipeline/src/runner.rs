//! External command execution with timeouts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use zonepub_core::CollaboratorError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout_secs}s")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    /// Map onto the collaborator error of `operation`.
    pub fn into_collaborator(self, operation: &str) -> CollaboratorError {
        match self {
            CommandError::TimedOut { timeout_secs, .. } => CollaboratorError::TimedOut {
                operation: operation.to_string(),
                timeout_secs,
            },
            other => CollaboratorError::failed(operation, other),
        }
    }
}

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,

    /// Exit code, -1 if killed by a signal.
    pub exit_code: i32,

    /// Raw stdout; zone content read through git must survive unmodified.
    pub stdout: Vec<u8>,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Combined, trimmed stderr and stdout for diagnostics.
    pub fn message(&self) -> String {
        let stdout = self.stdout_lossy();
        let parts: Vec<&str> = [self.stderr.trim(), stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            format!("{} exited with code {}", self.program, self.exit_code)
        } else {
            parts.join("\n")
        }
    }
}

/// Runs argument vectors, optionally in a working directory, with a timeout.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub async fn run(&self, argv: &[String]) -> Result<CommandOutput, CommandError> {
        let start = Instant::now();
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| CommandError::TimedOut {
                    program: program.clone(),
                    timeout_secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| CommandError::Wait {
            program: program.clone(),
            source,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            program = %program,
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms,
            "command finished"
        );

        Ok(CommandOutput {
            program: program.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms,
            success: output.status.success(),
        })
    }
}

/// Substitute `{name}` placeholders in every argument of `template`.
pub fn expand(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn expand_replaces_placeholders() {
        let expanded = expand(
            &argv(&["kzonecheck", "-o", "{zone}", "{path}"]),
            &[("zone", "example.com"), ("path", "/b/zones/example.com.zone")],
        );
        assert_eq!(
            expanded,
            argv(&["kzonecheck", "-o", "example.com", "/b/zones/example.com.zone"])
        );
    }

    #[test]
    fn message_falls_back_to_exit_code() {
        let output = CommandOutput {
            program: "knotc".to_string(),
            exit_code: 1,
            stdout: Vec::new(),
            stderr: "  ".to_string(),
            duration_ms: 1,
            success: false,
        };
        assert_eq!(output.message(), "knotc exited with code 1");
    }

    #[tokio::test]
    async fn runs_simple_command() {
        let output = CommandRunner::new().run(&argv(&["echo", "hello"])).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout_lossy().trim(), "hello");
    }

    #[tokio::test]
    async fn failing_command_is_not_an_error() {
        let output = CommandRunner::new().run(&argv(&["false"])).await.unwrap();
        assert!(!output.success);
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn empty_and_missing_commands_error() {
        assert!(matches!(CommandRunner::new().run(&[]).await, Err(CommandError::Empty)));
        assert!(matches!(
            CommandRunner::new()
                .run(&argv(&["zonepub-definitely-not-installed"]))
                .await,
            Err(CommandError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn timeout_maps_to_collaborator_timeout() {
        let err = CommandRunner::new()
            .with_timeout(Some(Duration::from_millis(50)))
            .run(&argv(&["sleep", "5"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(matches!(
            err.into_collaborator("reload"),
            CollaboratorError::TimedOut { .. }
        ));
    }
}
