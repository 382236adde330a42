//! Host process runner backed by `tokio::process`.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use super::{CommandResult, CommandRunner, ExecutorError, SIGNALED_EXIT_STATUS};

/// Runs commands directly on the host.
///
/// Arguments are passed as a vector, never through a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a host process runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<CommandResult, ExecutorError> {
        let (program, args) = argv.split_first().ok_or(ExecutorError::EmptyCommand)?;

        debug!(program = %program, args = ?args, "spawning command");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecutorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let exit_status = output.status.code().unwrap_or(SIGNALED_EXIT_STATUS);
        debug!(program = %program, exit_status, "command finished");

        Ok(CommandResult {
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
