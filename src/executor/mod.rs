//! Command execution abstractions and implementations.
//!
//! Everything that spawns an external process goes through a
//! [`CommandRunner`]. Production code uses [`process::ProcessRunner`];
//! tests substitute a scripted runner.

use async_trait::async_trait;

pub mod process;

/// Exit status reported when the process produced no exit code
/// (terminated by a signal).
pub const SIGNALED_EXIT_STATUS: i32 = -1;

/// Result of one external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    /// Process exit status. Zero means success.
    pub exit_status: i32,
    /// Captured stdout text.
    pub stdout: String,
    /// Captured stderr text.
    pub stderr: String,
}

impl CommandResult {
    /// Build a successful result carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Build a failed result carrying `stderr`.
    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the command exited with status 0.
    ///
    /// Output is never consulted: helpers print warnings on success and
    /// may print nothing on failure.
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Text to show for a failed command: stderr when present, otherwise stdout.
    pub fn error_text(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Errors produced by runners before a [`CommandResult`] exists.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The argument vector was empty.
    #[error("refusing to run an empty command")]
    EmptyCommand,
    /// The process could not be spawned or waited on.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Process spawning seam.
///
/// Implementations run exactly one external process per call and report
/// its exit status and captured output. Calls block (await) until the
/// process exits; there is no timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with the remaining elements as arguments.
    async fn run(&self, argv: &[String]) -> Result<CommandResult, ExecutorError>;
}
