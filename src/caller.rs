//! Privileged helper boundary.
//!
//! This is the only place that spawns processes. Every query and mutation
//! runs the helper program once (behind the elevation prefix), so the
//! authentication prompt is tied to the helper rather than to each
//! underlying AppArmor tool.
//!
//! Queries used for display (`status`, `unconfined`, `logs`) never fail:
//! a spawn error or non-zero exit yields a fallback value. Mutations return
//! the helper's own error text so the caller can show it.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::executor::process::ProcessRunner;
use crate::executor::{CommandResult, CommandRunner, ExecutorError};
use crate::profile::{
    self, Abstractions, ProfileError, ProfileMap, ProfileMode, DEFAULT_ABSTRACTIONS_DIR,
    DEFAULT_PROFILE_DIRS,
};

/// Helper flag: query profile and process status.
const FLAG_STATUS: &str = "-s";
/// Helper flag: list unconfined processes.
const FLAG_UNCONFINED: &str = "-u";
/// Helper flag: fetch audit log entries after a checkpoint.
const FLAG_LOGS: &str = "-l";
/// Helper flag: switch a profile between modes.
const FLAG_CHANGE: &str = "-c";
/// Helper flag: load a profile file in enforce mode.
const FLAG_LOAD: &str = "-a";
/// Helper flag: disable a loaded profile.
const FLAG_DISABLE: &str = "-d";

/// Opaque audit read position handed out by the helper.
///
/// Empty means "read from the beginning".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Checkpoint(String);

impl Checkpoint {
    /// Checkpoint that requests the full history.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a token produced by the helper.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_owned())
    }

    /// Whether no position has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the helper is invoked: an optional elevation program followed by the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    /// Elevation wrapper such as `pkexec`; `None` runs the helper directly.
    pub elevate: Option<String>,
    /// Helper program.
    pub program: String,
}

impl Default for HelperCommand {
    fn default() -> Self {
        Self {
            elevate: Some("pkexec".to_owned()),
            program: "aa-caller".to_owned(),
        }
    }
}

impl HelperCommand {
    /// Full argument vector for one helper call.
    pub fn argv(&self, flag: &str, args: &[&str]) -> Vec<String> {
        self.elevate
            .iter()
            .cloned()
            .chain(std::iter::once(self.program.clone()))
            .chain(std::iter::once(flag.to_owned()))
            .chain(args.iter().map(|a| (*a).to_owned()))
            .collect()
    }
}

/// Failure of a user-requested mutation.
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    /// The helper ran and exited non-zero; `message` is its output verbatim.
    #[error("{message}")]
    Rejected {
        /// Helper exit status.
        exit_status: i32,
        /// Helper error text.
        message: String,
    },
    /// The helper could not be run.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// The helper cannot switch to or from this mode.
    #[error("cannot switch profile '{profile}' to or from mode '{mode}'")]
    UnsupportedMode {
        /// Profile being changed.
        profile: String,
        /// Offending mode.
        mode: ProfileMode,
    },
}

/// Typed operations over the privileged helper.
#[derive(Debug, Clone)]
pub struct CommandCaller<R = ProcessRunner> {
    runner: R,
    helper: HelperCommand,
    profile_dirs: Vec<PathBuf>,
    abstractions_dir: PathBuf,
}

impl CommandCaller<ProcessRunner> {
    /// Caller that spawns real processes.
    pub fn new(helper: HelperCommand) -> Self {
        Self::with_runner(ProcessRunner::new(), helper)
    }
}

impl<R: CommandRunner> CommandCaller<R> {
    /// Caller using an injected runner, with default search directories.
    pub fn with_runner(runner: R, helper: HelperCommand) -> Self {
        Self {
            runner,
            helper,
            profile_dirs: DEFAULT_PROFILE_DIRS.iter().map(PathBuf::from).collect(),
            abstractions_dir: PathBuf::from(DEFAULT_ABSTRACTIONS_DIR),
        }
    }

    /// Replace the profile search directories.
    pub fn with_profile_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.profile_dirs = dirs;
        self
    }

    /// Replace the abstractions directory.
    pub fn with_abstractions_dir(mut self, dir: PathBuf) -> Self {
        self.abstractions_dir = dir;
        self
    }

    /// Injected runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Configured profile search directories, in priority order.
    pub fn profile_dirs(&self) -> &[PathBuf] {
        &self.profile_dirs
    }

    /// Raw status output, or `""` when the helper fails.
    pub async fn get_status(&self) -> String {
        self.get_status_or("").await
    }

    /// Raw status output, or `return_on_error` when the helper fails.
    pub async fn get_status_or(&self, return_on_error: &str) -> String {
        self.call_or(FLAG_STATUS, &[], return_on_error).await
    }

    /// Raw unconfined-process listing, or `""` when the helper fails.
    pub async fn get_unconfined(&self) -> String {
        self.get_unconfined_or("").await
    }

    /// Raw unconfined-process listing, or `return_on_error` when the helper fails.
    pub async fn get_unconfined_or(&self, return_on_error: &str) -> String {
        self.call_or(FLAG_UNCONFINED, &[], return_on_error).await
    }

    /// Audit entries newer than `checkpoint`, or `""` when the helper fails.
    ///
    /// With an empty checkpoint the helper returns the whole history and
    /// the first output line is the checkpoint to use next time.
    pub async fn get_logs(&self, checkpoint: &Checkpoint) -> String {
        self.get_logs_or(checkpoint, "").await
    }

    /// Audit entries newer than `checkpoint`, or `return_on_error` when the helper fails.
    pub async fn get_logs_or(&self, checkpoint: &Checkpoint, return_on_error: &str) -> String {
        if checkpoint.is_empty() {
            self.call_or(FLAG_LOGS, &[], return_on_error).await
        } else {
            self.call_or(FLAG_LOGS, &[checkpoint.as_str()], return_on_error)
                .await
        }
    }

    /// Switch `profile` from `old_mode` to `new_mode`.
    ///
    /// Only enforce, complain and disabled are accepted. Identical modes
    /// are passed through and the helper's response returned.
    ///
    /// # Errors
    ///
    /// [`ChangeError::UnsupportedMode`] before anything runs, otherwise
    /// [`ChangeError::Rejected`] carrying the helper's error text.
    pub async fn execute_change(
        &self,
        profile: &str,
        old_mode: ProfileMode,
        new_mode: ProfileMode,
    ) -> Result<String, ChangeError> {
        let unsupported = |mode| ChangeError::UnsupportedMode {
            profile: profile.to_owned(),
            mode,
        };
        let old = old_mode.helper_arg().ok_or_else(|| unsupported(old_mode))?;
        let new = new_mode.helper_arg().ok_or_else(|| unsupported(new_mode))?;

        info!(profile = %profile, from = %old_mode, to = %new_mode, "changing profile mode");
        self.mutate(FLAG_CHANGE, &[profile, old, new]).await
    }

    /// Load the profile file at `path` in enforce mode.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeError::Rejected`] with the helper's error text.
    pub async fn load_profile(&self, path: &Path) -> Result<String, ChangeError> {
        let path = path.to_string_lossy();
        info!(path = %path, "loading profile");
        self.mutate(FLAG_LOAD, &[path.as_ref()]).await
    }

    /// Disable the profile called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeError::Rejected`] with the helper's error text.
    pub async fn disable_profile(&self, name: &str) -> Result<String, ChangeError> {
        info!(profile = %name, "disabling profile");
        self.mutate(FLAG_DISABLE, &[name]).await
    }

    /// Locate the file of profile `name` in the configured directories.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::NotFound`] when no directory contains it.
    pub fn locate_profile(&self, name: &str) -> Result<PathBuf, ProfileError> {
        profile::locate_profile(name, &self.profile_dirs)
    }

    /// Locate the file of profile `name` in `search_dirs`, tried in order.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::NotFound`] when no directory contains it.
    pub fn locate_profile_in<P: AsRef<Path>>(
        &self,
        name: &str,
        search_dirs: &[P],
    ) -> Result<PathBuf, ProfileError> {
        profile::locate_profile(name, search_dirs)
    }

    /// Abstractions in the configured directory.
    pub fn get_abstractions(&self) -> Abstractions {
        profile::abstractions(&self.abstractions_dir)
    }

    /// Abstractions under `path`; empty when the directory is absent.
    pub fn get_abstractions_at(&self, path: &Path) -> Abstractions {
        profile::abstractions(path)
    }

    /// Profiles found in the configured directories.
    pub fn get_profiles(&self) -> ProfileMap {
        profile::enumerate_profiles(&self.profile_dirs)
    }

    /// Profiles found in `search_dirs`.
    pub fn get_profiles_in<P: AsRef<Path>>(&self, search_dirs: &[P]) -> ProfileMap {
        profile::enumerate_profiles(search_dirs)
    }

    async fn call(&self, flag: &str, args: &[&str]) -> Result<CommandResult, ExecutorError> {
        let argv = self.helper.argv(flag, args);
        self.runner.run(&argv).await
    }

    async fn call_or(&self, flag: &str, args: &[&str], return_on_error: &str) -> String {
        match self.call(flag, args).await {
            Ok(result) if result.success() => result.stdout,
            Ok(result) => {
                warn!(
                    flag,
                    exit_status = result.exit_status,
                    stderr = %result.stderr.trim(),
                    "helper query failed"
                );
                return_on_error.to_owned()
            }
            Err(e) => {
                warn!(flag, error = %e, "helper query could not run");
                return_on_error.to_owned()
            }
        }
    }

    async fn mutate(&self, flag: &str, args: &[&str]) -> Result<String, ChangeError> {
        let result = self.call(flag, args).await?;
        if result.success() {
            return Ok(result.stdout);
        }
        warn!(flag, exit_status = result.exit_status, "helper rejected change");
        Err(ChangeError::Rejected {
            exit_status: result.exit_status,
            message: result.error_text().to_owned(),
        })
    }
}
