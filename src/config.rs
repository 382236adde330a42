//! Configuration loading.
//!
//! Loads `config.toml` from `$ARMATURE_CONFIG` or `~/.config/armature/`.
//! Every section has defaults, so a missing or empty file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::caller::HelperCommand;
use crate::logs::pipeline::DEFAULT_BATCH_SIZE;
use crate::profile::{DEFAULT_ABSTRACTIONS_DIR, DEFAULT_PROFILE_DIRS};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "ARMATURE_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Privileged helper invocation.
    pub helper: HelperConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Log ingestion tuning.
    pub ingest: IngestConfig,
}

/// How the privileged helper is run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Elevation program; empty runs the helper directly.
    pub elevate: String,
    /// Helper program name or path.
    pub program: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        let helper = HelperCommand::default();
        Self {
            elevate: helper.elevate.unwrap_or_default(),
            program: helper.program,
        }
    }
}

impl HelperConfig {
    /// Helper invocation described by this section.
    pub fn command(&self) -> HelperCommand {
        let elevate = self.elevate.trim();
        HelperCommand {
            elevate: (!elevate.is_empty()).then(|| elevate.to_owned()),
            program: self.program.clone(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Profile directories, in priority order.
    pub profile_dirs: Vec<PathBuf>,
    /// Abstractions directory.
    pub abstractions_dir: PathBuf,
    /// Plaintext log files read before the audit feed.
    pub log_sources: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            profile_dirs: DEFAULT_PROFILE_DIRS.iter().map(PathBuf::from).collect(),
            abstractions_dir: PathBuf::from(DEFAULT_ABSTRACTIONS_DIR),
            log_sources: Vec::new(),
        }
    }
}

/// Log ingestion tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Lines decoded per cooperative batch.
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    /// Load with precedence env vars > file > defaults.
    ///
    /// `explicit` overrides the path resolution.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed,
    /// or when no home directory can be determined.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => config_path_with(env)?,
        };
        let mut config = load_file(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Parse a TOML string without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides from a resolver function.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ARMATURE_HELPER") {
            self.helper.program = v;
        }
        if let Some(v) = env("ARMATURE_ELEVATE") {
            self.helper.elevate = v;
        }
        if let Some(v) = env("ARMATURE_PROFILE_DIRS") {
            self.paths.profile_dirs = v
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(v) = env("ARMATURE_ABSTRACTIONS_DIR") {
            self.paths.abstractions_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ARMATURE_BATCH_SIZE") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.ingest.batch_size = n,
                _ => tracing::warn!(
                    var = "ARMATURE_BATCH_SIZE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }
}

/// Read a config file, falling back to defaults when it does not exist.
fn load_file(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            tracing::debug!(path = %path.display(), "loading config from file");
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the config file path using a custom env resolver.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Resolve the default config directory (`~/.config/armature/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".config").join("armature"))
}
