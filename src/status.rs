//! Typed views over the helper's status and unconfined-process output.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::profile::ProfileMode;

/// `PID EXE [(COMMAND)] not confined` / `... confined by 'PROFILE (MODE)'`.
static UNCONFINED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\S+)(?:\s+\(([^)]*)\))?\s+(?:not confined|confined by '([^']*)')")
        .expect("unconfined line pattern is valid")
});

/// Loaded profiles and confined processes as reported by `aa-status --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Loaded profiles and their modes.
    pub profiles: BTreeMap<String, ProfileMode>,
    /// Processes currently confined by a profile.
    pub processes: Vec<ConfinedProcess>,
}

/// A process confined by a loaded profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedProcess {
    /// Executable path.
    pub executable: String,
    /// Confining profile.
    pub profile: String,
    /// Process id.
    pub pid: u32,
    /// Mode of the confining profile.
    pub mode: ProfileMode,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(default)]
    profiles: BTreeMap<String, String>,
    #[serde(default)]
    processes: BTreeMap<String, Vec<RawProcess>>,
}

#[derive(Debug, Deserialize)]
struct RawProcess {
    profile: String,
    pid: Value,
    status: String,
}

impl StatusReport {
    /// Parse status JSON.
    ///
    /// Processes whose pid is not a number are skipped.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `text` is not a status document.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawStatus = serde_json::from_str(text)?;

        let profiles = raw
            .profiles
            .into_iter()
            .map(|(name, mode)| (name, ProfileMode::from_label(&mode)))
            .collect();

        let mut processes = Vec::new();
        for (executable, entries) in raw.processes {
            for entry in entries {
                let pid = match &entry.pid {
                    Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                let Some(pid) = pid else {
                    debug!(executable = %executable, pid = %entry.pid, "skipping process with invalid pid");
                    continue;
                };
                processes.push(ConfinedProcess {
                    executable: executable.clone(),
                    profile: entry.profile,
                    pid,
                    mode: ProfileMode::from_label(&entry.status),
                });
            }
        }

        Ok(Self {
            profiles,
            processes,
        })
    }
}

/// One line of the unconfined-process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process id.
    pub pid: u32,
    /// Executable path.
    pub executable: String,
    /// Interpreted command, for scripts.
    pub command: Option<String>,
    /// Confining profile, when confined.
    pub profile: Option<String>,
    /// Mode of the confining profile, when confined.
    pub mode: Option<ProfileMode>,
}

/// Parse the unconfined-process listing, skipping lines in other formats.
pub fn parse_unconfined(text: &str) -> Vec<ProcessEntry> {
    text.lines()
        .filter_map(|line| {
            let caps = UNCONFINED_LINE.captures(line)?;
            let pid = caps.get(1)?.as_str().parse().ok()?;
            let executable = caps.get(2)?.as_str().to_owned();
            let command = caps.get(3).map(|m| m.as_str().to_owned());
            let (profile, mode) = match caps.get(4).map(|m| m.as_str()) {
                Some(label) => match label.rsplit_once(" (") {
                    Some((profile, mode)) => (
                        Some(profile.to_owned()),
                        Some(ProfileMode::from_label(mode.trim_end_matches(')'))),
                    ),
                    None => (Some(label.to_owned()), None),
                },
                None => (None, None),
            };
            Some(ProcessEntry {
                pid,
                executable,
                command,
                profile,
                mode,
            })
        })
        .collect()
}
