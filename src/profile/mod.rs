//! AppArmor profile model, policy file parsing and discovery.
//!
//! Profiles are re-created on every enumeration; the only identity they
//! carry across calls is their name.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub mod parser;
pub mod scan;

pub use parser::PolicyFile;
pub use scan::{abstractions, enumerate_profiles, locate_profile, Abstractions};

/// Default directories searched for profile files, in priority order.
pub const DEFAULT_PROFILE_DIRS: [&str; 2] = ["/etc/apparmor.d/", "/var/lib/snapd/apparmor/profiles/"];

/// Default directory holding policy abstractions.
pub const DEFAULT_ABSTRACTIONS_DIR: &str = "/etc/apparmor.d/abstractions";

/// Enforcement mode of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileMode {
    /// Violations are blocked and logged.
    Enforce,
    /// Violations are logged only.
    Complain,
    /// Violations kill the offending task.
    Kill,
    /// Profile is not loaded.
    Disabled,
    /// Profile is loaded in unconfined mode.
    Unconfined,
    /// Mode reported by the kernel that this crate does not model.
    Unknown,
}

impl ProfileMode {
    /// Canonical lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Complain => "complain",
            Self::Kill => "kill",
            Self::Disabled => "disabled",
            Self::Unconfined => "unconfined",
            Self::Unknown => "unknown",
        }
    }

    /// Spelling understood by the privileged helper, for the modes it can switch between.
    pub fn helper_arg(self) -> Option<&'static str> {
        match self {
            Self::Enforce => Some("enforce"),
            Self::Complain => Some("complain"),
            Self::Disabled => Some("disable"),
            Self::Kill | Self::Unconfined | Self::Unknown => None,
        }
    }

    /// Map a label reported by status tools, falling back to [`ProfileMode::Unknown`].
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for ProfileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileMode {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforce" => Ok(Self::Enforce),
            "complain" => Ok(Self::Complain),
            "kill" => Ok(Self::Kill),
            "disable" | "disabled" => Ok(Self::Disabled),
            "unconfined" => Ok(Self::Unconfined),
            _ => Err(ProfileError::UnknownMode(s.to_owned())),
        }
    }
}

/// One profile declared in a policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Profile name, unique within one enumeration pass.
    pub name: String,
    /// Executable attachment pattern, when declared.
    pub attachment: Option<String>,
    /// File the profile was declared in.
    pub path: PathBuf,
    /// Mode derived from flags and the `disable/` directory.
    pub mode: ProfileMode,
    /// Raw entries of the `flags=(...)` list.
    pub flags: Vec<String>,
    /// Top-level rule lines of the profile body, trailing comma removed.
    pub rules: Vec<String>,
    /// 1-based line of the profile header.
    pub line: usize,
}

/// A profile together with the parsed file that declared it.
#[derive(Debug, Clone)]
pub struct ParsedProfile {
    /// Parsed policy file, shared by every profile it declares.
    pub file: Arc<PolicyFile>,
    /// The profile itself.
    pub profile: Profile,
}

/// Enumeration result keyed by profile name.
pub type ProfileMap = BTreeMap<String, ParsedProfile>;

/// Errors from profile lookup and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// No candidate directory contains the requested profile.
    #[error("profile '{name}' not found in {searched}")]
    NotFound {
        /// Requested profile name.
        name: String,
        /// Candidate directories, comma separated.
        searched: String,
    },
    /// Profile name would escape the search directory.
    #[error("invalid profile name '{0}'")]
    InvalidName(String),
    /// Policy file is not well formed.
    #[error("{}:{}: {}", .path.display(), .line, .message)]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line of the problem.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// File could not be read.
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Mode label not recognised.
    #[error("unknown profile mode '{0}'")]
    UnknownMode(String),
}

/// Overlay modes reported by a live status query onto an enumeration result.
///
/// Names absent from `profiles` are ignored.
pub fn apply_live_modes(profiles: &mut ProfileMap, live: &BTreeMap<String, ProfileMode>) {
    for (name, mode) in live {
        if let Some(entry) = profiles.get_mut(name) {
            entry.profile.mode = *mode;
        }
    }
}
