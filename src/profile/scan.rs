//! Profile discovery on the filesystem.

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ParsedProfile, PolicyFile, ProfileError, ProfileMap, ProfileMode};

/// Subdirectory whose entries mark same-named profile files as disabled.
const DISABLE_DIR: &str = "disable";

/// Find the file for `name` in the first directory that contains it.
///
/// Directories are tried in the order given. The returned path is absolute.
///
/// # Errors
///
/// Returns [`ProfileError::InvalidName`] when `name` is not a single path
/// component and [`ProfileError::NotFound`] when no directory contains it.
pub fn locate_profile<P: AsRef<Path>>(name: &str, search_dirs: &[P]) -> Result<PathBuf, ProfileError> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal {
        return Err(ProfileError::InvalidName(name.to_owned()));
    }

    for dir in search_dirs {
        let candidate = dir.as_ref().join(name);
        if candidate.exists() {
            debug!(profile = %name, path = %candidate.display(), "located profile");
            return std::path::absolute(&candidate).map_err(|source| ProfileError::Io {
                path: candidate,
                source,
            });
        }
    }

    Err(ProfileError::NotFound {
        name: name.to_owned(),
        searched: search_dirs
            .iter()
            .map(|d| d.as_ref().display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Lazily list abstraction names (regular file names) under `path`.
///
/// A missing directory yields an empty sequence.
pub fn abstractions(path: &Path) -> Abstractions {
    let entries = match fs::read_dir(path) {
        Ok(entries) => Some(entries),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "abstractions directory unavailable");
            None
        }
    };
    Abstractions { entries }
}

/// Iterator returned by [`abstractions`], in directory order.
#[derive(Debug)]
pub struct Abstractions {
    entries: Option<fs::ReadDir>,
}

impl Iterator for Abstractions {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read abstractions entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || is_ignored(entry.file_name().as_os_str()) {
                continue;
            }
            return Some(entry.file_name().to_string_lossy().into_owned());
        }
        None
    }
}

/// Parse every profile file found directly under each of `search_dirs`.
///
/// Directories are scanned in the order given, files in name order. A
/// profile name seen again later overwrites the earlier entry. Files that
/// fail to parse are skipped with a warning; missing directories
/// contribute nothing.
pub fn enumerate_profiles<P: AsRef<Path>>(search_dirs: &[P]) -> ProfileMap {
    let mut profiles = ProfileMap::new();

    for dir in search_dirs {
        let dir = dir.as_ref();
        for path in profile_files(dir) {
            let mut file = match PolicyFile::load(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparsable profile file");
                    continue;
                }
            };

            if is_disabled(dir, &path) {
                for profile in &mut file.profiles {
                    profile.mode = ProfileMode::Disabled;
                }
            }

            let file = Arc::new(file);
            for profile in &file.profiles {
                let entry = ParsedProfile {
                    file: Arc::clone(&file),
                    profile: profile.clone(),
                };
                if let Some(previous) = profiles.insert(profile.name.clone(), entry) {
                    debug!(
                        profile = %profile.name,
                        previous = %previous.file.path.display(),
                        current = %path.display(),
                        "profile redefined, keeping later location"
                    );
                }
            }
        }
    }

    profiles
}

/// Regular files directly under `dir`, sorted by name.
fn profile_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "profile directory unavailable");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| !is_ignored(entry.file_name().as_os_str()))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

fn is_disabled(dir: &Path, file: &Path) -> bool {
    file.file_name()
        .is_some_and(|name| dir.join(DISABLE_DIR).join(name).exists())
}

/// Hidden files and package-manager or editor leftovers.
fn is_ignored(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.')
        || name.ends_with('~')
        || name.contains(".dpkg-")
        || name.ends_with(".rpmnew")
        || name.ends_with(".rpmsave")
}
