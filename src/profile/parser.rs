//! Policy file header parser.
//!
//! Recognises just enough of the profile language to find profile
//! declarations, their flags and their top-level rules. Rule syntax is
//! not validated; the kernel-side parser remains the authority.

use std::path::{Path, PathBuf};

use super::{Profile, ProfileError, ProfileMode};

/// A parsed policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFile {
    /// File the policy was read from.
    pub path: PathBuf,
    /// Targets of top-level `include` directives, in file order.
    pub includes: Vec<String>,
    /// Profiles declared at top level, in file order.
    pub profiles: Vec<Profile>,
}

impl PolicyFile {
    /// Read and parse a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] when the file cannot be read and
    /// [`ProfileError::Parse`] when it is not a well-formed policy file.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_policy(path, &text)
    }
}

/// Parse policy text that was read from `path`.
///
/// # Errors
///
/// Returns [`ProfileError::Parse`] on unbalanced braces, unexpected
/// top-level statements or profile headers without a name.
pub fn parse_policy(path: &Path, text: &str) -> Result<PolicyFile, ProfileError> {
    let parse_error = |line: usize, message: String| ProfileError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut includes = Vec::new();
    let mut profiles = Vec::new();
    let mut current: Option<Profile> = None;
    let mut depth: usize = 0;
    let mut last_line: usize = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx.saturating_add(1);
        last_line = line_no;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if depth == 0 {
            if let Some(target) = include_target(line) {
                includes.push(target);
                continue;
            }
            if is_preamble(line) {
                continue;
            }
            if line.starts_with('}') {
                return Err(parse_error(line_no, "closing brace without open profile".to_owned()));
            }

            let (header, closed) = if let Some(h) = line.strip_suffix("{}") {
                (h, true)
            } else if let Some(h) = line.strip_suffix('{') {
                (h, false)
            } else {
                return Err(parse_error(line_no, format!("unexpected top-level statement '{line}'")));
            };

            let profile = parse_header(path, header.trim(), line_no)?;
            if closed {
                profiles.push(profile);
            } else {
                current = Some(profile);
                depth = 1;
            }
            continue;
        }

        if line.starts_with('}') {
            depth = depth
                .checked_sub(1)
                .ok_or_else(|| parse_error(line_no, "unbalanced closing brace".to_owned()))?;
            if depth == 0 {
                if let Some(done) = current.take() {
                    profiles.push(done);
                }
            }
            continue;
        }

        if depth == 1 {
            if let Some(profile) = current.as_mut() {
                let rule = line.trim_end_matches('{').trim_end().trim_end_matches(',');
                profile.rules.push(rule.trim_end().to_owned());
            }
        }
        if line.ends_with('{') {
            depth = depth.saturating_add(1);
        }
    }

    if let Some(open) = current {
        return Err(parse_error(
            last_line,
            format!("profile '{}' is missing a closing brace", open.name),
        ));
    }

    Ok(PolicyFile {
        path: path.to_path_buf(),
        includes,
        profiles,
    })
}

/// Remove a trailing `#` comment, keeping `#include` directives and quoted `#`.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with("#include") {
        return line;
    }
    let mut in_quote = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '#' if !in_quote => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Target of an `include` / `#include` directive, without delimiters.
fn include_target(line: &str) -> Option<String> {
    let rest = line
        .strip_prefix("#include")
        .or_else(|| line.strip_prefix("include"))?;
    if !rest.starts_with(char::is_whitespace) && !rest.starts_with('<') && !rest.starts_with('"') {
        return None;
    }
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("if exists").unwrap_or(rest);
    let target = rest
        .trim()
        .trim_end_matches(',')
        .trim_matches(|c| c == '<' || c == '>' || c == '"');
    Some(target.to_owned())
}

/// Top-level statements that carry no profile.
fn is_preamble(line: &str) -> bool {
    line.starts_with("abi ")
        || line.starts_with("abi<")
        || line.starts_with("alias ")
        || (line.starts_with("@{") && line.contains('='))
}

fn parse_header(path: &Path, header: &str, line: usize) -> Result<Profile, ProfileError> {
    let parse_error = |message: String| ProfileError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    let (tokens, flags) = split_header(header).map_err(parse_error)?;
    let mut tokens = tokens.into_iter();

    let (name, attachment) = match tokens.next() {
        Some(keyword) if keyword == "profile" => {
            let name = tokens
                .next()
                .map(|t| unquote(&t))
                .filter(|n| !n.is_empty())
                .ok_or_else(|| parse_error("profile header without a name".to_owned()))?;
            (name, tokens.next().map(|t| unquote(&t)))
        }
        Some(first) if first.starts_with('/') || first.starts_with("@{") || first.starts_with('"') => {
            let attach = unquote(&first);
            (attach.clone(), Some(attach))
        }
        Some(first) => {
            return Err(parse_error(format!("unexpected profile header '{first}'")));
        }
        None => return Err(parse_error("profile header without a name".to_owned())),
    };

    Ok(Profile {
        name,
        attachment,
        path: path.to_path_buf(),
        mode: mode_from_flags(&flags),
        flags,
        rules: Vec::new(),
        line,
    })
}

/// Split a header into plain tokens and its flag entries.
///
/// Flags come from `flags=(...)` or from a bare `(...)` group. Other
/// `key=(...)` groups (e.g. `xattrs`) are dropped.
fn split_header(header: &str) -> Result<(Vec<String>, Vec<String>), String> {
    let mut tokens = Vec::new();
    let mut flags = Vec::new();
    let mut rest = header;

    while let Some((before, after)) = rest.split_once('(') {
        let (body, after_close) = after
            .split_once(')')
            .ok_or_else(|| "unterminated parenthesis in profile header".to_owned())?;
        let before = before.trim_end();
        let is_flags = match before.strip_suffix('=') {
            Some(keyed) => {
                let keyed = keyed.trim_end();
                let (prefix, key) = keyed.rsplit_once(char::is_whitespace).unwrap_or(("", keyed));
                tokens.extend(prefix.split_whitespace().map(str::to_owned));
                key == "flags"
            }
            None => {
                tokens.extend(before.split_whitespace().map(str::to_owned));
                true
            }
        };
        if is_flags {
            flags.extend(
                body.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|f| !f.is_empty())
                    .map(str::to_owned),
            );
        }
        rest = after_close;
    }
    tokens.extend(rest.split_whitespace().map(str::to_owned));
    Ok((tokens, flags))
}

fn mode_from_flags(flags: &[String]) -> ProfileMode {
    let has = |flag: &str| flags.iter().any(|f| f == flag);
    if has("complain") {
        ProfileMode::Complain
    } else if has("kill") {
        ProfileMode::Kill
    } else if has("unconfined") {
        ProfileMode::Unconfined
    } else {
        ProfileMode::Enforce
    }
}

fn unquote(token: &str) -> String {
    token.trim_matches('"').to_owned()
}
