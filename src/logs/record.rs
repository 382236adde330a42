//! Parsed AppArmor audit records.
//!
//! Two line formats are understood:
//! - journal export lines: one JSON object per line with `_AUDIT_FIELD_*` keys
//!   whose text values arrive wrapped in double quotes;
//! - plaintext kernel/audit lines: `audit(SECS.MILLIS:SERIAL): apparmor="..." key=value ...`.
//!
//! Both go through the same field mapping. A record only exists once its
//! timestamp and pid have been extracted.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Microseconds per second in journal timestamps.
const MICROS_PER_SEC: i64 = 1_000_000;

/// Captures the first double-quoted token of a field value.
static QUOTED_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(\S*)""#).expect("quoted token pattern is valid"));

/// `audit(1700000000.123:42)` header of a kernel audit line.
static AUDIT_STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"audit\((\d+)(?:\.\d+)?:\d+\)").expect("audit stamp pattern is valid"));

/// `key=value` / `key="quoted value"` pairs of a kernel audit line.
static AUDIT_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)=("[^"]*"|\S+)"#).expect("audit pair pattern is valid"));

/// Audit event subtype carried in the `apparmor=` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuditKind {
    /// Profile state change (load, replace, remove, mode switch).
    Status,
    /// Access denied by an enforcing profile.
    Denied,
    /// Any other subtype, kept verbatim.
    Other(String),
}

impl AuditKind {
    /// Classify a subtype label.
    pub fn from_label(label: &str) -> Self {
        match label {
            "STATUS" => Self::Status,
            "DENIED" => Self::Denied,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Subtype label as it appears in the log.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Status => "STATUS",
            Self::Denied => "DENIED",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a line does not yield a [`LogRecord`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The line looked like JSON but did not parse.
    #[error("invalid JSON log line: {0}")]
    MalformedJson(#[from] serde_json::Error),
    /// The line parsed as JSON but is not an object.
    #[error("JSON log line is not an object")]
    NotAnObject,
    /// A mandatory field is absent or empty.
    #[error("missing mandatory field {0}")]
    MissingField(&'static str),
    /// A mandatory field could not be converted.
    #[error("invalid value '{value}' for field {field}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// Plaintext line without an AppArmor audit payload.
    #[error("line is not an AppArmor audit message")]
    NotAudit,
}

impl RecordError {
    /// Structural corruption of the source, as opposed to a line that is
    /// merely not a usable record.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedJson(_) | Self::NotAnObject)
    }
}

/// One parsed audit line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    raw: String,
    timestamp: i64,
    kind: AuditKind,
    pid: u32,
    operation: String,
    subject: String,
    status: String,
}

impl LogRecord {
    /// Parse a line in either supported format.
    ///
    /// Lines starting with `{` are treated as journal JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError`]; check [`RecordError::is_malformed`] to
    /// tell corrupt input from lines that simply carry no record.
    pub fn parse_line(line: &str) -> Result<Self, RecordError> {
        if line.trim_start().starts_with('{') {
            Self::from_json_line(line)
        } else {
            Self::from_audit_line(line)
        }
    }

    /// Parse one journal export line.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MalformedJson`] for invalid JSON and a field
    /// error when timestamp or pid cannot be extracted. A missing subtype
    /// decodes as [`AuditKind::Other`] with an empty label.
    pub fn from_json_line(line: &str) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_json_value(line, &value)
    }

    /// Build a record from an already decoded journal entry.
    ///
    /// # Errors
    ///
    /// Same field errors as [`LogRecord::from_json_line`].
    pub fn from_json_value(raw: &str, entry: &Value) -> Result<Self, RecordError> {
        let object = entry.as_object().ok_or(RecordError::NotAnObject)?;
        extract(raw, &JournalFields(object))
    }

    /// Parse one plaintext kernel/audit line.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NotAudit`] for lines without an `apparmor=`
    /// payload and field errors for incomplete ones.
    pub fn from_audit_line(line: &str) -> Result<Self, RecordError> {
        let fields = AuditFields::parse(line).ok_or(RecordError::NotAudit)?;
        extract(line, &fields)
    }

    /// Source line.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Timestamp as a UTC date, when representable.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    /// Event subtype.
    pub fn kind(&self) -> &AuditKind {
        &self.kind
    }

    /// Process id of the audited task.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Operation name (`open`, `capable`, `profile_load`, ...).
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Profile or resource the event is about.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Subtype-dependent detail text.
    pub fn status(&self) -> &str {
        &self.status
    }
}

/// Return the first double-quoted token of `data`.
///
/// Without such a token, `data` is returned trimmed and with surrounding
/// quotes removed, so unquoted values and quoted values containing spaces
/// are kept rather than blanked.
pub fn unquote(data: &str) -> String {
    match QUOTED_TOKEN.captures(data).and_then(|c| c.get(1)) {
        Some(token) => token.as_str().to_owned(),
        None => data.trim().trim_matches('"').to_owned(),
    }
}

/// Logical fields shared by both line formats.
#[derive(Debug, Clone, Copy)]
enum Field {
    Subtype,
    Pid,
    Name,
    Operation,
    Profile,
    CapName,
    Capability,
    RequestedMask,
    DeniedMask,
}

trait FieldSource {
    /// Raw field value, empty when absent.
    fn text(&self, field: Field) -> String;
    /// Event time in whole seconds.
    fn timestamp(&self) -> Result<i64, RecordError>;
}

fn extract(raw: &str, fields: &impl FieldSource) -> Result<LogRecord, RecordError> {
    let timestamp = fields.timestamp()?;

    let kind = AuditKind::from_label(&unquote(&fields.text(Field::Subtype)));

    let pid_text = fields.text(Field::Pid);
    if pid_text.is_empty() {
        return Err(RecordError::MissingField("pid"));
    }
    let pid = pid_text
        .trim()
        .parse::<u32>()
        .map_err(|_| RecordError::InvalidField {
            field: "pid",
            value: pid_text.clone(),
        })?;

    let operation = unquote(&fields.text(Field::Operation));
    let (subject, status) = match &kind {
        AuditKind::Denied => {
            let subject = unquote(&fields.text(Field::Profile));
            let status = if operation == "capable" {
                format!(
                    "capname: {} capability: {}",
                    fields.text(Field::CapName),
                    fields.text(Field::Capability)
                )
            } else {
                format!(
                    "requested mask: {} denied mask: {}",
                    unquote(&fields.text(Field::RequestedMask)),
                    unquote(&fields.text(Field::DeniedMask))
                )
            };
            (subject, status)
        }
        AuditKind::Status => status_layout(fields),
        AuditKind::Other(label) => {
            // Provisional: other subtypes may use a different field layout.
            warn!(subtype = %label, "unknown audit subtype, using STATUS field layout");
            status_layout(fields)
        }
    };

    Ok(LogRecord {
        raw: raw.to_owned(),
        timestamp,
        kind,
        pid,
        operation,
        subject,
        status,
    })
}

fn status_layout(fields: &impl FieldSource) -> (String, String) {
    (fields.text(Field::Name), unquote(&fields.text(Field::Profile)))
}

/// Journal export entry (`journalctl -o json`).
struct JournalFields<'a>(&'a serde_json::Map<String, Value>);

impl JournalFields<'_> {
    fn key(field: Field) -> &'static str {
        match field {
            Field::Subtype => "_AUDIT_FIELD_APPARMOR",
            Field::Pid => "_PID",
            Field::Name => "_AUDIT_FIELD_NAME",
            Field::Operation => "_AUDIT_FIELD_OPERATION",
            Field::Profile => "_AUDIT_FIELD_PROFILE",
            Field::CapName => "_AUDIT_FIELD_CAPNAME",
            Field::Capability => "_AUDIT_FIELD_CAPABILITY",
            Field::RequestedMask => "_AUDIT_FIELD_REQUESTED_MASK",
            Field::DeniedMask => "_AUDIT_FIELD_DENIED_MASK",
        }
    }

    fn get(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl FieldSource for JournalFields<'_> {
    fn text(&self, field: Field) -> String {
        self.get(Self::key(field))
    }

    fn timestamp(&self) -> Result<i64, RecordError> {
        let (key, micros) = ["_SOURCE_REALTIME_TIMESTAMP", "__REALTIME_TIMESTAMP"]
            .into_iter()
            .map(|key| (key, self.get(key)))
            .find(|(_, value)| !value.is_empty())
            .ok_or(RecordError::MissingField("_SOURCE_REALTIME_TIMESTAMP"))?;

        let micros = micros
            .trim()
            .parse::<i64>()
            .map_err(|_| RecordError::InvalidField {
                field: key,
                value: micros.clone(),
            })?;
        Ok(micros.div_euclid(MICROS_PER_SEC))
    }
}

/// Key/value pairs of a plaintext audit line.
struct AuditFields {
    seconds: Option<String>,
    pairs: HashMap<String, String>,
}

impl AuditFields {
    fn parse(line: &str) -> Option<Self> {
        let pairs: HashMap<String, String> = AUDIT_PAIR
            .captures_iter(line)
            .filter_map(|c| {
                let key = c.get(1)?.as_str().to_owned();
                let value = c.get(2)?.as_str().trim_matches('"').to_owned();
                Some((key, value))
            })
            .collect();
        if !pairs.contains_key("apparmor") {
            return None;
        }

        let seconds = AUDIT_STAMP
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_owned());
        Some(Self { seconds, pairs })
    }

    fn key(field: Field) -> &'static str {
        match field {
            Field::Subtype => "apparmor",
            Field::Pid => "pid",
            Field::Name => "name",
            Field::Operation => "operation",
            Field::Profile => "profile",
            Field::CapName => "capname",
            Field::Capability => "capability",
            Field::RequestedMask => "requested_mask",
            Field::DeniedMask => "denied_mask",
        }
    }
}

impl FieldSource for AuditFields {
    fn text(&self, field: Field) -> String {
        self.pairs.get(Self::key(field)).cloned().unwrap_or_default()
    }

    fn timestamp(&self) -> Result<i64, RecordError> {
        let seconds = self.seconds.as_deref().ok_or(RecordError::MissingField("audit"))?;
        seconds.parse::<i64>().map_err(|_| RecordError::InvalidField {
            field: "audit",
            value: seconds.to_owned(),
        })
    }
}
