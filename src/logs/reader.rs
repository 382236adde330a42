//! Log collection from plaintext sources and the checkpointed audit feed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::caller::{Checkpoint, CommandCaller};
use crate::executor::process::ProcessRunner;
use crate::executor::CommandRunner;

use super::record::{LogRecord, RecordError};

/// Label used for records coming from the helper's audit output.
const AUDIT_SOURCE: &str = "audit";

/// Hard failure while collecting logs.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// A source contained a structurally corrupt line.
    #[error("{source_name} line {line}: {error}")]
    Malformed {
        /// Source label (file path or `audit`).
        source_name: String,
        /// 1-based line number within what was read from the source.
        line: usize,
        /// Parse failure.
        #[source]
        error: RecordError,
    },
}

/// An open, line-oriented log source.
pub struct LogSource {
    name: String,
    reader: Box<dyn BufRead + Send>,
}

impl LogSource {
    /// Wrap an already open reader.
    pub fn new(name: impl Into<String>, reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    /// Open a log file.
    ///
    /// # Errors
    ///
    /// Returns the IO error when the file cannot be opened.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(
            path.display().to_string(),
            Box::new(BufReader::new(file)),
        ))
    }

    /// Source label.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSource").field("name", &self.name).finish()
    }
}

/// Output of one audit fetch with its checkpoint line already split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFetch {
    /// Checkpoint to pass to the next fetch.
    pub checkpoint: Checkpoint,
    /// Log lines following the checkpoint line.
    pub body: String,
}

impl AuditFetch {
    /// Ask the helper for entries after `checkpoint`.
    pub async fn fetch<R: CommandRunner>(caller: &CommandCaller<R>, checkpoint: &Checkpoint) -> Self {
        let output = caller.get_logs(checkpoint).await;
        Self::from_output(&output, checkpoint)
    }

    /// Split helper output given the checkpoint used for the request.
    ///
    /// Without a checkpoint the first line is the new checkpoint; with one,
    /// the checkpoint carries over and every line is a log entry.
    pub fn from_output(output: &str, current: &Checkpoint) -> Self {
        if !current.is_empty() {
            return Self {
                checkpoint: current.clone(),
                body: output.to_owned(),
            };
        }

        let (first, body) = output.split_once('\n').unwrap_or((output, ""));
        let checkpoint = Checkpoint::new(first);
        if !checkpoint.is_empty() {
            debug!(checkpoint = %checkpoint, "captured audit checkpoint");
        }
        Self {
            checkpoint,
            body: body.to_owned(),
        }
    }

    /// Parse the body into records, dropping lines that carry none.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Malformed`] on corrupt JSON.
    pub fn records(&self) -> Result<Vec<LogRecord>, ReadError> {
        let mut records = Vec::new();
        collect_lines(AUDIT_SOURCE, self.body.lines(), &mut records)?;
        Ok(records)
    }
}

/// Reads plaintext log sources and then the checkpointed audit feed.
///
/// Plaintext sources are consumed incrementally: each call picks up where
/// the previous one stopped. The checkpoint belongs to this reader.
#[derive(Debug)]
pub struct LogReader<R = ProcessRunner> {
    sources: Vec<LogSource>,
    caller: Arc<CommandCaller<R>>,
    checkpoint: Checkpoint,
}

impl<R: CommandRunner> LogReader<R> {
    /// Reader over already open sources.
    pub fn new(caller: Arc<CommandCaller<R>>, sources: Vec<LogSource>) -> Self {
        Self {
            sources,
            caller,
            checkpoint: Checkpoint::empty(),
        }
    }

    /// Reader over log files; files that cannot be opened are skipped.
    pub fn open<P: AsRef<Path>>(caller: Arc<CommandCaller<R>>, paths: &[P]) -> Self {
        let sources = paths
            .iter()
            .filter_map(|path| {
                let path = path.as_ref();
                match LogSource::open(path) {
                    Ok(source) => Some(source),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot open log source");
                        None
                    }
                }
            })
            .collect();
        Self::new(caller, sources)
    }

    /// Continue from a checkpoint handed over from another reader.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Current audit checkpoint.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Open plaintext sources.
    pub fn sources(&self) -> &[LogSource] {
        &self.sources
    }

    /// Read new records: every plaintext source in order, then the audit feed.
    ///
    /// Lines without a usable record are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Malformed`] when a source holds corrupt JSON.
    pub async fn read_logs(&mut self) -> Result<Vec<LogRecord>, ReadError> {
        let mut logs = Vec::new();
        for source in &mut self.sources {
            read_source(source, &mut logs)?;
        }

        let fetch = AuditFetch::fetch(&*self.caller, &self.checkpoint).await;
        self.checkpoint = fetch.checkpoint.clone();
        logs.extend(fetch.records()?);

        debug!(records = logs.len(), "read logs");
        Ok(logs)
    }
}

fn read_source(source: &mut LogSource, out: &mut Vec<LogRecord>) -> Result<(), ReadError> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match source.reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                lines.push(line.trim_end_matches(['\n', '\r']).to_owned());
            }
            Err(e) => {
                warn!(source = %source.name, error = %e, "stopped reading log source");
                break;
            }
        }
    }
    collect_lines(&source.name, lines.iter().map(String::as_str), out)
}

fn collect_lines<'a>(
    source_name: &str,
    lines: impl Iterator<Item = &'a str>,
    out: &mut Vec<LogRecord>,
) -> Result<(), ReadError> {
    for (idx, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match LogRecord::parse_line(line) {
            Ok(record) => out.push(record),
            Err(error) if error.is_malformed() => {
                return Err(ReadError::Malformed {
                    source_name: source_name.to_owned(),
                    line: idx.saturating_add(1),
                    error,
                });
            }
            Err(_) => {}
        }
    }
    Ok(())
}
