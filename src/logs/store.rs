//! In-memory record store with a display filter.

use super::pipeline::LogSink;
use super::record::{AuditKind, LogRecord};

/// Which rows are visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Case-insensitive substring matched against subject, operation and status.
    pub text: Option<String>,
    /// Allowed subtypes; empty allows all.
    pub kinds: Vec<AuditKind>,
}

impl RowFilter {
    /// Whether `record` passes the filter.
    pub fn matches(&self, record: &LogRecord) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(record.kind()) {
            return false;
        }
        match self.text.as_deref().map(str::to_lowercase) {
            None => true,
            Some(needle) if needle.is_empty() => true,
            Some(needle) => [record.subject(), record.operation(), record.status()]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle)),
        }
    }
}

/// Records in arrival order.
#[derive(Debug, Default)]
pub struct LogStore {
    rows: Vec<LogRecord>,
    filter: RowFilter,
}

impl LogStore {
    /// Empty store showing everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, filtered or not.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows in arrival order.
    pub fn rows(&self) -> &[LogRecord] {
        &self.rows
    }

    /// Rows passing the current filter.
    pub fn visible_rows(&self) -> impl Iterator<Item = &LogRecord> {
        self.rows.iter().filter(|r| self.filter.matches(r))
    }

    /// Current filter.
    pub fn filter(&self) -> &RowFilter {
        &self.filter
    }

    /// Replace the filter.
    pub fn set_filter(&mut self, filter: RowFilter) {
        self.filter = filter;
    }

    /// Drop every row.
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

impl LogSink for LogStore {
    fn put_row(&mut self, record: LogRecord) {
        self.rows.push(record);
    }

    fn visible_row_count(&self) -> usize {
        self.visible_rows().count()
    }
}
