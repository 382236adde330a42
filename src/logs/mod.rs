//! Audit log records, collection and ingestion.

pub mod pipeline;
pub mod reader;
pub mod record;
pub mod store;

pub use pipeline::{BatchReport, IngestError, IngestPipeline, LogSink, PipelineState, StatusDisplay};
pub use reader::{AuditFetch, LogReader, LogSource, ReadError};
pub use record::{AuditKind, LogRecord, RecordError};
pub use store::{LogStore, RowFilter};
