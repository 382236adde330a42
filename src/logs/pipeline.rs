//! Batched, cooperative ingestion of journal JSON lines.
//!
//! Submitted text is owned by the pipeline together with a byte cursor.
//! Each [`IngestPipeline::step`] decodes at most one batch, hands the
//! records to the sink and refreshes the display. [`IngestPipeline::run`]
//! drives steps and yields to the runtime between batches, so a
//! single-threaded runtime stays responsive while large exports load.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::record::{LogRecord, RecordError};

/// Lines decoded per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 127;

/// Suffix shown after the visible row count.
pub const STATUS_SUFFIX: &str = "logs";

/// Destination of decoded records.
pub trait LogSink {
    /// Append one record.
    fn put_row(&mut self, record: LogRecord);
    /// Rows that pass the sink's current filter.
    fn visible_row_count(&self) -> usize;
}

/// Display collaborator notified after every batch.
pub trait StatusDisplay {
    /// Show `visible` followed by `suffix` (e.g. `" 254 logs"`).
    fn set_status_label(&mut self, visible: usize, suffix: &str);
}

/// Scheduling state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing submitted.
    Idle,
    /// Work is waiting for the next step.
    Scheduled,
    /// A batch is being decoded.
    Processing,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Records delivered to the sink in this batch.
    pub processed: usize,
    /// Visible row count reported to the display.
    pub visible: usize,
    /// Whether the submission this batch belonged to is exhausted.
    pub finished: bool,
}

/// Hard ingestion failure. The failing submission is dropped.
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {error}")]
pub struct IngestError {
    /// 1-based line number within the submission.
    pub line: usize,
    /// Decode failure.
    #[source]
    pub error: RecordError,
}

/// One submitted text blob and the read position inside it.
#[derive(Debug)]
struct IngestJob {
    input: String,
    cursor: usize,
    line_no: usize,
}

impl IngestJob {
    fn new(input: String) -> Self {
        Self {
            input,
            cursor: 0,
            line_no: 0,
        }
    }

    /// Next non-blank line and its 1-based number.
    fn next_line(&mut self) -> Option<(usize, &str)> {
        loop {
            let rest = self.input.get(self.cursor..)?;
            if rest.is_empty() {
                return None;
            }
            let (line, consumed) = match rest.split_once('\n') {
                Some((line, _)) => (line, line.len().saturating_add(1)),
                None => (rest, rest.len()),
            };
            self.cursor = self.cursor.saturating_add(consumed);
            self.line_no = self.line_no.saturating_add(1);

            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                return Some((self.line_no, line));
            }
        }
    }

    /// Only blank text remains.
    fn is_exhausted(&self) -> bool {
        self.input
            .get(self.cursor..)
            .is_none_or(|rest| rest.trim().is_empty())
    }
}

/// Cooperative ingestion pipeline feeding a sink and a display.
#[derive(Debug)]
pub struct IngestPipeline<S, D> {
    sink: S,
    display: D,
    batch_size: usize,
    active: Option<IngestJob>,
    queue: VecDeque<IngestJob>,
    state: PipelineState,
}

impl<S: LogSink, D: StatusDisplay> IngestPipeline<S, D> {
    /// Pipeline with the default batch size.
    pub fn new(sink: S, display: D) -> Self {
        Self {
            sink,
            display,
            batch_size: DEFAULT_BATCH_SIZE,
            active: None,
            queue: VecDeque::new(),
            state: PipelineState::Idle,
        }
    }

    /// Override the batch size; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Current scheduling state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Lines decoded per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink, mutably (e.g. to change its filter).
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The display collaborator.
    pub fn display(&self) -> &D {
        &self.display
    }

    /// Give back the sink and display.
    pub fn into_parts(self) -> (S, D) {
        (self.sink, self.display)
    }

    /// Queue newline-delimited JSON for ingestion.
    pub fn submit(&mut self, data: impl Into<String>) {
        let data = data.into();
        debug!(bytes = data.len(), "log data submitted");
        self.queue.push_back(IngestJob::new(data));
        if self.state == PipelineState::Idle {
            self.state = PipelineState::Scheduled;
        }
    }

    /// Recompute the visible row count and report it to the display.
    pub fn refresh(&mut self) -> usize {
        let visible = self.sink.visible_row_count();
        self.display.set_status_label(visible, STATUS_SUFFIX);
        visible
    }

    /// Decode one batch. Returns `None` when there is nothing to do.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on the first line that fails to decode. No
    /// refresh is sent for that batch and the submission is discarded;
    /// later submissions stay queued.
    pub fn step(&mut self) -> Result<Option<BatchReport>, IngestError> {
        let Some(mut job) = self.active.take().or_else(|| self.queue.pop_front()) else {
            self.state = PipelineState::Idle;
            return Ok(None);
        };
        self.state = PipelineState::Processing;

        let mut processed: usize = 0;
        while processed < self.batch_size {
            let Some((line, text)) = job.next_line() else {
                break;
            };
            match LogRecord::from_json_line(text) {
                Ok(record) => self.sink.put_row(record),
                Err(error) => {
                    warn!(line, error = %error, "aborting log ingestion");
                    self.state = self.pending_state();
                    return Err(IngestError { line, error });
                }
            }
            processed = processed.saturating_add(1);
        }

        let finished = job.is_exhausted();
        let visible = self.refresh();
        if !finished {
            self.active = Some(job);
        }
        self.state = self.pending_state();

        debug!(processed, visible, finished, "log batch processed");
        Ok(Some(BatchReport {
            processed,
            visible,
            finished,
        }))
    }

    /// Run batches until idle, yielding to the runtime after each one.
    ///
    /// Returns the number of batches processed.
    ///
    /// # Errors
    ///
    /// Propagates the first [`IngestError`]; the pipeline is left able to
    /// accept new submissions.
    pub async fn run(&mut self) -> Result<usize, IngestError> {
        let mut batches: usize = 0;
        while self.step()?.is_some() {
            batches = batches.saturating_add(1);
            tokio::task::yield_now().await;
        }
        Ok(batches)
    }

    fn pending_state(&self) -> PipelineState {
        if self.active.is_some() || !self.queue.is_empty() {
            PipelineState::Scheduled
        } else {
            PipelineState::Idle
        }
    }
}
