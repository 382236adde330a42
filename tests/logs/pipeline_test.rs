//! Batch boundaries, refresh notifications and failure recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use armature::logs::pipeline::{DEFAULT_BATCH_SIZE, STATUS_SUFFIX};
use armature::logs::{AuditKind, IngestPipeline, LogStore, PipelineState, RowFilter, StatusDisplay};

/// Records every refresh notification.
#[derive(Debug, Default)]
struct RecordingDisplay {
    labels: Vec<(usize, String)>,
}

impl StatusDisplay for RecordingDisplay {
    fn set_status_label(&mut self, visible: usize, suffix: &str) {
        self.labels.push((visible, suffix.to_owned()));
    }
}

fn pipeline() -> IngestPipeline<LogStore, RecordingDisplay> {
    IngestPipeline::new(LogStore::new(), RecordingDisplay::default())
}

fn status_lines(count: usize) -> String {
    (0..count)
        .map(|n| crate::status_line(n) + "\n")
        .collect()
}

#[test]
fn new_pipeline_is_idle() {
    let mut pipeline = pipeline();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.batch_size(), DEFAULT_BATCH_SIZE);
    assert!(pipeline.step().expect("nothing to do").is_none());
    assert!(pipeline.display().labels.is_empty());
}

#[test]
fn submit_schedules_work() {
    let mut pipeline = pipeline();
    pipeline.submit(status_lines(1));
    assert_eq!(pipeline.state(), PipelineState::Scheduled);
}

#[test]
fn two_full_batches_refresh_twice() {
    let mut pipeline = pipeline();
    pipeline.submit(status_lines(254));

    let first = pipeline.step().expect("first batch").expect("work pending");
    assert_eq!(first.processed, 127);
    assert_eq!(first.visible, 127);
    assert!(!first.finished);
    assert_eq!(pipeline.state(), PipelineState::Scheduled);

    let second = pipeline.step().expect("second batch").expect("work pending");
    assert_eq!(second.processed, 127);
    assert_eq!(second.visible, 254);
    assert!(second.finished);
    assert_eq!(pipeline.state(), PipelineState::Idle);

    assert!(pipeline.step().expect("idle").is_none());
    assert_eq!(
        pipeline.display().labels,
        vec![(127, STATUS_SUFFIX.to_owned()), (254, STATUS_SUFFIX.to_owned())]
    );
}

#[tokio::test]
async fn run_reports_batch_count() {
    let mut pipeline = pipeline();
    pipeline.submit(status_lines(254));

    let batches = pipeline.run().await.expect("ingestion should succeed");

    assert_eq!(batches, 2);
    assert_eq!(pipeline.sink().len(), 254);
    assert_eq!(pipeline.display().labels.len(), 2);
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn partial_batch_refreshes_once() {
    let mut pipeline = pipeline();
    pipeline.submit(status_lines(128));
    assert_eq!(pipeline.run().await.expect("should succeed"), 2);
    assert_eq!(
        pipeline.display().labels,
        vec![(127, STATUS_SUFFIX.to_owned()), (128, STATUS_SUFFIX.to_owned())]
    );
}

#[tokio::test]
async fn blank_lines_are_skipped() {
    let mut pipeline = pipeline();
    pipeline.submit(format!("\n{}\n\n{}\n\n", crate::status_line(1), crate::status_line(2)));
    assert_eq!(pipeline.run().await.expect("should succeed"), 1);
    assert_eq!(pipeline.sink().len(), 2);
}

#[test]
fn batch_size_is_configurable_and_never_zero() {
    let mut pipeline = pipeline().with_batch_size(0);
    assert_eq!(pipeline.batch_size(), 1);
    pipeline.submit(status_lines(3));

    let mut reports = Vec::new();
    while let Some(report) = pipeline.step().expect("should succeed") {
        reports.push(report.visible);
    }
    assert_eq!(reports, vec![1, 2, 3]);
}

#[test]
fn malformed_line_aborts_without_refresh() {
    let mut pipeline = pipeline();
    let data = format!("{}\n{{\"_PID\": \n{}\n", crate::status_line(1), crate::status_line(3));
    pipeline.submit(data);

    let err = pipeline.step().expect_err("line 2 is not JSON");

    assert_eq!(err.line, 2);
    assert!(err.error.is_malformed());
    assert!(pipeline.display().labels.is_empty());
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn pipeline_accepts_new_work_after_failure() {
    let mut pipeline = pipeline();
    pipeline.submit("not json at all\n");
    assert!(pipeline.run().await.is_err());

    pipeline.submit(status_lines(2));
    assert_eq!(pipeline.run().await.expect("should recover"), 1);
    assert_eq!(pipeline.display().labels, vec![(2, STATUS_SUFFIX.to_owned())]);
}

#[test]
fn later_submission_survives_earlier_failure() {
    let mut pipeline = pipeline();
    pipeline.submit("{broken\n");
    pipeline.submit(status_lines(1));

    assert!(pipeline.step().is_err());
    assert_eq!(pipeline.state(), PipelineState::Scheduled);

    let report = pipeline.step().expect("second submission").expect("work pending");
    assert_eq!(report.visible, 1);
    assert!(report.finished);
}

#[test]
fn record_without_mandatory_fields_is_rejected() {
    let mut pipeline = pipeline();
    pipeline.submit("{\"MESSAGE\": \"hello\"}\n");
    let err = pipeline.step().expect_err("no timestamp");
    assert!(!err.error.is_malformed());
    assert_eq!(err.line, 1);
}

#[test]
fn entry_without_subtype_is_ingested() {
    let mut pipeline = pipeline();
    pipeline.submit(format!(
        "{}\n{}\n",
        r#"{"_SOURCE_REALTIME_TIMESTAMP":"1700000000000000","_PID":"5","_AUDIT_FIELD_NAME":"/usr/bin/true"}"#,
        crate::status_line(2)
    ));

    let report = pipeline.step().expect("should succeed").expect("work pending");

    assert_eq!(report.processed, 2);
    assert_eq!(report.visible, 2);
    assert_eq!(pipeline.sink().rows()[0].kind(), &AuditKind::Other(String::new()));
}

#[test]
fn refresh_reports_filtered_count() {
    let mut pipeline = pipeline();
    pipeline.submit(format!("{}\n{}\n", crate::status_line(1), crate::denied_open_line()));
    pipeline.step().expect("should succeed");

    pipeline.sink_mut().set_filter(RowFilter {
        text: None,
        kinds: vec![AuditKind::Denied],
    });

    assert_eq!(pipeline.refresh(), 1);
    assert_eq!(pipeline.display().labels.last(), Some(&(1, STATUS_SUFFIX.to_owned())));
}

#[tokio::test]
async fn run_yields_between_batches() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let other = tokio::spawn(async move {
        flag.store(true, Ordering::SeqCst);
    });

    let mut pipeline = pipeline().with_batch_size(1);
    pipeline.submit(status_lines(3));
    pipeline.run().await.expect("should succeed");

    assert!(ran.load(Ordering::SeqCst), "other task should run during ingestion");
    other.await.expect("task should finish");
}
