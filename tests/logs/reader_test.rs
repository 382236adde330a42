//! Plaintext sources followed by the checkpointed audit feed.

use std::io::Cursor;
use std::sync::Arc;

use armature::caller::{Checkpoint, CommandCaller, HelperCommand};
use armature::logs::{AuditFetch, AuditKind, LogReader, LogSource, ReadError};

use crate::scripted_runner::ScriptedRunner;

const KERNEL_LINE: &str = r#"Oct 17 10:00:00 host kernel: audit: type=1400 audit(1700000100.000:7): apparmor="DENIED" operation="open" profile="/usr/bin/bar" name="/etc/passwd" pid=99 comm="bar" requested_mask="w" denied_mask="w""#;

fn caller(runner: ScriptedRunner) -> Arc<CommandCaller<ScriptedRunner>> {
    Arc::new(CommandCaller::with_runner(runner, HelperCommand::default()))
}

fn source(name: &str, text: &str) -> LogSource {
    LogSource::new(name, Box::new(Cursor::new(text.as_bytes().to_vec())))
}

#[tokio::test]
async fn plaintext_sources_come_before_audit_feed() {
    let feed = format!("ckpt-1\n{}\n", crate::status_line(5));
    let caller = caller(ScriptedRunner::new().ok(&feed));
    let syslog = source("syslog", &format!("sshd[1]: session opened\n{KERNEL_LINE}\n"));
    let mut reader = LogReader::new(Arc::clone(&caller), vec![syslog]);

    let records = reader.read_logs().await.expect("should read");

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].subject(), "/usr/bin/bar");
    assert_eq!(records[0].status(), "requested mask: w denied mask: w");
    assert_eq!(records[1].kind(), &AuditKind::Status);
    assert_eq!(reader.checkpoint().as_str(), "ckpt-1");
}

#[tokio::test]
async fn checkpoint_is_reused_on_later_reads() {
    let runner = ScriptedRunner::new()
        .ok(&format!("ckpt-1\n{}\n", crate::status_line(1)))
        .ok(&format!("{}\n", crate::status_line(2)))
        .ok("");
    let caller = caller(runner);
    let mut reader = LogReader::new(Arc::clone(&caller), Vec::new());

    let first = reader.read_logs().await.expect("first read");
    let second = reader.read_logs().await.expect("second read");
    let third = reader.read_logs().await.expect("third read");

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].pid(), 2);
    assert!(third.is_empty());
    assert_eq!(reader.checkpoint().as_str(), "ckpt-1");

    let calls = caller.runner().calls();
    assert_eq!(calls[0], vec!["pkexec", "aa-caller", "-l"]);
    assert_eq!(calls[1], vec!["pkexec", "aa-caller", "-l", "ckpt-1"]);
    assert_eq!(calls[2], vec!["pkexec", "aa-caller", "-l", "ckpt-1"]);
}

#[tokio::test]
async fn plaintext_sources_are_read_incrementally() {
    let caller = caller(ScriptedRunner::new());
    let mut reader = LogReader::new(caller, vec![source("kern.log", &format!("{KERNEL_LINE}\n"))]);

    assert_eq!(reader.read_logs().await.expect("first read").len(), 1);
    assert!(reader.read_logs().await.expect("second read").is_empty());
}

#[tokio::test]
async fn invalid_utf8_line_does_not_hide_later_lines() {
    let mut bytes = b"garbage \xff\xfe line\n".to_vec();
    bytes.extend_from_slice(KERNEL_LINE.as_bytes());
    bytes.push(b'\n');
    let syslog = LogSource::new("syslog", Box::new(Cursor::new(bytes)));
    let mut reader = LogReader::new(caller(ScriptedRunner::new()), vec![syslog]);

    let records = reader.read_logs().await.expect("should read");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].subject(), "/usr/bin/bar");
}

#[tokio::test]
async fn failed_helper_yields_no_audit_records() {
    let caller = caller(ScriptedRunner::new().fail(126, "Request dismissed"));
    let mut reader = LogReader::new(caller, Vec::new());

    assert!(reader.read_logs().await.expect("should read").is_empty());
    assert!(reader.checkpoint().is_empty());
}

#[tokio::test]
async fn corrupt_feed_is_an_error_but_checkpoint_is_kept() {
    let caller = caller(ScriptedRunner::new().ok("ckpt-9\n{\"_PID\": \n"));
    let mut reader = LogReader::new(caller, Vec::new());

    let err = reader.read_logs().await.expect_err("corrupt JSON");

    assert!(matches!(err, ReadError::Malformed { line: 1, .. }));
    assert_eq!(reader.checkpoint().as_str(), "ckpt-9");
}

#[tokio::test]
async fn handed_over_checkpoint_is_used_immediately() {
    let caller = caller(ScriptedRunner::new().ok(""));
    let mut reader = LogReader::new(Arc::clone(&caller), Vec::new())
        .with_checkpoint(Checkpoint::new("ckpt-7"));

    reader.read_logs().await.expect("should read");

    assert_eq!(caller.runner().calls()[0], vec!["pkexec", "aa-caller", "-l", "ckpt-7"]);
}

#[tokio::test]
async fn missing_files_are_skipped_when_opening() {
    let dir = tempfile::tempdir().expect("tempdir");
    let present = dir.path().join("audit.log");
    std::fs::write(&present, format!("{KERNEL_LINE}\n")).expect("write");
    let missing = dir.path().join("absent.log");

    let mut reader = LogReader::open(caller(ScriptedRunner::new()), &[present, missing]);

    assert_eq!(reader.sources().len(), 1);
    assert_eq!(reader.read_logs().await.expect("should read").len(), 1);
}

#[test]
fn fetch_output_with_only_a_checkpoint_has_no_records() {
    let fetch = AuditFetch::from_output("ckpt-2\n", &Checkpoint::empty());
    assert_eq!(fetch.checkpoint.as_str(), "ckpt-2");
    assert!(fetch.records().expect("should parse").is_empty());
}
