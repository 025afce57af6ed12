//! Unit tests for the JSONL event log writer.

use std::fs;

use agent_fleet::events::{EventLogger, JsonlEventWriter};
use agent_fleet::models::event::{types, EventPriority, OrchestratorEvent};
use chrono::Utc;

fn event(event_type: &str) -> OrchestratorEvent {
    OrchestratorEvent::new(event_type, EventPriority::Warning, "app-1", "app", "ci broke")
        .with_data("attempt", 1)
}

#[test]
fn creates_log_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_dir = dir.path().join("events");

    JsonlEventWriter::new(log_dir.clone()).expect("writer");

    assert!(log_dir.is_dir());
}

#[test]
fn appends_one_json_object_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");

    writer.log_event(&event(types::CI_FAILING)).expect("first");
    writer.log_event(&event(types::MERGE_CONFLICTS)).expect("second");

    let path = writer.path_for(Utc::now().date_naive());
    let content = fs::read_to_string(&path).expect("log file");
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
    assert_eq!(first["type"], "ci.failing");
    assert_eq!(first["priority"], "warning");
    assert_eq!(first["session_id"], "app-1");
    assert_eq!(first["data"]["attempt"], 1);
}

#[test]
fn file_name_carries_the_date() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");
    let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 14).expect("date");

    let path = writer.path_for(date);

    assert_eq!(
        path.file_name().and_then(|n| n.to_str()),
        Some("events-2026-03-14.jsonl")
    );
}

#[test]
fn events_get_distinct_ids() {
    let a = event(types::CI_FAILING);
    let b = event(types::CI_FAILING);
    assert_ne!(a.id, b.id);
}

#[test]
fn writer_reopens_existing_file_in_append_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");
        writer.log_event(&event(types::CI_FAILING)).expect("write");
    }
    let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");
    writer.log_event(&event(types::CI_FAILING)).expect("write");

    let content =
        fs::read_to_string(writer.path_for(Utc::now().date_naive())).expect("log file");
    assert_eq!(content.lines().count(), 2, "second writer must not truncate");
}

#[test]
fn event_is_filed_under_its_own_timestamp() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");
    let mut late = event(types::CI_FAILING);
    late.timestamp = "2026-03-14T23:59:59Z".parse().expect("timestamp");

    writer.log_event(&late).expect("write");
    writer.log_event(&event(types::MERGE_CONFLICTS)).expect("write today");

    let day = chrono::NaiveDate::from_ymd_opt(2026, 3, 14).expect("date");
    let filed = writer.read_day(day).expect("read");
    assert_eq!(filed.len(), 1);
    assert_eq!(filed[0].id, late.id);
    assert_eq!(filed[0].event_type, types::CI_FAILING);
}

#[test]
fn read_day_skips_malformed_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");
    let first = event(types::CI_FAILING);
    writer.log_event(&first).expect("write");
    let path = writer.path_for(first.timestamp.date_naive());
    let mut content = fs::read_to_string(&path).expect("log file");
    content.push_str("{truncated\n\n");
    fs::write(&path, content).expect("corrupt");
    writer.log_event(&event(types::MERGE_CONFLICTS)).expect("write after");

    let events = writer.read_day(first.timestamp.date_naive()).expect("read");

    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, [types::CI_FAILING, types::MERGE_CONFLICTS]);
}

#[test]
fn read_day_without_file_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(dir.path().to_path_buf()).expect("writer");
    let day = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).expect("date");

    assert!(writer.read_day(day).expect("read").is_empty());
}

#[test]
fn unwritable_directory_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("file");
    fs::write(&blocker, "x").expect("file");

    let err = JsonlEventWriter::new(blocker.join("events"))
        .err()
        .expect("cannot create under a file");

    assert!(err.to_string().starts_with("io: failed to create event log directory"));
}
