//! Tests for exporter artifact parsing

use std::fs;

use chrono::NaiveDateTime;
use tempfile::tempdir;
use txt_history_store::ingest::{Artifact, ExportIngester, IngestOptions};
use txt_history_store::models::RawSender;

const CONVERSATION: &str = "\
Jan 01, 2024  10:00:00 AM (Read by you after 1 minute)
+15551234567
hi there
second line

Jan 01, 2024  10:01:00 AM
Me
hello
";

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("valid timestamp")
}

fn ingester() -> ExportIngester {
    ExportIngester::new(IngestOptions::default()).expect("Failed to create ingester")
}

#[test]
fn test_ingest_basic_blocks() {
    let ingester = ingester();
    let artifact = Artifact::from_text("+15551234567.txt", CONVERSATION);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sender, RawSender::Handle("+15551234567".to_string()));
    assert_eq!(records[0].timestamp, at("2024-01-01 10:00:00"));
    assert_eq!(records[0].body.as_deref(), Some("hi there\nsecond line"));
    assert_eq!(records[1].sender, RawSender::Me);
    assert_eq!(records[1].body.as_deref(), Some("hello"));
    assert_eq!(records[1].line, 6);
}

#[test]
fn test_ingest_is_restartable() {
    let ingester = ingester();
    let artifact = Artifact::from_text("+15551234567.txt", CONVERSATION);

    let first: Vec<_> = ingester.ingest(&artifact).collect();
    let second: Vec<_> = ingester.ingest(&artifact).collect();
    assert_eq!(first, second);
}

#[test]
fn test_iso_headers_are_accepted() {
    let ingester = ingester();
    let artifact = Artifact::from_text(
        "+15551234567.txt",
        "2024-01-01T10:00:00\n+15551234567\nhi\n2024-01-01 10:01:00\nMe\nhello\n",
    );
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[1].timestamp, at("2024-01-01 10:01:00"));
}

#[test]
fn test_malformed_headers_are_counted_not_raised() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
+15551234567
one
Feb 30, 2024  10:00:00 AM
+15551234567
lost to the bad header
Jan 02, 2024  09:00:00 AM
Me
two
2024-13-01 10:00:00
Jan 03, 2024  09:00:00 AM
+15551234567
three
";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let mut records = ingester.ingest(&artifact);
    let bodies: Vec<_> = records.by_ref().map(|r| r.body.unwrap_or_default()).collect();

    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert_eq!(records.malformed_skipped(), 2);
    assert_eq!(records.emitted(), 3);
    assert_eq!(records.seen(), 5);
}

#[test]
fn test_header_without_sender_is_malformed() {
    let ingester = ingester();
    let text = "Jan 01, 2024  10:00:00 AM\n\nJan 01, 2024  10:05:00 AM\nMe\nok\n";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let mut records = ingester.ingest(&artifact);

    assert_eq!(records.by_ref().count(), 1);
    assert_eq!(records.malformed_skipped(), 1);
}

#[test]
fn test_orphan_lines_before_first_header_are_malformed() {
    let ingester = ingester();
    let text = "exported by tool v2\n\nJan 01, 2024  10:00:00 AM\nMe\nok\n";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let mut records = ingester.ingest(&artifact);

    assert_eq!(records.by_ref().count(), 1);
    assert_eq!(records.malformed_skipped(), 1);
}

#[test]
fn test_empty_body_is_still_emitted_by_default() {
    let ingester = ingester();
    let text = "Jan 01, 2024  10:00:00 AM\n+15551234567\n\nJan 01, 2024  10:01:00 AM\nMe\nhi\n";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].body, None);
    assert!(!records[0].has_attachment);
}

#[test]
fn test_skip_empty_records_policy() {
    let ingester = ExportIngester::new(IngestOptions {
        skip_empty_records: true,
    })
    .expect("Failed to create ingester");
    let text = "Jan 01, 2024  10:00:00 AM\n+15551234567\n\nJan 01, 2024  10:01:00 AM\nMe\nhi\n";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let mut records = ingester.ingest(&artifact);

    assert_eq!(records.by_ref().count(), 1);
    assert_eq!(records.filtered(), 1);
    assert_eq!(records.seen(), 2);
}

#[test]
fn test_attachments_and_placeholder() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
Me
look at this
/Users/me/exports/p15551234567/attachments/12/IMG_0001.jpeg
Jan 01, 2024  10:02:00 AM
+15551234567
\u{FFFC}
Jan 01, 2024  10:03:00 AM
+15551234567
Sticker from +15551234567: /Users/me/Library/Messages/Stickers/cat.png
";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records.len(), 3);

    assert_eq!(records[0].body.as_deref(), Some("look at this"));
    assert!(records[0].has_attachment);
    assert_eq!(records[0].attachments[0].filename, "IMG_0001.jpeg");
    assert_eq!(records[0].attachments[0].mime_type, "image/jpeg");

    assert_eq!(records[1].body, None);
    assert!(records[1].has_attachment);
    assert!(records[1].attachments.is_empty());

    assert!(records[2].attachments[0].is_sticker);
    assert_eq!(records[2].attachments[0].filename, "cat.png");
}

#[test]
fn test_tapbacks_are_parsed_as_reactions() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
+15551234567
dinner?
Tapbacks:
Loved by Me
Laughed at by +15557654321

Jan 01, 2024  10:01:00 AM
Me
yes
";
    let artifact = Artifact::from_text("group.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records[0].body.as_deref(), Some("dinner?"));
    assert_eq!(records[0].reactions.len(), 2);
    assert_eq!(records[0].reactions[0].kind, "Loved");
    assert_eq!(records[0].reactions[0].reactor, RawSender::Me);
    assert_eq!(records[0].reactions[1].kind, "Laughed at");

    // The reactor is a participant even though they never sent a message
    assert!(records[0].participants.contains(&"+15557654321".to_string()));
}

#[test]
fn test_reply_annotation_is_dropped() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
Me
    This message responded to an earlier message.
    sure thing
";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records[0].body.as_deref(), Some("sure thing"));
}

#[test]
fn test_participants_from_stem_and_senders() {
    let ingester = ingester();
    let text = "Jan 01, 2024  10:00:00 AM\n+15559990000\nhey all\n";
    let artifact = Artifact::from_text("p15551234567.txt", text);
    let participants = ingester.participants(&artifact);

    assert_eq!(
        participants.to_vec(),
        vec!["+15551234567".to_string(), "+15559990000".to_string()]
    );
}

#[test]
fn test_open_missing_file_is_artifact_read_error() {
    let err = Artifact::open(std::path::Path::new("/nonexistent/+15551234567.txt")).unwrap_err();
    assert!(err.is_per_artifact());
}

#[test]
fn test_edit_annotation_stays_out_of_body() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
+15551234567
see you at 5
Edited 2 minutes later: see you at 6
";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].body.as_deref(), Some("see you at 5"));
    assert_eq!(records[0].meta.edited_text.as_deref(), Some("see you at 6"));
    assert_eq!(records[0].meta.edited_after.as_deref(), Some("2 minutes"));
}

#[test]
fn test_unsent_block_is_flagged_not_bodied() {
    let ingester = ExportIngester::new(IngestOptions { skip_empty_records: true })
        .expect("Failed to create ingester");
    let text = "Jan 01, 2024  10:00:00 AM\nMe\nYou unsent a message!\n";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender, RawSender::Me);
    assert_eq!(records[0].body, None);
    assert!(records[0].meta.is_unsent);
}

#[test]
fn test_unsent_notice_after_body_is_its_own_record() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
+15551234567
hello
+15551234567 unsent a message!
Jan 01, 2024  10:02:00 AM
Me
hi
";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let mut records = ingester.ingest(&artifact);
    let parsed: Vec<_> = records.by_ref().collect();

    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].body.as_deref(), Some("hello"));
    assert!(!parsed[0].meta.is_unsent);

    assert_eq!(parsed[1].sender, RawSender::Handle("+15551234567".to_string()));
    assert_eq!(parsed[1].timestamp, at("2024-01-01 10:00:00"));
    assert_eq!(parsed[1].body, None);
    assert_eq!(parsed[1].line, 4);
    assert!(parsed[1].meta.is_unsent);

    assert_eq!(parsed[2].body.as_deref(), Some("hi"));
    assert_eq!(records.emitted(), 3);
    assert_eq!(records.malformed_skipped(), 0);
}

#[test]
fn test_header_receipt_and_effect_are_captured() {
    let ingester = ingester();
    let text = "Jan 01, 2024  10:00:00 AM (Sent with Slam) (Read by them after 2 hours)\nMe\nboom\n";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    assert_eq!(records[0].body.as_deref(), Some("boom"));
    assert_eq!(records[0].meta.expressive_type.as_deref(), Some("Slam"));
    assert_eq!(
        records[0].meta.read_receipt.as_deref(),
        Some("Read by them after 2 hours")
    );
}

#[test]
fn test_reply_threads_follow_indentation() {
    let ingester = ingester();
    let text = "\
Jan 01, 2024  10:00:00 AM
+15551234567
what time?
    Jan 01, 2024  10:01:00 AM
    Me
    noon
        Jan 01, 2024  10:02:00 AM
        +15551234567
        great
    Jan 01, 2024  10:03:00 AM
    Me
    or one
Jan 01, 2024  10:05:00 AM
Me
top level
";
    let artifact = Artifact::from_text("+15551234567.txt", text);
    let records: Vec<_> = ingester.ingest(&artifact).collect();

    let threads: Vec<_> = records
        .iter()
        .map(|r| (r.line, r.meta.indent_level, r.reply_to_line))
        .collect();
    assert_eq!(
        threads,
        vec![
            (1, 0, None),
            (4, 1, Some(1)),
            (7, 2, Some(4)),
            (10, 1, Some(1)),
            (13, 0, None),
        ]
    );
    assert_eq!(records[2].body.as_deref(), Some("great"));
}

#[test]
fn test_byte_order_mark_does_not_hide_first_header() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("+15551234567.txt");
    fs::write(&path, "\u{FEFF}Jan 01, 2024  10:00:00 AM\n+15551234567\nhi\n")
        .expect("Failed to write artifact");

    let artifact = Artifact::open(&path).expect("Failed to open artifact");
    let ingester = ingester();
    let mut records = ingester.ingest(&artifact);
    let parsed: Vec<_> = records.by_ref().collect();

    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].line, 1);
    assert_eq!(records.malformed_skipped(), 0);
}
