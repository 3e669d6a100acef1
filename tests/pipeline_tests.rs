//! Integration tests for the scanner, MIME decoding, classification and the pipeline.

use std::path::Path;

use mboxarchive::config::Config;
use mboxarchive::model::message::{BodyKind, MessageRecord};
use mboxarchive::parser::header::{decode_encoded_words, parse_date};
use mboxarchive::parser::mbox::MboxReader;
use mboxarchive::pipeline::Pipeline;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn convert(name: &str, output: &Path) -> (Vec<MessageRecord>, Pipeline) {
    let mut pipeline = Pipeline::open(fixture(name), &Config::default(), output).unwrap();
    let records: Vec<MessageRecord> = pipeline.by_ref().map(|r| r.unwrap()).collect();
    (records, pipeline)
}

// ─── Scanner ────────────────────────────────────────────────────────

#[test]
fn test_scan_simple_mbox_count() {
    let reader = MboxReader::open(fixture("simple.mbox"), &Config::default().parser).unwrap();
    let messages: Vec<_> = reader.map(|m| m.unwrap()).collect();
    assert_eq!(messages.len(), 5, "simple.mbox should contain exactly 5 messages");
    let ids: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_scan_empty_mbox() {
    let reader = MboxReader::open(fixture("empty.mbox"), &Config::default().parser).unwrap();
    assert_eq!(reader.count(), 0);
}

#[test]
fn test_scan_missing_file_is_fatal() {
    let err = Pipeline::open(
        fixture("does-not-exist.mbox"),
        &Config::default(),
        std::env::temp_dir(),
    )
    .err()
    .expect("opening a missing file must fail");
    assert_eq!(err.category(), "io");
}

#[test]
fn test_preamble_crlf_and_truncated_tail() {
    let reader =
        MboxReader::open(fixture("preamble_crlf.mbox"), &Config::default().parser).unwrap();
    let messages: Vec<_> = reader.map(|m| m.unwrap()).collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].bytes, b"Subject: CRLF one\r\n\r\nfirst body\r\n");
    assert_eq!(messages[1].bytes, b"Subject: CRLF two\r\n\r\ntruncated bo");
}

#[test]
fn test_boundary_escaping_round_trip() {
    // Lines that look like boundaries, escaped the mboxrd way by the writer
    let original_body = ["From the start", ">From already quoted", "From  two spaces"];
    let mut mbox = b"From a@x Mon Jan 1 00:00:00 2024\nSubject: q\n\n".to_vec();
    for line in original_body {
        mbox.push(b'>');
        mbox.extend_from_slice(line.as_bytes());
        mbox.push(b'\n');
    }

    let messages: Vec<_> = MboxReader::new(&mbox[..]).map(|m| m.unwrap()).collect();
    assert_eq!(messages.len(), 1);
    let body = String::from_utf8(messages[0].bytes.clone()).unwrap();
    let body_lines: Vec<&str> = body.lines().skip(2).collect();
    assert_eq!(body_lines, original_body);
}

// ─── Records ────────────────────────────────────────────────────────

#[test]
fn test_plain_text_record() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("simple.mbox", dir.path());
    let first = &records[0];
    assert_eq!(first.id, 1);
    assert_eq!(first.offset, 0);
    assert_eq!(first.subject, "Hello World");
    assert_eq!(first.from.display_name, "User One");
    assert_eq!(first.from.address, "user1@example.com");
    assert_eq!(first.headers.get("message-id"), Some("<msg001@example.com>"));
    assert_eq!(first.body_kind, BodyKind::Text);
    assert_eq!(
        first.body,
        "Plain text body.\nSee https://example.com/docs for details.\n"
    );
    assert!(first.date.is_some());
    assert!(first.attachments.is_empty());
}

#[test]
fn test_declared_html_is_markup_and_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("simple.mbox", dir.path());
    let html = &records[1];
    assert_eq!(html.body_kind, BodyKind::Markup);
    assert_eq!(html.body, "<html><body>Hi</body></html>");
    assert!(html.stats.is_zero());
}

#[test]
fn test_mislabelled_html_is_reclassified() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("simple.mbox", dir.path());
    let record = &records[2];
    assert_eq!(record.headers.get("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(record.body_kind, BodyKind::Markup);
    assert_eq!(record.body, "<html><body>Hi</body></html>");
    assert!(!record.body.contains("&lt;"));
    assert_eq!(record.subject, "Café con leña");
    assert_eq!(record.from.display_name, "José García");
}

#[test]
fn test_escaped_from_lines_in_record_body() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("simple.mbox", dir.path());
    assert_eq!(
        records[3].body,
        "Before the quote\nFrom the archive writer\n>From a nested quote\nAfter the quote\n"
    );
}

#[test]
fn test_non_text_single_part_becomes_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("simple.mbox", dir.path());
    let scan = &records[4];
    assert_eq!(scan.body_kind, BodyKind::None);
    assert!(scan.body.is_empty());
    assert_eq!(scan.attachments.len(), 1);
    let att = &scan.attachments[0];
    assert_eq!(att.filename, "attachment_1.png");
    assert_eq!(att.media_type, "image/png");
    assert_eq!(att.size, 8);
    assert!(att.location.resolve(dir.path()).exists());
}

#[test]
fn test_declared_type_mapping_for_single_part() {
    let cases: [(&str, BodyKind); 4] = [
        ("text/html", BodyKind::Markup),
        ("text/plain", BodyKind::Text),
        ("text/csv", BodyKind::Text),
        ("application/octet-stream", BodyKind::None),
    ];
    for (ctype, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        let mbox = format!(
            "From a@x Mon Jan 1 00:00:00 2024\nContent-Type: {ctype}\n\nno markup here\n"
        );
        let mut pipeline = Pipeline::with_reader(
            MboxReader::new(mbox.as_bytes()),
            &Config::default(),
            dir.path(),
        );
        let record = pipeline.next().unwrap().unwrap();
        assert_eq!(record.body_kind, expected, "for {ctype}");
    }
}

#[test]
fn test_attachments_with_encoded_filenames() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("attachments.mbox", dir.path());
    assert_eq!(records.len(), 1);
    let record = &records[0];

    assert_eq!(record.to.len(), 2);
    assert_eq!(record.to[1].display_name, "Doe, Jane");

    let names: Vec<&str> = record.attachments.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(names, vec!["Résumé.pdf", "naïve.txt"]);

    let pdf = &record.attachments[0];
    assert_eq!(pdf.media_type, "application/pdf");
    assert_eq!(pdf.size, 31);
    let bytes = std::fs::read(pdf.location.resolve(dir.path())).unwrap();
    assert_eq!(bytes, b"%PDF-1.4\n% test document\n%%EOF\n");
    assert_eq!(pdf.location.href(), "attachments/1/Résumé.pdf");

    let txt = &record.attachments[1];
    assert_eq!(txt.size, "naïve notes".len() as u64);
}

#[test]
fn test_multipart_html_body_is_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("attachments.mbox", dir.path());
    let record = &records[0];
    assert_eq!(record.body_kind, BodyKind::Markup);
    assert_eq!(
        record.body,
        "<html><body><p>Please find the report attached.</p>\
<span>[external image: Logo]</span></body></html>"
    );
    assert_eq!(record.stats.style_attributes_removed, 1);
    assert_eq!(record.stats.tracking_pixels_removed, 1);
    assert_eq!(record.stats.external_images_removed, 1);
    assert_eq!(record.preview, "Please find the report attached. [external image: Logo]");
}

#[test]
fn test_style_block_and_attributes_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (records, _) = convert("styled.mbox", dir.path());
    let record = &records[0];
    assert_eq!(record.body_kind, BodyKind::Markup);
    assert_eq!(record.stats.style_blocks_removed, 1);
    assert_eq!(record.stats.style_attributes_removed, 10);
    assert!(!record.body.contains("<style"));
    assert!(!record.body.contains("style="));
    assert!(record.body.contains("<span>s9</span>"));
}

#[test]
fn test_totals_are_the_sum_of_records() {
    let dir = tempfile::tempdir().unwrap();
    let (records, pipeline) = convert("attachments.mbox", dir.path());
    let mut expected = mboxarchive::model::stats::SanitizationStats::default();
    for record in &records {
        expected += record.stats;
    }
    assert_eq!(pipeline.totals(), expected);
    assert_eq!(pipeline.processed(), records.len() as u64);
    assert_eq!(pipeline.bytes_read(), pipeline.total_bytes());
}

#[test]
fn test_attachment_write_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the attachments folder should be
    std::fs::write(dir.path().join("attachments"), b"blocked").unwrap();
    let (records, pipeline) = convert("attachments.mbox", dir.path());
    assert_eq!(records.len(), 1);
    assert!(records[0].attachments.is_empty());
    assert_eq!(records[0].stats.attachment_failures, 2);
    assert_eq!(records[0].body_kind, BodyKind::Markup);
    assert_eq!(pipeline.totals().attachment_failures, 2);
}

#[test]
fn test_deep_nesting_is_contained() {
    let mut config = Config::default();
    config.parser.max_part_depth = 3;

    let mut body = String::new();
    let depth = 10;
    for level in 0..depth {
        body.push_str(&format!(
            "--b{level}\nContent-Type: multipart/mixed; boundary=b{}\n\n",
            level + 1
        ));
    }
    body.push_str(&format!("--b{depth}\n\ninnermost\n"));
    let mbox = format!(
        "From a@x Mon Jan 1 00:00:00 2024\nContent-Type: multipart/mixed; boundary=b0\n\n{body}\n\
From b@x Mon Jan 1 00:00:00 2024\nSubject: next\n\nstill processed\n"
    );

    let dir = tempfile::tempdir().unwrap();
    let records: Vec<MessageRecord> =
        Pipeline::with_reader(MboxReader::new(mbox.as_bytes()), &config, dir.path())
            .map(|r| r.unwrap())
            .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].body_kind, BodyKind::None);
    assert_eq!(records[0].stats.decode_failures, 1);
    assert_eq!(records[1].body, "still processed\n");
}

// ─── Header helpers ─────────────────────────────────────────────────

#[test]
fn test_decode_encoded_words_q_iso8859() {
    assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?Caf=E9?="), "Café");
}

#[test]
fn test_date_parsing_formats() {
    assert!(parse_date("Mon, 15 Jan 2024 10:30:00 +0000").is_some());
    assert!(parse_date("15 Jan 2024 10:30:00 GMT").is_some());
    assert!(parse_date("2024-01-15T10:30:00Z").is_some());
    assert!(parse_date("   ").is_none());
}
