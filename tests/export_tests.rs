//! End-to-end tests: MBOX file in, HTML archive directory out.

use std::path::Path;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use mboxarchive::config::Config;
use mboxarchive::export::html::HtmlExporter;
use mboxarchive::pipeline::Pipeline;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn export(name: &str, out: &TempDir) -> mboxarchive::export::html::ExportStats {
    let config = Config::default();
    let mut exporter = HtmlExporter::create(out.path(), &config).unwrap();
    let mut pipeline = Pipeline::open(fixture(name), &config, out.path()).unwrap();
    for record in pipeline.by_ref() {
        exporter.write_message(&record.unwrap()).unwrap();
    }
    exporter.finish(&pipeline.totals()).unwrap()
}

// ─── Test 1: archive layout ─────────────────────────────────────────

#[test]
fn test_archive_layout_for_simple_mbox() {
    let out = TempDir::new().unwrap();
    let stats = export("simple.mbox", &out);

    assert_eq!(stats.messages, 5);
    assert_eq!(stats.attachments, 1);
    assert_eq!(stats.index_path, out.path().join("index.html"));

    out.child("index.html").assert(predicate::path::exists());
    for id in 1..=5 {
        out.child(format!("emails/{id}.html"))
            .assert(predicate::path::exists());
    }
    out.child("emails/6.html").assert(predicate::path::missing());
    out.child("attachments/5/attachment_1.png")
        .assert(predicate::path::exists());
}

// ─── Test 2: index content ──────────────────────────────────────────

#[test]
fn test_index_lists_every_message() {
    let out = TempDir::new().unwrap();
    export("simple.mbox", &out);

    let index = out.child("index.html");
    index.assert(predicate::str::contains("5 message(s)"));
    index.assert(predicate::str::contains("<script id=\"index-data\" type=\"application/json\">"));
    index.assert(predicate::str::contains("\"href\":\"emails/3.html\""));
    index.assert(predicate::str::contains("Café con leña"));
    index.assert(predicate::str::contains("José García"));
}

// ─── Test 3: message pages ──────────────────────────────────────────

#[test]
fn test_text_page_is_escaped_and_linkified() {
    let out = TempDir::new().unwrap();
    export("simple.mbox", &out);

    let page = out.child("emails/1.html");
    page.assert(predicate::str::contains("<h1>Hello World</h1>"));
    page.assert(predicate::str::contains(
        "<a href=\"https://example.com/docs\" rel=\"noreferrer\">https://example.com/docs</a>",
    ));
    page.assert(predicate::str::contains("<div class=\"body-text\"><pre>"));
}

#[test]
fn test_reclassified_page_renders_markup() {
    let out = TempDir::new().unwrap();
    export("simple.mbox", &out);

    let page = out.child("emails/3.html");
    page.assert(predicate::str::contains(
        "<div class=\"body-html\"><html><body>Hi</body></html></div>",
    ));
    page.assert(predicate::str::contains("&lt;html&gt;").not());
}

#[test]
fn test_attachment_page_is_offline_safe() {
    let out = TempDir::new().unwrap();
    let stats = export("attachments.mbox", &out);

    assert_eq!(stats.attachments, 2);
    assert_eq!(stats.attachment_bytes, 31 + 12);

    let page = out.child("emails/1.html");
    page.assert(predicate::str::contains("[external image: Logo]"));
    page.assert(predicate::str::contains("src=\"https:").not());
    page.assert(predicate::str::contains("style=\"color:red\"").not());
    page.assert(predicate::str::contains("href=\"../attachments/1/R%C3%A9sum%C3%A9.pdf\""));
    page.assert(predicate::str::contains("3 element(s) removed for offline viewing."));

    out.child("attachments/1/Résumé.pdf")
        .assert(predicate::path::is_file());
    out.child("attachments/1/naïve.txt")
        .assert(predicate::str::diff("naïve notes"));
}

// ─── Test 4: empty input ────────────────────────────────────────────

#[test]
fn test_empty_mbox_still_writes_an_index() {
    let out = TempDir::new().unwrap();
    let stats = export("empty.mbox", &out);

    assert_eq!(stats.messages, 0);
    out.child("index.html")
        .assert(predicate::str::contains("0 message(s)"));
    out.child("emails").assert(predicate::path::is_dir());
}
