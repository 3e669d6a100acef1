//! Offline HTML archive: one page per message plus a searchable index.
//!
//! Layout under the output directory:
//!
//! ```text
//! index.html
//! emails/{id}.html
//! attachments/{id}/{filename}
//! ```
//!
//! Markup bodies arrive already sanitized and are embedded as-is; text bodies
//! are escaped here.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use humansize::{format_size, BINARY};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ArchiveError;
use crate::model::message::{BodyKind, MessageRecord};
use crate::model::stats::SanitizationStats;

const PAGE_STYLE: &str = "body{font-family:sans-serif;max-width:60em;margin:1em auto;padding:0 1em}\
table.headers td{padding:2px 8px;vertical-align:top}\
table.headers td:first-child{color:#666;text-align:right}\
.body-text pre{white-space:pre-wrap;font-family:inherit}\
.attachments{border-top:1px solid #ccc;margin-top:1em;padding-top:.5em}\
.stats{color:#888;font-size:small}\
#list tr.hidden{display:none}\
#list td{padding:2px 8px}";

/// One row of the index page.
#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub id: u64,
    pub subject: String,
    pub from: String,
    pub date: Option<String>,
    pub preview: String,
    pub attachments: usize,
    pub href: String,
}

impl IndexEntry {
    fn from_record(record: &MessageRecord, href: String) -> Self {
        Self {
            id: record.id,
            subject: record.subject.clone(),
            from: record.from.name().to_string(),
            date: record.date.map(|d| d.format("%Y-%m-%d %H:%M").to_string()),
            preview: record.preview.clone(),
            attachments: record.attachments.len(),
            href,
        }
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStats {
    pub messages: u64,
    pub attachments: u64,
    pub attachment_bytes: u64,
    pub index_path: PathBuf,
}

/// Writes message pages as records arrive, then the index.
///
/// Only the small [`IndexEntry`] summaries are kept between messages.
pub struct HtmlExporter {
    root: PathBuf,
    emails_dirname: String,
    wrapper_class: String,
    entries: Vec<IndexEntry>,
    stats: ExportStats,
}

impl HtmlExporter {
    /// Prepare the output directory.
    pub fn create(root: impl Into<PathBuf>, config: &Config) -> anyhow::Result<Self> {
        let root = root.into();
        let emails = root.join(&config.output.emails_dirname);
        fs::create_dir_all(&emails).map_err(|e| ArchiveError::io(&emails, e))?;
        Ok(Self {
            root,
            emails_dirname: config.output.emails_dirname.clone(),
            wrapper_class: config.sanitize.wrapper_class.clone(),
            entries: Vec::new(),
            stats: ExportStats::default(),
        })
    }

    /// Output directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the page of one message.
    pub fn write_message(&mut self, record: &MessageRecord) -> anyhow::Result<PathBuf> {
        let name = format!("{}.html", record.id);
        let path = self.root.join(&self.emails_dirname).join(&name);
        let page = render_message(record, &self.wrapper_class);
        write_file(&path, &page)?;

        self.stats.messages += 1;
        self.stats.attachments += record.attachments.len() as u64;
        self.stats.attachment_bytes += record.attachments.iter().map(|a| a.size).sum::<u64>();
        self.entries.push(IndexEntry::from_record(
            record,
            format!("{}/{}", url_escape(&self.emails_dirname), name),
        ));
        debug!(message_id = record.id, path = %path.display(), "Wrote message page");
        Ok(path)
    }

    /// Write `index.html` and return the export summary.
    pub fn finish(mut self, totals: &SanitizationStats) -> anyhow::Result<ExportStats> {
        let path = self.root.join("index.html");
        let page = render_index(&self.entries, totals)?;
        write_file(&path, &page)?;
        info!(
            path = %path.display(),
            messages = self.stats.messages,
            "Wrote archive index"
        );
        self.stats.index_path = path;
        Ok(self.stats)
    }
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    let file = fs::File::create(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(contents.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|e| ArchiveError::io(path, e))?;
    Ok(())
}

/// Render the standalone page of one message.
pub fn render_message(record: &MessageRecord, wrapper_class: &str) -> String {
    let subject = if record.subject.is_empty() {
        "(no subject)"
    } else {
        record.subject.as_str()
    };

    let mut html = String::with_capacity(record.body.len() + 2048);
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{}</title>", escape_html(subject)));
    html.push_str(&format!("<style>{PAGE_STYLE}</style></head><body>\n"));
    html.push_str("<p><a href=\"../index.html\">&larr; Index</a></p>\n");
    html.push_str(&format!("<h1>{}</h1>\n<table class=\"headers\">", escape_html(subject)));

    let from = if record.from.display_name.is_empty() {
        record.from.address.clone()
    } else {
        format!("{} <{}>", record.from.display_name, record.from.address)
    };
    push_header_row(&mut html, "From", &from);
    if !record.to.is_empty() {
        let to = record
            .to
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        push_header_row(&mut html, "To", &to);
    }
    if let Some(cc) = record.headers.get("cc") {
        push_header_row(&mut html, "Cc", cc);
    }
    match record.date {
        Some(date) => push_header_row(&mut html, "Date", &date.to_rfc2822()),
        None => {
            if let Some(raw) = record.headers.get("date") {
                push_header_row(&mut html, "Date", raw);
            }
        }
    }
    html.push_str("</table>\n");

    match record.body_kind {
        BodyKind::Markup => {
            html.push_str(&format!(
                "<div class=\"{}\">{}</div>\n",
                escape_html(wrapper_class),
                record.body
            ));
        }
        BodyKind::Text => {
            html.push_str("<div class=\"body-text\"><pre>");
            html.push_str(&linkify(&escape_html(&record.body)));
            html.push_str("</pre></div>\n");
        }
        BodyKind::None => {
            html.push_str("<p><em>(no message body)</em></p>\n");
        }
    }

    if !record.attachments.is_empty() {
        html.push_str("<div class=\"attachments\"><h2>Attachments</h2><ul>\n");
        for att in &record.attachments {
            html.push_str(&format!(
                "<li><a href=\"../{}\">{}</a> ({}, {})</li>\n",
                url_escape(&att.location.href()),
                escape_html(&att.filename),
                escape_html(&att.media_type),
                format_size(att.size, BINARY)
            ));
        }
        html.push_str("</ul></div>\n");
    }

    let removed = record.stats.total_removed();
    if removed > 0 {
        html.push_str(&format!(
            "<p class=\"stats\">{removed} element(s) removed for offline viewing.</p>\n"
        ));
    }

    html.push_str("</body></html>\n");
    html
}

fn push_header_row(html: &mut String, name: &str, value: &str) {
    html.push_str(&format!(
        "<tr><td>{name}</td><td>{}</td></tr>",
        escape_html(value)
    ));
}

/// Render `index.html` with an embedded JSON summary and a search box.
pub fn render_index(entries: &[IndexEntry], totals: &SanitizationStats) -> anyhow::Result<String> {
    // A literal `<` inside the JSON could close the script element
    let json = serde_json::to_string(entries)?.replace('<', "\\u003c");

    let mut html = String::with_capacity(entries.len() * 256 + 4096);
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Mail archive</title>");
    html.push_str(&format!("<style>{PAGE_STYLE}</style></head><body>\n"));
    html.push_str(&format!(
        "<h1>Mail archive</h1>\n<p>{} message(s). Removed: {} script(s), {} tracking pixel(s), {} external image(s), {} style block(s).</p>\n",
        entries.len(),
        totals.scripts_removed,
        totals.tracking_pixels_removed,
        totals.external_images_removed,
        totals.style_blocks_removed
    ));
    html.push_str("<input id=\"q\" type=\"search\" placeholder=\"Search\" autofocus>\n<table id=\"list\">\n");
    for entry in entries {
        let subject = if entry.subject.is_empty() {
            "(no subject)"
        } else {
            entry.subject.as_str()
        };
        html.push_str(&format!(
            "<tr data-id=\"{}\"><td>{}</td><td>{}</td><td><a href=\"{}\">{}</a></td><td>{}</td></tr>\n",
            entry.id,
            escape_html(entry.date.as_deref().unwrap_or("")),
            escape_html(&entry.from),
            entry.href,
            escape_html(subject),
            if entry.attachments > 0 { "&#128206;" } else { "" }
        ));
    }
    html.push_str("</table>\n");
    html.push_str("<script id=\"index-data\" type=\"application/json\">");
    html.push_str(&json);
    html.push_str("</script>\n<script>\n");
    html.push_str(
        "const data=JSON.parse(document.getElementById('index-data').textContent);\n\
const rows=document.querySelectorAll('#list tr');\n\
const text=data.map(e=>[e.subject,e.from,e.preview,e.date||''].join(' ').toLowerCase());\n\
document.getElementById('q').addEventListener('input',ev=>{\n\
const q=ev.target.value.toLowerCase();\n\
rows.forEach((r,i)=>r.classList.toggle('hidden',q!==''&&!text[i].includes(q)));\n\
});\n",
    );
    html.push_str("</script>\n</body></html>\n");
    Ok(html)
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://[^\s<>&\x22']+(?:&amp;[^\s<>&\x22']+)*")
            .expect("url regex is valid")
    })
}

/// Turn bare URLs in already escaped text into links.
fn linkify(escaped: &str) -> String {
    url_regex()
        .replace_all(escaped, |caps: &regex::Captures<'_>| {
            let url = caps[0].trim_end_matches(['.', ',', ')', ';']);
            let rest = &caps[0][url.len()..];
            format!("<a href=\"{url}\" rel=\"noreferrer\">{url}</a>{rest}")
        })
        .into_owned()
}

/// Percent-encode a relative URL path, keeping `/` separators.
fn url_escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::EmailAddress;
    use crate::model::attachment::{AttachmentDescriptor, StorageLocation};
    use crate::model::message::HeaderMap;

    fn record(kind: BodyKind, body: &str) -> MessageRecord {
        MessageRecord {
            id: 4,
            offset: 0,
            headers: HeaderMap::new(),
            subject: "Q&A".into(),
            from: EmailAddress::parse("Ana <ana@example.com>"),
            to: vec![],
            date: None,
            body_kind: kind,
            body: body.into(),
            preview: String::new(),
            attachments: vec![],
            stats: SanitizationStats::default(),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_text_body_is_escaped() {
        let page = render_message(&record(BodyKind::Text, "<b>not bold</b>"), "body-html");
        assert!(page.contains("&lt;b&gt;not bold&lt;/b&gt;"));
        assert!(page.contains("<title>Q&amp;A</title>"));
    }

    #[test]
    fn test_markup_body_is_embedded() {
        let page = render_message(&record(BodyKind::Markup, "<p>Hi</p>"), "body-html");
        assert!(page.contains("<div class=\"body-html\"><p>Hi</p></div>"));
    }

    #[test]
    fn test_attachment_links_use_location() {
        let mut rec = record(BodyKind::None, "");
        rec.attachments.push(AttachmentDescriptor {
            filename: "a b.pdf".into(),
            media_type: "application/pdf".into(),
            size: 2048,
            location: StorageLocation::new("attachments/4/a b.pdf"),
        });
        let page = render_message(&rec, "body-html");
        assert!(page.contains("href=\"../attachments/4/a%20b.pdf\""));
        assert!(page.contains("2 KiB"));
    }

    #[test]
    fn test_linkify() {
        assert_eq!(
            linkify("see https://example.com/x."),
            "see <a href=\"https://example.com/x\" rel=\"noreferrer\">https://example.com/x</a>."
        );
    }

    #[test]
    fn test_index_json_cannot_close_script() {
        let entry = IndexEntry {
            id: 1,
            subject: "</script><script>alert(1)".into(),
            from: String::new(),
            date: None,
            preview: String::new(),
            attachments: 0,
            href: "emails/1.html".into(),
        };
        let page = render_index(&[entry], &SanitizationStats::default()).expect("render");
        assert!(!page.contains("</script><script>alert(1)"));
        assert!(page.contains("&lt;/script&gt;"));
    }
}
