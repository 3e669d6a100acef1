//! Pipeline driver: MBOX scanning → MIME decoding → classification →
//! attachment extraction and HTML sanitizing → [`MessageRecord`].
//!
//! The pipeline is a pull-based iterator. One message is read, processed and
//! handed to the caller before the next one is read, so memory use does not
//! grow with the size of the archive.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn, warn_span};

use crate::config::Config;
use crate::error::Result;
use crate::model::address::EmailAddress;
use crate::model::message::{BodyKind, MessageRecord};
use crate::model::stats::SanitizationStats;
use crate::parser::classify;
use crate::parser::header;
use crate::parser::mbox::{MboxReader, RawMessage};
use crate::parser::mime::{self, MimePart};
use crate::sanitize::Sanitizer;
use crate::store::attachment::AttachmentStore;

/// Lazy sequence of processed messages.
///
/// Per-message problems never stop the iteration; they are logged and
/// counted in the record's [`SanitizationStats`]. Only a read error on the
/// container itself is yielded as `Err`, after which iteration ends.
pub struct Pipeline<R = BufReader<File>> {
    reader: MboxReader<R>,
    config: Config,
    sanitizer: Sanitizer,
    store: AttachmentStore,
    totals: SanitizationStats,
    processed: u64,
    total_bytes: u64,
}

impl Pipeline<BufReader<File>> {
    /// Open an MBOX file. Failing to open it is the only fatal error of a run.
    pub fn open(
        mbox_path: impl AsRef<Path>,
        config: &Config,
        output_root: impl AsRef<Path>,
    ) -> Result<Self> {
        let mbox_path = mbox_path.as_ref();
        let reader = MboxReader::open(mbox_path, &config.parser)?;
        let total_bytes = std::fs::metadata(mbox_path).map(|m| m.len()).unwrap_or(0);

        info!(
            path = %mbox_path.display(),
            size = total_bytes,
            "Starting conversion"
        );

        let mut pipeline = Self::with_reader(reader, config, output_root);
        pipeline.total_bytes = total_bytes;
        Ok(pipeline)
    }
}

impl<R: BufRead> Pipeline<R> {
    /// Build a pipeline over an already opened scanner.
    pub fn with_reader(
        reader: MboxReader<R>,
        config: &Config,
        output_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            reader,
            sanitizer: Sanitizer::new(config.sanitize.clone()),
            store: AttachmentStore::new(
                output_root.as_ref(),
                config.output.attachments_dirname.clone(),
            ),
            config: config.clone(),
            totals: SanitizationStats::default(),
            processed: 0,
            total_bytes: 0,
        }
    }

    /// Run-wide statistics of all records produced so far.
    pub fn totals(&self) -> SanitizationStats {
        self.totals
    }

    /// Number of records produced so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Bytes of the container consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.reader.bytes_read()
    }

    /// Size of the container file, or 0 when reading from a stream.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Turn one raw message into its canonical record. Never fails.
    pub fn process_message(&self, raw: RawMessage) -> MessageRecord {
        let id = raw.sequence;
        let offset = raw.offset;
        let _span = warn_span!("message", message_id = id, offset).entered();

        let root = mime::parse_message(&raw.bytes, self.config.parser.max_part_depth);
        drop(raw);
        let headers = header::decode_headers(&root.headers);

        let selection = classify::select_body(&root, self.config.parser.sniff_window);
        let mut stats = SanitizationStats {
            decode_failures: selection.decode_failures,
            ..SanitizationStats::default()
        };
        if selection.decode_failures > 0 {
            warn!(
                message_id = id,
                category = "decode",
                failures = selection.decode_failures,
                "Some MIME parts could not be decoded"
            );
        }

        let body = match selection.kind {
            BodyKind::Markup => {
                let sanitized = self.sanitizer.sanitize(&selection.content);
                stats += sanitized.stats;
                sanitized.html
            }
            BodyKind::Text => selection.content,
            BodyKind::None => String::new(),
        };

        let mut attachments = Vec::new();
        for (i, part) in attachment_parts(&root, selection.kind).into_iter().enumerate() {
            match self.store.persist(id, i + 1, part) {
                Ok(descriptor) => attachments.push(descriptor),
                Err(e) => {
                    stats.attachment_failures += 1;
                    warn!(
                        message_id = id,
                        category = e.category(),
                        error = %e,
                        "Attachment omitted"
                    );
                }
            }
        }

        let preview = make_preview(selection.kind, &body, self.config.output.preview_length);

        MessageRecord {
            id,
            offset,
            subject: headers.get("subject").unwrap_or("").trim().to_string(),
            from: headers
                .get("from")
                .map(EmailAddress::parse)
                .unwrap_or_default(),
            to: headers
                .get_all("to")
                .flat_map(EmailAddress::parse_list)
                .collect(),
            date: headers.get("date").and_then(header::parse_date),
            headers,
            body_kind: selection.kind,
            body,
            preview,
            attachments,
            stats,
        }
    }
}

impl<R: BufRead> Iterator for Pipeline<R> {
    type Item = Result<MessageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.reader.next()? {
            Ok(raw) => raw,
            Err(e) => {
                warn!(category = e.category(), error = %e, "Stopped reading the MBOX file");
                return Some(Err(e));
            }
        };

        let record = self.process_message(raw);

        // Single accumulation point for the run-wide statistics
        self.totals += record.stats;
        self.processed += 1;

        let interval = self.config.output.progress_interval;
        if interval > 0 && self.processed % interval == 0 {
            info!(
                processed = self.processed,
                bytes_read = self.bytes_read(),
                total_bytes = self.total_bytes,
                "Progress"
            );
        }

        Some(Ok(record))
    }
}

/// Plain-text preview: HTML stripped, whitespace collapsed, cut to `max_chars`.
fn make_preview(kind: BodyKind, body: &str, max_chars: usize) -> String {
    let text = match kind {
        BodyKind::Markup => mime::html_to_text(body),
        BodyKind::Text => body.to_string(),
        BodyKind::None => return String::new(),
    };
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

/// Parts to store as attachment files.
///
/// For a single-part message the body itself is the attachment when it has
/// no displayable kind.
fn attachment_parts(root: &MimePart, kind: BodyKind) -> Vec<&MimePart> {
    if root.is_multipart() {
        root.leaves()
            .into_iter()
            .filter(|part| part.is_attachment())
            .collect()
    } else if kind == BodyKind::None && !root.is_failed() {
        vec![root]
    } else {
        Vec::new()
    }
}
