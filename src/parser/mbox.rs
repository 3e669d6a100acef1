//! Streaming MBOX boundary scanner.
//!
//! Reads the container line by line through a bounded buffer and yields one
//! [`RawMessage`] at a time. Never loads the entire file into memory.
//! Tolerant of malformed input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::ParserConfig;
use crate::error::{ArchiveError, Result};

/// Bytes that open a new message.
const SEPARATOR: &[u8] = b"From ";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One message as cut out of the container.
///
/// `bytes` holds the headers and body with mboxrd quoting already undone,
/// without the envelope line and without the blank separator line.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Sequential index within the container (1, 2, 3, …).
    pub sequence: u64,
    /// Byte offset of the envelope line.
    pub offset: u64,
    /// The envelope line (`From sender date`) without line ending.
    pub envelope: String,
    /// Unescaped message bytes.
    pub bytes: Vec<u8>,
}

/// Lazy iterator over the messages of an MBOX stream.
///
/// A boundary is a `From ` line at the very start of the stream or right
/// after a blank line. Any other `From ` line is body content. Lines that
/// the writer quoted as `>From ` (or `>>From `, …) lose one `>`.
///
/// - Mixed `\n` and `\r\n` line endings are accepted
/// - Bytes before the first boundary are skipped with a warning
/// - A truncated last message is still emitted
/// - Messages larger than the configured limit are truncated
pub struct MboxReader<R> {
    reader: R,
    source: PathBuf,
    max_message_size: usize,
    line_buf: Vec<u8>,
    current: Option<RawMessage>,
    truncated: bool,
    offset: u64,
    sequence: u64,
    prev_line_was_blank: bool,
    first_line: bool,
    started: bool,
    preamble_bytes: u64,
    done: bool,
}

impl MboxReader<BufReader<File>> {
    /// Open an MBOX file for scanning.
    pub fn open(path: impl AsRef<Path>, config: &ParserConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::FileNotFound(path.to_path_buf())
            } else {
                ArchiveError::io(path, e)
            }
        })?;
        let reader = BufReader::with_capacity(config.read_buffer_size, file);
        let mut scanner = Self::new(reader).with_max_message_size(config.max_message_size);
        scanner.source = path.to_path_buf();
        Ok(scanner)
    }
}

impl<R: BufRead> MboxReader<R> {
    /// Scan any buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            source: PathBuf::from("<stream>"),
            max_message_size: ParserConfig::default().max_message_size,
            line_buf: Vec::with_capacity(4096),
            current: None,
            truncated: false,
            offset: 0,
            sequence: 0,
            prev_line_was_blank: true,
            first_line: true,
            started: false,
            preamble_bytes: 0,
            done: false,
        }
    }

    /// Override the per-message size cap.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Number of bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Start a new message from its envelope line; returns the finished previous one.
    fn begin_message(&mut self, line_offset: u64) -> Option<RawMessage> {
        if !self.started {
            self.started = true;
            if self.preamble_bytes > 0 {
                warn!(
                    skipped = self.preamble_bytes,
                    "Skipped bytes before the first 'From ' separator"
                );
            }
        }

        let line = strip_bom(&self.line_buf);
        let envelope = String::from_utf8_lossy(line).trim_end().to_string();
        self.sequence += 1;
        self.truncated = false;

        let next = RawMessage {
            sequence: self.sequence,
            offset: line_offset,
            envelope,
            bytes: Vec::with_capacity(64 * 1024),
        };
        self.current.replace(next).map(finish_message)
    }

    fn append_body_line(&mut self, line_offset: u64) {
        let msg = match self.current.as_mut() {
            Some(msg) => msg,
            None => {
                self.preamble_bytes += self.line_buf.len() as u64;
                return;
            }
        };

        let line = unescape_from_line(&self.line_buf);
        if msg.bytes.len() + line.len() <= self.max_message_size {
            msg.bytes.extend_from_slice(line);
        } else if !self.truncated {
            // Warn once per message on the first overflow
            self.truncated = true;
            warn!(
                offset = msg.offset,
                line_offset,
                max_size = self.max_message_size,
                "Message exceeds maximum size, truncating body"
            );
        }
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            self.line_buf.clear();
            let line_len = match self.reader.read_until(b'\n', &mut self.line_buf) {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(ArchiveError::io(&self.source, e)));
                }
            };

            if line_len == 0 {
                // EOF: flush the last message
                self.done = true;
                if !self.started && self.preamble_bytes > 0 {
                    warn!(
                        skipped = self.preamble_bytes,
                        "No 'From ' separator found, nothing to read"
                    );
                }
                return self.current.take().map(|m| Ok(finish_message(m)));
            }

            let line_offset = self.offset;
            self.offset += line_len as u64;

            let separator = is_mbox_separator(&self.line_buf, self.first_line);
            let boundary = separator && (!self.started || self.prev_line_was_blank);
            if separator && !boundary {
                debug!(
                    offset = line_offset,
                    "'From ' line without preceding blank line kept as body"
                );
            }

            self.first_line = false;
            self.prev_line_was_blank = !boundary && is_blank_line(&self.line_buf);

            if boundary {
                if let Some(finished) = self.begin_message(line_offset) {
                    return Some(Ok(finished));
                }
            } else {
                self.append_body_line(line_offset);
            }
        }
    }
}

/// Drop the blank line that separates a message from the next envelope.
fn finish_message(mut msg: RawMessage) -> RawMessage {
    if msg.bytes.ends_with(b"\r\n\r\n") {
        msg.bytes.truncate(msg.bytes.len() - 2);
    } else if msg.bytes.ends_with(b"\n\n") {
        msg.bytes.truncate(msg.bytes.len() - 1);
    }
    msg
}

fn strip_bom(line: &[u8]) -> &[u8] {
    line.strip_prefix(UTF8_BOM).unwrap_or(line)
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8], first_line: bool) -> bool {
    let line = if first_line { strip_bom(line) } else { line };
    line.starts_with(SEPARATOR)
}

/// Undo mboxrd quoting: `>From ` → `From `, `>>From ` → `>From `.
fn unescape_from_line(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(SEPARATOR) {
        &line[1..]
    } else {
        line
    }
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
