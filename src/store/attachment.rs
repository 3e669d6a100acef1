//! Persist attachment parts to disk.
//!
//! Each message gets its own folder, `{root}/{dirname}/{message_id}/`. Bytes
//! are decoded chunk by chunk straight into a buffered file, so a large
//! attachment is never held decoded in memory.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::model::attachment::{AttachmentDescriptor, StorageLocation};
use crate::parser::mime::MimePart;
use crate::parser::transfer;

/// Longest filename kept, in bytes.
const MAX_FILENAME_BYTES: usize = 200;

/// Device names Windows refuses as filenames, whatever the extension.
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Extension for a media type, used when a part carries no filename.
const EXTENSIONS: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/gzip", "gz"),
    ("application/json", "json"),
    ("application/msword", "doc"),
    ("application/vnd.ms-excel", "xls"),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/pgp-signature", "asc"),
    ("application/pkcs7-signature", "p7s"),
    ("application/octet-stream", "bin"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/calendar", "ics"),
    ("text/csv", "csv"),
    ("message/rfc822", "eml"),
    ("audio/mpeg", "mp3"),
    ("video/mp4", "mp4"),
];

/// Writes attachments below an output directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    dirname: String,
}

impl AttachmentStore {
    /// Store attachments under `{root}/{dirname}/`.
    pub fn new(root: impl Into<PathBuf>, dirname: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            dirname: dirname.into(),
        }
    }

    /// Output directory all storage locations are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decode and write one attachment part of message `message_id`.
    ///
    /// `index` is the 1-based position of the attachment within the message
    /// and only names files that carry no filename of their own.
    pub fn persist(
        &self,
        message_id: u64,
        index: usize,
        part: &MimePart,
    ) -> Result<AttachmentDescriptor> {
        let media_type = part.content_type.ctype().to_string();
        let wanted = part
            .filename()
            .and_then(sanitize_filename)
            .unwrap_or_else(|| synthesize_filename(index, &media_type));

        let folder = PathBuf::from(&self.dirname).join(message_id.to_string());
        let folder_abs = self.root.join(&folder);
        let fail = |filename: &str, source: std::io::Error| ArchiveError::Attachment {
            message_id,
            filename: filename.to_string(),
            source,
        };

        fs::create_dir_all(&folder_abs).map_err(|e| fail(&wanted, e))?;

        let path = unique_path(&folder_abs.join(&wanted));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(wanted);

        let size = write_decoded(&path, part).map_err(|e| {
            // Never leave a half-written file behind
            let _ = fs::remove_file(&path);
            fail(&filename, e)
        })?;

        debug!(message_id, filename = %filename, size, "Stored attachment");
        Ok(AttachmentDescriptor {
            location: StorageLocation::new(folder.join(&filename)),
            filename,
            media_type,
            size,
        })
    }
}

fn write_decoded(path: &Path, part: &MimePart) -> std::io::Result<u64> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let size = transfer::decode_into(part.encoding, part.raw_body(), &mut writer)?;
    writer.flush()?;
    Ok(size)
}

/// Make an untrusted filename safe to create on any common filesystem.
///
/// Directory components are dropped, so `../../etc/passwd` becomes `passwd`.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .find(|segment| !segment.trim().is_empty())?;

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        return None;
    }

    let (stem, ext) = match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 16 => {
            (stem, Some(ext))
        }
        _ => (cleaned, None),
    };

    let stem = if RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        format!("_{stem}")
    } else {
        stem.to_string()
    };

    let ext_len = ext.map(|e| e.len() + 1).unwrap_or(0);
    let stem = truncate_bytes(&stem, MAX_FILENAME_BYTES.saturating_sub(ext_len));
    Some(match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    })
}

/// `attachment_{index}.{ext}`, with the extension guessed from the media type.
pub fn synthesize_filename(index: usize, media_type: &str) -> String {
    let media_type = media_type.to_ascii_lowercase();
    let ext = EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == media_type)
        .map(|(_, ext)| (*ext).to_string())
        .or_else(|| {
            media_type
                .split_once('/')
                .map(|(_, sub)| sub)
                .filter(|sub| {
                    !sub.is_empty()
                        && sub.len() <= 10
                        && sub.chars().all(|c| c.is_ascii_alphanumeric())
                })
                .map(str::to_string)
        })
        .unwrap_or_else(|| "bin".to_string());
    format!("attachment_{index}.{ext}")
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut i = 1u64;
    loop {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}
