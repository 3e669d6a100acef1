//! Descriptors for attachments persisted to disk.
//!
//! The bytes themselves never stay in memory: they are streamed to the
//! attachment store while decoding and only this descriptor is kept.

use std::path::{Path, PathBuf};

/// Where an attachment lives, relative to the archive root.
///
/// This is the only reference the page generator uses to build links;
/// nothing else re-derives the path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StorageLocation {
    relative: PathBuf,
}

impl StorageLocation {
    /// Wrap a path relative to the archive root.
    pub fn new(relative: impl Into<PathBuf>) -> Self {
        Self {
            relative: relative.into(),
        }
    }

    /// Path relative to the archive root.
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    /// Absolute path given the archive root.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.relative)
    }

    /// URL-style reference with forward slashes, for use in `href` attributes.
    pub fn href(&self) -> String {
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Metadata of one stored attachment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AttachmentDescriptor {
    /// Final on-disk filename (sanitized, unique within the message folder).
    pub filename: String,

    /// Declared MIME type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub media_type: String,

    /// Decoded size in bytes.
    pub size: u64,

    /// Storage handle of the written file.
    pub location: StorageLocation,
}
