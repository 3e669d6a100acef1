//! Centralized error types for mboxarchive.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mboxarchive library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("MBOX file not found: {0}")]
    FileNotFound(PathBuf),

    /// A multipart structure nests deeper than the configured limit.
    #[error("MIME nesting too deep: depth {depth} exceeds limit {limit}")]
    NestingTooDeep { depth: usize, limit: usize },

    /// A MIME part is structurally broken (e.g. multipart without boundary).
    #[error("Malformed MIME part: {0}")]
    MalformedPart(String),

    /// A transfer-encoding could not be decoded.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Persisting an attachment failed.
    #[error("Could not store attachment '{filename}' of message {message_id}: {source}")]
    Attachment {
        message_id: u64,
        filename: String,
        source: std::io::Error,
    },

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short, stable name of the failure category, used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } | Self::FileNotFound(_) | Self::InvalidPath(_) => "io",
            Self::NestingTooDeep { .. } => "nesting",
            Self::MalformedPart(_) => "structure",
            Self::Decode(_) => "decode",
            Self::Attachment { .. } => "attachment",
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare; prefer `ArchiveError::io`).
impl From<std::io::Error> for ArchiveError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
