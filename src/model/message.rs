//! The canonical per-message record handed to the page generator.

use chrono::{DateTime, Utc};

use super::address::EmailAddress;
use super::attachment::AttachmentDescriptor;
use super::stats::SanitizationStats;

/// Ordered header list with case-insensitive lookup.
///
/// Duplicate names are preserved in their original order
/// (`Received:` usually appears many times).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any earlier value with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in order of appearance.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How the body of a record must be treated downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    /// Plain text; must be escaped before embedding.
    Text,
    /// Sanitized HTML; safe to embed as-is.
    Markup,
    /// No displayable body (attachment-only message).
    None,
}

/// One fully processed message.
///
/// Built once per message by the pipeline and never mutated after it is
/// handed over to the consumer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageRecord {
    /// Sequential id within the run (1, 2, 3, …).
    pub id: u64,

    /// Byte offset of the message inside the MBOX file.
    pub offset: u64,

    /// Decoded headers.
    pub headers: HeaderMap,

    /// Decoded subject line.
    pub subject: String,

    /// Sender (first `From:` header).
    pub from: EmailAddress,

    /// Primary recipients (`To:`).
    pub to: Vec<EmailAddress>,

    /// Parsed `Date:` header, if it could be understood.
    pub date: Option<DateTime<Utc>>,

    /// Body classification after sniffing.
    pub body_kind: BodyKind,

    /// Body content: sanitized HTML for `Markup`, raw text for `Text`,
    /// empty for `None`.
    pub body: String,

    /// Short plain-text preview for listings.
    pub preview: String,

    /// Stored attachments, in MIME order.
    pub attachments: Vec<AttachmentDescriptor>,

    /// What the sanitizer and decoder removed or failed on.
    pub stats: SanitizationStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.push("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("subject"), None);
    }

    #[test]
    fn test_duplicates_preserved_in_order() {
        let mut headers = HeaderMap::new();
        headers.push("Received", "first");
        headers.push("Subject", "s");
        headers.push("received", "second");
        let all: Vec<&str> = headers.get_all("RECEIVED").collect();
        assert_eq!(all, vec!["first", "second"]);
        assert_eq!(headers.get("received"), Some("first"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_body_kind_serializes_lowercase() {
        let json = serde_json::to_string(&BodyKind::Markup).expect("serialize");
        assert_eq!(json, "\"markup\"");
    }
}
