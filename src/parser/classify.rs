//! Body classification: declared type first, content sniffing second.
//!
//! Both stages produce a [`BodyKind`], so code after this point never looks
//! at raw `Content-Type` strings again.

use tracing::{debug, warn};

use crate::model::message::BodyKind;
use crate::parser::mime::{MimePart, PartBody};

/// Lowercase prefixes that only occur in HTML documents or fragments.
const MARKUP_INDICATORS: &[&str] = &[
    "<!doctype", "<html", "<head", "<body", "<div", "<table", "<style",
];

impl BodyKind {
    /// First stage: map a declared media type to a body kind.
    pub fn from_declared(mime_type: &str) -> Self {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if mime_type == "text/html" || mime_type == "application/xhtml+xml" {
            Self::Markup
        } else if mime_type.is_empty() || mime_type.starts_with("text/") {
            Self::Text
        } else {
            Self::None
        }
    }
}

/// `true` if the first `window` bytes of `text` contain an HTML indicator.
pub fn looks_like_markup(text: &str, window: usize) -> bool {
    let mut end = window.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let head = text[..end].to_ascii_lowercase();
    MARKUP_INDICATORS.iter().any(|marker| head.contains(marker))
}

/// Second stage: a `Text` body that contains markup becomes `Markup`.
pub fn classify(declared: BodyKind, content: &str, window: usize) -> BodyKind {
    match declared {
        BodyKind::Text if looks_like_markup(content, window) => {
            debug!("Text body contains HTML markers, treating as markup");
            BodyKind::Markup
        }
        other => other,
    }
}

/// Chosen body of a message, before sanitizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySelection {
    /// Final body kind.
    pub kind: BodyKind,
    /// Decoded body, unescaped. Empty for [`BodyKind::None`].
    pub content: String,
    /// Body candidates or parts that could not be decoded.
    pub decode_failures: u64,
}

impl BodySelection {
    fn none(decode_failures: u64) -> Self {
        Self {
            kind: BodyKind::None,
            content: String::new(),
            decode_failures,
        }
    }
}

/// Pick the displayable body of a parsed message.
///
/// A single-part message is routed by its top-level declared type alone,
/// then sniffed. A multipart message prefers the first inline `text/html`
/// leaf, then the first inline `text/*` leaf.
pub fn select_body(root: &MimePart, window: usize) -> BodySelection {
    match &root.body {
        PartBody::Failed(reason) => {
            warn!(category = "decode", reason = %reason, "Message body could not be decoded");
            BodySelection {
                kind: BodyKind::from_declared(root.content_type.ctype()),
                content: String::new(),
                decode_failures: 1,
            }
        }
        PartBody::Leaf(_) => {
            let declared = BodyKind::from_declared(root.content_type.ctype());
            if declared == BodyKind::None {
                return BodySelection::none(0);
            }
            match root.decoded_text() {
                Ok(content) => BodySelection {
                    kind: classify(declared, &content, window),
                    content,
                    decode_failures: 0,
                },
                Err(e) => {
                    warn!(category = e.category(), error = %e, "Message body could not be decoded");
                    BodySelection {
                        kind: declared,
                        content: String::new(),
                        decode_failures: 1,
                    }
                }
            }
        }
        PartBody::Multipart(_) => select_from_leaves(root, window),
    }
}

fn select_from_leaves(root: &MimePart, window: usize) -> BodySelection {
    let leaves = root.leaves();
    let mut failures = leaves.iter().filter(|part| part.is_failed()).count() as u64;

    let inline: Vec<&MimePart> = leaves
        .into_iter()
        .filter(|part| !part.is_failed() && !part.is_attachment())
        .collect();

    let preferences = [BodyKind::Markup, BodyKind::Text];
    for wanted in preferences {
        for part in inline
            .iter()
            .filter(|part| BodyKind::from_declared(part.content_type.ctype()) == wanted)
        {
            match part.decoded_text() {
                Ok(content) => {
                    return BodySelection {
                        kind: classify(wanted, &content, window),
                        content,
                        decode_failures: failures,
                    };
                }
                Err(e) => {
                    warn!(category = e.category(), error = %e, "Skipping undecodable body part");
                    failures += 1;
                }
            }
        }
    }

    BodySelection::none(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mime::parse_message;

    #[test]
    fn test_from_declared() {
        assert_eq!(BodyKind::from_declared("text/html"), BodyKind::Markup);
        assert_eq!(BodyKind::from_declared("TEXT/HTML"), BodyKind::Markup);
        assert_eq!(BodyKind::from_declared("text/plain"), BodyKind::Text);
        assert_eq!(BodyKind::from_declared("text/calendar"), BodyKind::Text);
        assert_eq!(BodyKind::from_declared("image/png"), BodyKind::None);
        assert_eq!(BodyKind::from_declared("application/pdf"), BodyKind::None);
    }

    #[test]
    fn test_looks_like_markup() {
        assert!(looks_like_markup("<!DOCTYPE html><p>x</p>", 8192));
        assert!(looks_like_markup("  <HTML><body>Hi</body></HTML>", 8192));
        assert!(!looks_like_markup("just <b>bold</b> text", 8192));
        assert!(!looks_like_markup("a < b and c > d", 8192));
    }

    #[test]
    fn test_sniff_window_is_bounded() {
        let text = format!("{}<html>", "x".repeat(100));
        assert!(!looks_like_markup(&text, 50));
        assert!(looks_like_markup(&text, 200));
    }

    #[test]
    fn test_sniff_window_on_char_boundary() {
        // 'é' is two bytes; a window of 1 lands inside it
        assert!(!looks_like_markup("é<html>", 1));
    }

    #[test]
    fn test_classify_only_promotes_text() {
        assert_eq!(classify(BodyKind::Text, "<html>", 8192), BodyKind::Markup);
        assert_eq!(classify(BodyKind::Text, "hello", 8192), BodyKind::Text);
        assert_eq!(classify(BodyKind::None, "<html>", 8192), BodyKind::None);
        assert_eq!(classify(BodyKind::Markup, "hello", 8192), BodyKind::Markup);
    }

    #[test]
    fn test_select_single_part_mislabelled_html() {
        let root = parse_message(
            b"Content-Type: text/plain\n\n<html><body>Hi</body></html>",
            100,
        );
        let sel = select_body(&root, 8192);
        assert_eq!(sel.kind, BodyKind::Markup);
        assert_eq!(sel.content, "<html><body>Hi</body></html>");
    }

    #[test]
    fn test_select_single_part_other_type() {
        let root = parse_message(b"Content-Type: image/png\n\n\x89PNG", 100);
        let sel = select_body(&root, 8192);
        assert_eq!(sel.kind, BodyKind::None);
        assert!(sel.content.is_empty());
    }

    #[test]
    fn test_select_prefers_html_alternative() {
        let raw = b"Content-Type: multipart/alternative; boundary=b\n\n\
--b\n\
Content-Type: text/plain\n\
\n\
plain\n\
--b\n\
Content-Type: text/html\n\
\n\
<p>rich</p>\n\
--b--\n";
        let sel = select_body(&parse_message(raw, 100), 8192);
        assert_eq!(sel.kind, BodyKind::Markup);
        assert_eq!(sel.content, "<p>rich</p>");
    }

    #[test]
    fn test_select_skips_attachments() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n\
--b\n\
Content-Type: text/html\n\
Content-Disposition: attachment; filename=page.html\n\
\n\
<p>attached</p>\n\
--b\n\
Content-Type: text/plain\n\
\n\
body text\n\
--b--\n";
        let sel = select_body(&parse_message(raw, 100), 8192);
        assert_eq!(sel.kind, BodyKind::Text);
        assert_eq!(sel.content, "body text");
    }

    #[test]
    fn test_select_counts_failed_parts() {
        let raw = b"Content-Type: multipart/mixed; boundary=a\n\n\
--a\n\
Content-Type: multipart/mixed; boundary=b\n\
\n\
--b\n\
\n\
too deep\n\
--b--\n\
--a--\n";
        let sel = select_body(&parse_message(raw, 1), 8192);
        assert_eq!(sel.kind, BodyKind::None);
        assert_eq!(sel.decode_failures, 1);
    }
}
