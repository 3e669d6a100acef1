//! MIME structure decoding: headers plus an explicit tree of body parts.
//!
//! `mail-parser` finds the structure; this module turns it into an owned
//! tree whose leaves keep their still-encoded bytes, so large attachments
//! are transfer-decoded in chunks straight into their file. Depth is passed
//! down explicitly and a structure nested deeper than the limit becomes a
//! [`PartBody::Failed`] leaf.

use mail_parser::{Message, MessageParser, MessagePart, MessagePartId, MimeHeaders, PartType};
use tracing::{debug, warn};

use crate::error::{ArchiveError, Result};
use crate::model::message::HeaderMap;
use crate::parser::header::{self, ContentType};
use crate::parser::transfer::{self, TransferEncoding};

/// Body of a MIME part.
#[derive(Debug, Clone)]
pub enum PartBody {
    /// Still transfer-encoded bytes of a single part.
    Leaf(Vec<u8>),
    /// Child parts of a `multipart/*` container, in order.
    Multipart(Vec<MimePart>),
    /// The part could not be decoded; the reason is kept for logging.
    Failed(String),
}

/// One node of the MIME tree.
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Unfolded headers with encoded-words left intact.
    pub headers: HeaderMap,
    /// Declared (or defaulted) content type.
    pub content_type: ContentType,
    /// `Content-Disposition`, if present.
    pub disposition: Option<ContentType>,
    /// Declared transfer encoding.
    pub encoding: TransferEncoding,
    /// Part content.
    pub body: PartBody,
    filename: Option<String>,
}

impl MimePart {
    /// Placeholder for a part that could not be decoded at all.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            headers: HeaderMap::new(),
            content_type: ContentType::default_text(),
            disposition: None,
            encoding: TransferEncoding::SevenBit,
            body: PartBody::Failed(reason.into()),
            filename: None,
        }
    }

    /// A bare text leaf, for input without any recognisable header block.
    fn plain_text(raw: &[u8]) -> Self {
        Self {
            body: PartBody::Leaf(raw.to_vec()),
            ..Self::failed("")
        }
    }

    /// `true` if this part is a multipart container.
    pub fn is_multipart(&self) -> bool {
        matches!(self.body, PartBody::Multipart(_))
    }

    /// `true` if this part could not be decoded.
    pub fn is_failed(&self) -> bool {
        matches!(self.body, PartBody::Failed(_))
    }

    /// Leaf and failed parts in depth-first document order.
    pub fn leaves(&self) -> Vec<&MimePart> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a MimePart>) {
        match &self.body {
            PartBody::Multipart(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            _ => out.push(self),
        }
    }

    /// Declared charset parameter.
    pub fn charset(&self) -> Option<&str> {
        self.content_type.param("charset")
    }

    /// Filename from `Content-Disposition` or the `Content-Type` `name`.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// `true` when the part is not inline displayable body text:
    /// an explicit `attachment` disposition, a filename, or a media type
    /// other than `text/plain` / `text/html`.
    pub fn is_attachment(&self) -> bool {
        if !matches!(self.body, PartBody::Leaf(_)) {
            return false;
        }
        let disposition_attachment = self
            .disposition
            .as_ref()
            .is_some_and(|d| d.ctype() == "attachment");
        disposition_attachment
            || self.filename.is_some()
            || !matches!(self.content_type.ctype(), "text/plain" | "text/html")
    }

    /// Raw (still transfer-encoded) bytes of a leaf.
    pub fn raw_body(&self) -> &[u8] {
        match &self.body {
            PartBody::Leaf(bytes) => bytes,
            _ => &[],
        }
    }

    /// Transfer-decoded bytes of a leaf.
    pub fn decoded_bytes(&self) -> Result<Vec<u8>> {
        match &self.body {
            PartBody::Leaf(bytes) => transfer::decode_to_vec(self.encoding, bytes),
            PartBody::Multipart(_) => Err(ArchiveError::MalformedPart(
                "multipart container has no body of its own".into(),
            )),
            PartBody::Failed(reason) => Err(ArchiveError::Decode(reason.clone())),
        }
    }

    /// Transfer- and charset-decoded text of a leaf.
    pub fn decoded_text(&self) -> Result<String> {
        let bytes = self.decoded_bytes()?;
        Ok(transfer::decode_text(&bytes, self.charset()))
    }
}

/// Parse a complete message (headers + body) into its MIME tree.
///
/// Never fails: structural problems degrade to failed or plain leaves.
pub fn parse_message(raw: &[u8], max_depth: usize) -> MimePart {
    let Some(message) = MessageParser::default().parse(raw) else {
        warn!(
            category = "structure",
            "No header block found, keeping the message as plain text"
        );
        return MimePart::plain_text(raw);
    };

    match build_part(&message, 0, 0, max_depth, &ContentType::default_text()) {
        Ok(part) => part,
        Err(e) => {
            warn!(category = e.category(), error = %e, "Could not decode message structure");
            MimePart::failed(e.to_string())
        }
    }
}

fn build_part(
    message: &Message<'_>,
    id: MessagePartId,
    depth: usize,
    max_depth: usize,
    default_type: &ContentType,
) -> Result<MimePart> {
    let part = message
        .parts
        .get(id)
        .ok_or_else(|| ArchiveError::MalformedPart(format!("part {id} is missing")))?;

    let headers = header::header_map(&message.raw_message, &part.headers);
    let mut content_type = part
        .content_type()
        .filter(|ct| ct.subtype().is_some())
        .map(ContentType::from_parsed)
        .unwrap_or_else(|| default_type.clone());
    let disposition = part.content_disposition().map(ContentType::from_parsed);
    let filename = part
        .attachment_name()
        .map(|name| header::decode_encoded_words(name.trim()))
        .filter(|name| !name.trim().is_empty());
    let encoding = TransferEncoding::parse(part.content_transfer_encoding());

    let body = match &part.body {
        PartType::Multipart(ids) => PartBody::Multipart(build_children(
            message,
            ids,
            &content_type,
            depth,
            max_depth,
        )?),
        _ if content_type.is_multipart() => {
            warn!(
                category = "structure",
                content_type = content_type.ctype(),
                "Multipart without usable boundary, treating body as text"
            );
            content_type = ContentType::default_text();
            PartBody::Leaf(raw_body(message, part).to_vec())
        }
        _ => {
            if part.is_encoding_problem {
                debug!(
                    part = id,
                    "Part did not end where its container expected, kept up to the next boundary"
                );
            }
            PartBody::Leaf(raw_body(message, part).to_vec())
        }
    };

    Ok(MimePart {
        headers,
        content_type,
        disposition,
        encoding,
        body,
        filename,
    })
}

fn build_children(
    message: &Message<'_>,
    ids: &[MessagePartId],
    content_type: &ContentType,
    depth: usize,
    max_depth: usize,
) -> Result<Vec<MimePart>> {
    if depth + 1 > max_depth {
        return Err(ArchiveError::NestingTooDeep {
            depth: depth + 1,
            limit: max_depth,
        });
    }

    // RFC 2046 §5.1.5: parts of a digest default to message/rfc822
    let child_default = if content_type.ctype() == "multipart/digest" {
        ContentType::bare("message/rfc822")
    } else {
        ContentType::default_text()
    };

    let children = ids
        .iter()
        .map(
            |&id| match build_part(message, id, depth + 1, max_depth, &child_default) {
                Ok(part) => part,
                Err(e) => {
                    warn!(
                        category = e.category(),
                        depth = depth + 1,
                        error = %e,
                        "Dropping undecodable MIME part"
                    );
                    MimePart::failed(e.to_string())
                }
            },
        )
        .collect();

    Ok(children)
}

/// The part's body exactly as it appears in the message, still encoded.
///
/// An embedded `message/rfc822` is kept whole this way and stored as is.
fn raw_body<'a>(message: &'a Message<'_>, part: &MessagePart<'_>) -> &'a [u8] {
    message
        .raw_message
        .get(part.offset_body..part.offset_end)
        .unwrap_or_default()
}

/// Convert HTML to readable plain text for previews.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`
/// - Removes scripts and styles
/// - Decodes common HTML entities
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    for tag in &["br", "BR", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{tag} "), "\n<");
        let upper = tag.to_uppercase();
        text = text.replace(&format!("<{upper}>"), "\n");
        text = text.replace(&format!("</{tag}>"), "\n");
        text = text.replace(&format!("</{upper}>"), "\n");
    }

    // Strip all remaining tags
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result = result.replace("&lt;", "<");
    result = result.replace("&gt;", ">");
    result = result.replace("&quot;", "\"");
    result = result.replace("&#39;", "'");
    result = result.replace("&apos;", "'");
    result = result.replace("&nbsp;", " ");
    result = result.replace("&#160;", " ");
    result = result.replace("&amp;", "&");

    // Collapse blank lines into at most one
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
fn remove_tag_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lower = html.to_ascii_lowercase();

    let mut result = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open).map(|i| pos + i) {
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return result,
        }
    }
    result.push_str(&html[pos..]);
    result
}
