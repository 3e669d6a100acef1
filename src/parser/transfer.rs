//! Content-Transfer-Encoding and charset decoding.
//!
//! Transfer decoding runs over bounded chunks and can stream straight into
//! a file, so an attachment never needs a second full copy in memory.

use std::io::Write;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use encoding_rs::Encoding;
use tracing::debug;

use crate::error::{ArchiveError, Result};

/// Base64 as found in mail: padding optional, sloppy trailing bits accepted.
pub const MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Size of one decode step, in encoded bytes (a multiple of 4).
pub const DECODE_CHUNK: usize = 64 * 1024;

/// Charset names seen in the wild that `encoding_rs` does not know.
const CHARSET_ALIASES: &[(&str, &str)] = &[
    ("latin-1", "iso-8859-1"),
    ("latin1", "iso-8859-1"),
    ("cp932", "shift_jis"),
    ("ms932", "shift_jis"),
    ("windows-31j", "shift_jis"),
    ("cp936", "gbk"),
    ("ms936", "gbk"),
    ("cp949", "euc-kr"),
    ("ks-c-5601-1987", "euc-kr"),
    ("cp1252", "windows-1252"),
    ("ansi", "windows-1252"),
    ("utf-8-sig", "utf-8"),
];

/// Labels that mean "plain ASCII"; mislabelled UTF-8 is common under them.
const ASCII_LABELS: &[&str] = &["us-ascii", "ascii", "ansi_x3.4-1968", "iso646-us"];

/// Declared `Content-Transfer-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Parse a header value; missing or unknown values mean `7bit`.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::SevenBit;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "7bit" | "" => Self::SevenBit,
            other => {
                debug!(encoding = other, "Unknown transfer encoding, passing through");
                Self::Binary
            }
        }
    }
}

/// Decode `raw` into `out`, returning the number of decoded bytes written.
///
/// Decode errors surface as `io::ErrorKind::InvalidData`.
pub fn decode_into<W: Write>(
    encoding: TransferEncoding,
    raw: &[u8],
    out: &mut W,
) -> std::io::Result<u64> {
    match encoding {
        TransferEncoding::Base64 => decode_base64_into(raw, out),
        TransferEncoding::QuotedPrintable => decode_qp_into(raw, out),
        TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
            for chunk in raw.chunks(DECODE_CHUNK) {
                out.write_all(chunk)?;
            }
            Ok(raw.len() as u64)
        }
    }
}

/// Decode `raw` into a fresh buffer.
pub fn decode_to_vec(encoding: TransferEncoding, raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    decode_into(encoding, raw, &mut out).map_err(|e| ArchiveError::Decode(e.to_string()))?;
    Ok(out)
}

fn decode_base64_into<W: Write>(raw: &[u8], out: &mut W) -> std::io::Result<u64> {
    let mut pending: Vec<u8> = Vec::with_capacity(DECODE_CHUNK.min(raw.len()));
    let mut decoded: Vec<u8> = Vec::with_capacity(DECODE_CHUNK / 4 * 3);
    let mut written = 0u64;
    let mut after_padding = false;

    for &b in raw {
        match b {
            b'=' => after_padding = true,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' => {
                // Data after padding starts a new concatenated blob
                if after_padding {
                    written += flush_base64(&mut pending, &mut decoded, out)?;
                    after_padding = false;
                }
                pending.push(b);
                if pending.len() >= DECODE_CHUNK {
                    written += flush_base64(&mut pending, &mut decoded, out)?;
                }
            }
            // Line breaks, whitespace and stray junk are ignored
            _ => {}
        }
    }

    written += flush_base64(&mut pending, &mut decoded, out)?;
    Ok(written)
}

fn flush_base64<W: Write>(
    pending: &mut Vec<u8>,
    decoded: &mut Vec<u8>,
    out: &mut W,
) -> std::io::Result<u64> {
    // A dangling single character cannot encode a byte
    if pending.len() % 4 == 1 {
        pending.pop();
    }
    if pending.is_empty() {
        return Ok(0);
    }

    decoded.clear();
    MIME_BASE64
        .decode_vec(pending.as_slice(), decoded)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    pending.clear();

    out.write_all(decoded)?;
    Ok(decoded.len() as u64)
}

fn decode_qp_into<W: Write>(raw: &[u8], out: &mut W) -> std::io::Result<u64> {
    let mut written = 0u64;
    let mut rest = raw;

    while !rest.is_empty() {
        let cut = if rest.len() <= DECODE_CHUNK {
            rest.len()
        } else {
            qp_chunk_end(&rest[..DECODE_CHUNK])
        };
        let (chunk, tail) = rest.split_at(cut);
        let decoded = quoted_printable::decode(chunk, quoted_printable::ParseMode::Robust)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        out.write_all(&decoded)?;
        written += decoded.len() as u64;
        rest = tail;
    }

    Ok(written)
}

/// Where to end a quoted-printable chunk taken from the start of `window`.
///
/// The decoder works line by line: it trims trailing blanks and reads `=`
/// as the start of an escape or a soft break. A cut therefore goes after the
/// last line end or, on a line longer than the window, before any trailing
/// blanks and before an `=` among the last two bytes.
fn qp_chunk_end(window: &[u8]) -> usize {
    if let Some(pos) = window.iter().rposition(|&b| b == b'\n') {
        return pos + 1;
    }
    let mut cut = window.len();
    while cut > 0 && matches!(window[cut - 1], b' ' | b'\t') {
        cut -= 1;
    }
    if let Some(eq) = window[cut.saturating_sub(2)..cut]
        .iter()
        .position(|&b| b == b'=')
    {
        cut = cut.saturating_sub(2) + eq;
    }
    if cut == 0 {
        window.len()
    } else {
        cut
    }
}

/// Resolve a charset label, trying common aliases and spelling variants.
pub fn lookup_charset(label: &str) -> Option<&'static Encoding> {
    let normalized = label.trim().trim_matches('"').to_ascii_lowercase();
    if let Some(enc) = Encoding::for_label(normalized.as_bytes()) {
        return Some(enc);
    }

    let variant = normalized
        .strip_prefix("x-")
        .unwrap_or(&normalized)
        .replace('_', "-");
    if let Some(enc) = Encoding::for_label(variant.as_bytes()) {
        return Some(enc);
    }

    CHARSET_ALIASES
        .iter()
        .find(|(alias, _)| *alias == variant)
        .and_then(|(_, target)| Encoding::for_label(target.as_bytes()))
}

/// Decode bytes to text, never failing.
///
/// Fallback chain: declared charset → aliases → UTF-8 when valid →
/// Windows-1252 (which maps every byte).
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    if let Some(label) = charset {
        let is_ascii_label = ASCII_LABELS
            .iter()
            .any(|l| l.eq_ignore_ascii_case(label.trim()));
        if !is_ascii_label {
            if let Some(encoding) = lookup_charset(label) {
                let (text, _, _) = encoding.decode(bytes);
                return text.into_owned();
            }
            debug!(charset = label, "Unknown charset, falling back to UTF-8");
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}
