//! RFC 5322 header handling on top of `mail-parser`: raw field values,
//! encoded-words (RFC 2047), MIME parameters and date parsing.

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::model::message::HeaderMap;
use crate::parser::transfer::{self, MIME_BASE64};

/// Collect the header fields `mail-parser` found into a [`HeaderMap`].
///
/// Values are cut from `raw` and unfolded, with encoded-words left intact so
/// that MIME parameters can be read before anything is expanded.
pub fn header_map(raw: &[u8], fields: &[mail_parser::Header<'_>]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for field in fields {
        let value = raw
            .get(field.offset_start..field.offset_end)
            .unwrap_or_default();
        headers.push(field.name.as_str(), unfold(&decode_header_bytes(value)));
    }
    headers
}

/// Join continuation lines with a single space.
fn unfold(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expand encoded-words in every value.
///
/// Done after unfolding so that encoded-words split over lines join up.
pub fn decode_headers(headers: &HeaderMap) -> HeaderMap {
    let mut decoded = HeaderMap::new();
    for (name, value) in headers.iter() {
        decoded.push(name, decode_encoded_words(value));
    }
    decoded
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// An owned structured header value with parameters.
///
/// Used for both `Content-Type` (`text/html; charset=utf-8`) and
/// `Content-Disposition` (`attachment; filename="a.pdf"`). Built from what
/// `mail-parser` resolved, so RFC 2231 continuations and charsets are
/// already merged into plain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    ctype: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Copy a parsed value. The main value and parameter names are lowercased.
    pub fn from_parsed(parsed: &mail_parser::ContentType<'_>) -> Self {
        let ctype = match parsed.subtype() {
            Some(subtype) => format!("{}/{}", parsed.ctype(), subtype),
            None => parsed.ctype().to_string(),
        };
        let params = parsed
            .attributes()
            .unwrap_or_default()
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect();
        Self {
            ctype: ctype.trim().to_ascii_lowercase(),
            params,
        }
    }

    /// A value without parameters, e.g. the `message/rfc822` digest default.
    pub fn bare(ctype: &str) -> Self {
        Self {
            ctype: ctype.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// The RFC 2045 default: `text/plain; charset=us-ascii`.
    pub fn default_text() -> Self {
        Self {
            ctype: "text/plain".to_string(),
            params: vec![("charset".to_string(), "us-ascii".to_string())],
        }
    }

    /// Main value, e.g. `"multipart/mixed"` or `"attachment"`.
    pub fn ctype(&self) -> &str {
        &self.ctype
    }

    /// `true` for any `multipart/*` type.
    pub fn is_multipart(&self) -> bool {
        self.ctype.starts_with("multipart/")
    }

    /// Look up a parameter by its lowercase name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some(decoded) = try_decode_one_word(after_start) {
            result.push_str(&decoded.text);
            remaining = &remaining[start + 2 + decoded.consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let total_consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => MIME_BASE64.decode(encoded_text.trim()).ok()?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 allows a language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);

    Some(DecodedWord {
        text: transfer::decode_text(&bytes, Some(charset)),
        consumed: total_consumed,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match hex_byte(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [no_dow.clone(), replace_named_tz(&no_dow)];

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M %z",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];

    for candidate in &candidates {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Attempt to parse a date using `mail-parser`'s lenient parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    // Wrap input in a minimal RFC 5322 message so mail-parser can parse it
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = MessageParser::default().parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim().to_string();
            }
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const TZS: [(&str, &str); 11] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    // Drop trailing comments such as "(UTC)"
    let s = match s.find(" (") {
        Some(pos) => &s[..pos],
        None => s,
    };
    for (name, offset) in TZS {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_parser::{MessageParser, MimeHeaders};

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_adjacent_words_drop_whitespace() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        assert_eq!(
            decode_encoded_words("Re: =?UTF-8?B?SG9sYQ==?= there"),
            "Re: Hola there"
        );
    }

    #[test]
    fn test_invalid_encoded_word_kept() {
        assert_eq!(decode_encoded_words("=?bogus"), "=?bogus");
    }

    fn fields(raw: &[u8]) -> HeaderMap {
        let message = MessageParser::default().parse(raw).expect("headers");
        header_map(raw, &message.parts[0].headers)
    }

    fn structured(field: &str, value: &str) -> ContentType {
        let raw = format!("{field}: {value}\n\nbody");
        let message = MessageParser::default()
            .parse(raw.as_bytes())
            .expect("headers");
        let parsed = if field.eq_ignore_ascii_case("content-disposition") {
            message.content_disposition()
        } else {
            message.content_type()
        };
        ContentType::from_parsed(parsed.expect("structured value"))
    }

    #[test]
    fn test_header_map_unfolds_and_decodes() {
        let raw = b"Subject: =?UTF-8?Q?Caf=C3=A9?=\n\tcon leche\nX-Dup: 1\nx-dup: 2\nnot a header\n\nbody";
        let headers = decode_headers(&fields(raw));
        assert_eq!(headers.get("subject"), Some("Café con leche"));
        assert_eq!(headers.get_all("X-DUP").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_header_map_keeps_encoded_words() {
        let headers = fields(b"Subject: =?UTF-8?B?SG9sYQ==?=\r\n\r\nbody");
        assert_eq!(headers.get("Subject"), Some("=?UTF-8?B?SG9sYQ==?="));
    }

    #[test]
    fn test_header_map_latin1_bytes() {
        let headers = fields(b"Subject: caf\xe9\n\nbody");
        assert_eq!(headers.get("Subject"), Some("café"));
    }

    #[test]
    fn test_content_type_params() {
        let ct = structured("Content-Type", "Multipart/Mixed; boundary=\"a;b\"; Charset=UTF-8");
        assert_eq!(ct.ctype(), "multipart/mixed");
        assert!(ct.is_multipart());
        assert_eq!(ct.param("boundary"), Some("a;b"));
        assert_eq!(ct.param("charset"), Some("UTF-8"));
        assert_eq!(ct.param("name"), None);
    }

    #[test]
    fn test_rfc2231_extended_filename() {
        let cd = structured(
            "Content-Disposition",
            "attachment; filename*=utf-8''na%C3%AFve%20plan.txt",
        );
        assert_eq!(cd.ctype(), "attachment");
        assert_eq!(cd.param("filename"), Some("naïve plan.txt"));
    }

    #[test]
    fn test_rfc2231_continuations() {
        let cd = structured(
            "Content-Disposition",
            "attachment; filename*0*=iso-8859-1''R%E9sum; filename*1=\"e final.doc\"",
        );
        assert_eq!(cd.param("filename"), Some("Résume final.doc"));
    }

    #[test]
    fn test_bare_content_type() {
        let ct = ContentType::bare("Message/RFC822");
        assert_eq!(ct.ctype(), "message/rfc822");
        assert_eq!(ct.param("charset"), None);
        assert_eq!(ContentType::default_text().param("charset"), Some("us-ascii"));
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").expect("date");
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_named_tz_and_comment() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
        assert!(parse_date("04 Jan 2024 10:00:00 +0000 (UTC)").is_some());
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("").is_none());
        assert!(parse_date("   ").is_none());
    }
}
