//! Comment removal and whitespace collapsing.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// A comment runs to `-->` or, when never closed, to the end of the document.
fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("comment regex is valid"))
}

/// Elements whose whitespace is visible and must be kept verbatim.
fn preformatted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(?:pre|textarea)\b.*?</(?:pre|textarea)\s*>")
            .expect("preformatted regex is valid")
    })
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\r\n\x0C]+").expect("whitespace regex is valid"))
}

/// Drop all comments, conditional comments included. Comments that only
/// appear once an inner one is gone (`<!<!-- -->-- x -->`) are dropped too.
pub fn strip_comments(html: &str) -> (String, u64) {
    let mut count = 0u64;
    let mut current = html.to_string();
    loop {
        let mut removed = 0u64;
        let next = comment_regex().replace_all(&current, |_: &Captures<'_>| {
            removed += 1;
            ""
        });
        if removed == 0 {
            return (current, count);
        }
        current = next.into_owned();
        count += removed;
    }
}

/// Collapse whitespace runs to one space outside `<pre>`/`<textarea>`, then trim.
pub fn collapse_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for m in preformatted_regex().find_iter(html) {
        out.push_str(&whitespace_regex().replace_all(&html[last..m.start()], " "));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&whitespace_regex().replace_all(&html[last..], " "));
    out.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n' | '\x0C'))
        .to_string()
}
