//! Start-tag tokenizer shared by the sanitizer passes.
//!
//! Only opening tags are parsed; text, closing tags and anything that does not
//! look like a well-formed start tag are left untouched. A tag is re-rendered
//! only when a pass actually changed it, so untouched markup stays byte-identical.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Matches `<name attrs…>`, honouring quoted attribute values containing `>`.
fn start_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<([a-zA-Z][a-zA-Z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
            .expect("start tag regex is valid")
    })
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
            .expect("attribute regex is valid")
    })
}

/// One attribute of a start tag. `value` is kept exactly as written
/// (entities are not decoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

/// A parsed start tag.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Tag name as written.
    pub name: String,
    pub attributes: Vec<Attribute>,
    self_closing: bool,
    modified: bool,
}

/// What a pass wants done with a tag.
pub enum TagAction {
    /// Keep the tag (re-rendered if it was modified).
    Keep,
    /// Drop the tag.
    Remove,
    /// Replace the tag with literal markup.
    Replace(String),
}

impl Tag {
    fn parse(name: &str, attr_text: &str) -> Self {
        let trimmed = attr_text.trim_end();
        let self_closing = trimmed.ends_with('/');
        let attributes = attribute_regex()
            .captures_iter(attr_text)
            .map(|caps| Attribute {
                name: caps[1].to_string(),
                value: caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .or_else(|| caps.get(4))
                    .map(|m| m.as_str().to_string()),
            })
            .collect();
        Self {
            name: name.to_string(),
            attributes,
            self_closing,
            modified: false,
        }
    }

    /// Case-insensitive tag name check.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Value of the first attribute called `name` (case-insensitive).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.value.as_deref())
    }

    /// Remove every attribute matching `pred`; returns how many were removed.
    pub fn remove_attrs(&mut self, mut pred: impl FnMut(&Attribute) -> bool) -> u64 {
        let before = self.attributes.len();
        self.attributes.retain(|a| !pred(a));
        let removed = (before - self.attributes.len()) as u64;
        if removed > 0 {
            self.modified = true;
        }
        removed
    }

    /// Overwrite the value of the attribute at `index`.
    pub fn set_value(&mut self, index: usize, value: &str) {
        if let Some(attr) = self.attributes.get_mut(index) {
            if attr.value.as_deref() != Some(value) {
                attr.value = Some(value.to_string());
                self.modified = true;
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(16 + self.attributes.len() * 16);
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            if let Some(value) = &attr.value {
                if value.contains('"') {
                    if value.contains('\'') {
                        out.push_str("=\"");
                        out.push_str(&value.replace('"', "&quot;"));
                        out.push('"');
                    } else {
                        out.push_str("='");
                        out.push_str(value);
                        out.push('\'');
                    }
                } else {
                    out.push_str("=\"");
                    out.push_str(value);
                    out.push('"');
                }
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
        out
    }
}

/// Run `visit` over every start tag of `html` and apply its decision.
pub fn rewrite_tags(html: &str, mut visit: impl FnMut(&mut Tag) -> TagAction) -> String {
    start_tag_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            let mut tag = Tag::parse(&caps[1], &caps[2]);
            match visit(&mut tag) {
                TagAction::Keep if tag.modified => tag.render(),
                TagAction::Keep => caps[0].to_string(),
                TagAction::Remove => String::new(),
                TagAction::Replace(markup) => markup,
            }
        })
        .into_owned()
}

/// Remove every element matched by a regex from [`element_regex`].
///
/// An element that is never closed swallows the rest of the document, as it
/// would in a browser. Removal repeats until nothing matches, so an element
/// spliced together from the leftovers of another (`<scr<script></script>ipt>`)
/// goes too. Returns the new text and the number of elements removed.
pub fn remove_elements(html: &str, regex: &Regex) -> (String, u64) {
    let mut count = 0u64;
    let mut current = html.to_string();
    loop {
        let mut removed = 0u64;
        let next = regex.replace_all(&current, |_: &Captures<'_>| {
            removed += 1;
            ""
        });
        if removed == 0 {
            return (current, count);
        }
        // Every match is non-empty, so each round shortens the text
        current = next.into_owned();
        count += removed;
    }
}

/// Build the regex used by [`remove_elements`] for a list of element names.
pub fn element_regex(names: &[&str]) -> Regex {
    let alternation = names.join("|");
    let pattern = format!(
        r"(?is)<(?:{alternation})\b(?:[^>]*>.*?(?:</(?:{alternation})\s*>|\z)|[^>]*\z)"
    );
    Regex::new(&pattern).expect("element regex is valid")
}
