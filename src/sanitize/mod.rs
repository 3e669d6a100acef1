//! HTML sanitizer: turns an email body into bounded, offline-safe markup.
//!
//! Passes run in a fixed order:
//!
//! 1. scripts, event handlers and `javascript:` links
//! 2. external stylesheets
//! 3. `<style>` blocks, `style` attributes and annotation attributes
//! 4. tracking pixels (removed without trace)
//! 5. remote images (replaced by a placeholder)
//! 6. oversized inline `data:` images (replaced by a placeholder)
//! 7. minification
//!
//! The passes repeat until a round changes nothing, so sanitizing already
//! sanitized output is a no-op that reports zero removals. Every pass is a
//! plain text transformation: markup it cannot recognise is left as is.
//!
//! URL checks look at attribute values the way a browser reads them, after
//! character references are decoded and embedded whitespace is dropped.

pub mod minify;
pub mod tag;

use std::sync::OnceLock;

use base64::Engine;
use humansize::{format_size, BINARY};
use regex::Regex;
use tracing::{trace, warn};

use crate::config::SanitizeConfig;
use crate::model::stats::SanitizationStats;
use crate::parser::transfer::MIME_BASE64;

use tag::{element_regex, remove_elements, rewrite_tags, Tag, TagAction};

/// Upper bound on sanitizing rounds; real mail settles in one or two.
const MAX_ROUNDS: usize = 8;

/// Image-loading attributes that are dropped, rather than replaced, when remote.
const REMOTE_IMAGE_ATTRIBUTES: &[&str] = &["background", "poster", "lowsrc", "dynsrc"];

/// Attributes whose value is followed as a link or resource.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "action",
    "formaction",
    "xlink:href",
    "background",
    "poster",
    "lowsrc",
    "dynsrc",
];

/// Path and query tokens used by common open-tracking services.
const TRACKING_TOKENS: &[&str] = &[
    "pixel", "track", "tracking", "tracker", "beacon", "open", "opens", "spacer", "1x1",
];

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| element_regex(&["script", "noscript"]))
}

fn style_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| element_regex(&["style"]))
}

/// Openers that must not stay live if the rounds run out.
fn leftover_opener_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<(/?(?:no)?script\b|/?style\b|!--)").expect("opener regex is valid")
    })
}

/// Result of sanitizing one body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub html: String,
    pub stats: SanitizationStats,
}

/// Stateless HTML sanitizer configured with thresholds.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    config: SanitizeConfig,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(SanitizeConfig::default())
    }
}

impl Sanitizer {
    pub fn new(config: SanitizeConfig) -> Self {
        Self { config }
    }

    /// Sanitize `html`, returning the cleaned markup and what was removed.
    pub fn sanitize(&self, html: &str) -> Sanitized {
        let mut stats = SanitizationStats::default();
        let mut current = html.to_string();

        let mut settled = false;
        for round in 1..=MAX_ROUNDS {
            let mut round_stats = SanitizationStats::default();
            let next = self.run_passes(&current, &mut round_stats);
            settled = round_stats.is_zero() && next == current;
            stats += round_stats;
            current = next;
            if settled {
                trace!(round, "Sanitizer reached a fixed point");
                break;
            }
        }
        if !settled {
            warn!(
                rounds = MAX_ROUNDS,
                "Sanitizer stopped before a fixed point, escaping leftover openers"
            );
            current = leftover_opener_regex()
                .replace_all(&current, "&lt;$1")
                .into_owned();
        }

        Sanitized {
            html: current,
            stats,
        }
    }

    fn run_passes(&self, html: &str, stats: &mut SanitizationStats) -> String {
        let html = remove_scripts(html, stats);
        let html = remove_external_stylesheets(&html, stats);
        let html = self.remove_styles(&html, stats);
        let html = self.remove_tracking_pixels(&html, stats);
        let html = replace_external_images(&html, stats);
        let html = self.replace_large_inline_images(&html, stats);
        if self.config.minify {
            let (html, comments) = minify::strip_comments(&html);
            stats.comments_removed += comments;
            minify::collapse_whitespace(&html)
        } else {
            html
        }
    }

    // ── Pass 3 ──────────────────────────────────────────────────────

    fn remove_styles(&self, html: &str, stats: &mut SanitizationStats) -> String {
        let (html, blocks) = remove_elements(html, style_regex());
        stats.style_blocks_removed += blocks;

        let wrapper = self.config.wrapper_class.as_str();
        rewrite_tags(&html, |tag| {
            stats.style_attributes_removed +=
                tag.remove_attrs(|a| a.name.eq_ignore_ascii_case("style"));

            // The wrapper class survives alone; any other class goes
            let keeps_wrapper = !wrapper.is_empty()
                && tag
                    .attr("class")
                    .is_some_and(|v| v.split_ascii_whitespace().any(|c| c == wrapper));
            if keeps_wrapper {
                let mut seen = false;
                stats.annotation_attributes_removed += tag.remove_attrs(|a| {
                    if !a.name.eq_ignore_ascii_case("class") {
                        return false;
                    }
                    let duplicate = seen;
                    seen = true;
                    duplicate
                });
                if let Some(index) = tag
                    .attributes
                    .iter()
                    .position(|a| a.name.eq_ignore_ascii_case("class"))
                {
                    if tag.attributes[index].value.as_deref() != Some(wrapper) {
                        tag.set_value(index, wrapper);
                        stats.annotation_attributes_removed += 1;
                    }
                }
            }

            stats.annotation_attributes_removed += tag.remove_attrs(|a| {
                let name = a.name.to_ascii_lowercase();
                (name == "class" && !keeps_wrapper) || is_annotation_attribute(&name)
            });
            TagAction::Keep
        })
    }

    // ── Pass 4 ──────────────────────────────────────────────────────

    fn remove_tracking_pixels(&self, html: &str, stats: &mut SanitizationStats) -> String {
        let max = self.config.tracking_pixel_max_dimension;
        rewrite_tags(html, |tag| {
            if tag.is("img") && is_tracking_pixel(tag, max) {
                stats.tracking_pixels_removed += 1;
                TagAction::Remove
            } else {
                TagAction::Keep
            }
        })
    }

    // ── Pass 6 ──────────────────────────────────────────────────────

    fn replace_large_inline_images(&self, html: &str, stats: &mut SanitizationStats) -> String {
        let limit = self.config.max_inline_image_bytes as u64;
        rewrite_tags(html, |tag| {
            if !tag.is("img") {
                return TagAction::Keep;
            }
            let Some(size) = tag.attr("src").and_then(data_uri_size) else {
                return TagAction::Keep;
            };
            if size <= limit {
                return TagAction::Keep;
            }
            stats.large_inline_images_removed += 1;
            TagAction::Replace(format!(
                "<span>[inline image removed: {}]</span>",
                format_size(size, BINARY)
            ))
        })
    }
}

// ── Pass 1 ──────────────────────────────────────────────────────────

fn remove_scripts(html: &str, stats: &mut SanitizationStats) -> String {
    let (html, scripts) = remove_elements(html, script_regex());
    stats.scripts_removed += scripts;

    rewrite_tags(&html, |tag| {
        stats.event_handlers_removed += tag.remove_attrs(|a| is_event_handler(&a.name));

        let script_links: Vec<usize> = tag
            .attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                URL_ATTRIBUTES
                    .iter()
                    .any(|name| a.name.eq_ignore_ascii_case(name))
                    && a.value.as_deref().is_some_and(is_script_url)
            })
            .map(|(i, _)| i)
            .collect();
        for index in script_links {
            tag.set_value(index, "#");
            stats.script_links_neutralized += 1;
        }
        TagAction::Keep
    })
}

fn is_event_handler(name: &str) -> bool {
    name.len() > 2 && name.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("on"))
}

fn is_script_url(value: &str) -> bool {
    let url = normalize_url(value);
    url.starts_with("javascript:") || url.starts_with("vbscript:")
}

/// Lowercased attribute value after undoing the obfuscations browsers forgive:
/// entities, embedded whitespace and control characters.
fn normalize_url(value: &str) -> String {
    decode_char_references(value)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Decode numeric character references and the few named ones used to hide schemes.
fn decode_char_references(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))
            .unwrap_or(after.len());
        let entity = &after[..end];
        let decoded = if let Some(num) = entity.strip_prefix('#') {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
        } else {
            match entity.to_ascii_lowercase().as_str() {
                "colon" => Some(':'),
                "tab" => Some('\t'),
                "newline" => Some('\n'),
                _ => None,
            }
        };
        match decoded {
            Some(c) => {
                out.push(c);
                let consumed = end + usize::from(after[end..].starts_with(';'));
                rest = &after[consumed..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Pass 2 ──────────────────────────────────────────────────────────

fn remove_external_stylesheets(html: &str, stats: &mut SanitizationStats) -> String {
    rewrite_tags(html, |tag| {
        let is_stylesheet = tag.is("link")
            && tag.attr("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|r| r.eq_ignore_ascii_case("stylesheet"))
            });
        if is_stylesheet && tag.attr("href").is_some_and(is_remote_url) {
            stats.external_stylesheets_removed += 1;
            TagAction::Remove
        } else {
            TagAction::Keep
        }
    })
}

/// `true` for URLs that need the network to resolve.
pub fn is_remote_url(url: &str) -> bool {
    let url = normalize_url(url);
    url.starts_with("http:")
        || url.starts_with("https:")
        || url.starts_with("ftp:")
        || url.starts_with("//")
        || url.starts_with("\\\\")
}

fn is_annotation_attribute(lower_name: &str) -> bool {
    lower_name == "role"
        || lower_name.starts_with("aria-")
        || lower_name.starts_with("data-")
        || lower_name.starts_with("x-")
}

// ── Pass 4 helpers ──────────────────────────────────────────────────

fn is_tracking_pixel(tag: &Tag, max: u32) -> bool {
    let width = tag.attr("width").and_then(parse_dimension);
    let height = tag.attr("height").and_then(parse_dimension);
    let tiny = match (width, height) {
        (Some(w), Some(h)) => (w <= max && h <= max) || w == 0 || h == 0,
        (Some(d), None) | (None, Some(d)) => d == 0,
        (None, None) => false,
    };
    tiny || tag.attr("src").is_some_and(has_tracking_path)
}

/// Leading integer of a dimension attribute (`"1"`, `"1px"`, `" 0 "`).
fn parse_dimension(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value.len() - value.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    value[..digits].parse().ok()
}

/// Check the path and query of a remote image against tracking conventions.
fn has_tracking_path(src: &str) -> bool {
    if !is_remote_url(src) {
        return false;
    }
    let lower = normalize_url(src);
    let without_scheme = lower.split_once("//").map(|(_, r)| r).unwrap_or(&lower);
    let Some(path) = without_scheme.find(['/', '?']).map(|i| &without_scheme[i..]) else {
        return false;
    };
    path.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| TRACKING_TOKENS.contains(&token))
}

// ── Pass 5 ──────────────────────────────────────────────────────────

fn replace_external_images(html: &str, stats: &mut SanitizationStats) -> String {
    rewrite_tags(html, |tag| {
        stats.external_images_removed += tag.remove_attrs(|a| {
            REMOTE_IMAGE_ATTRIBUTES
                .iter()
                .any(|name| a.name.eq_ignore_ascii_case(name))
                && a.value.as_deref().is_some_and(is_remote_url)
        });

        let remote = tag.attr("src").is_some_and(is_remote_url)
            || tag.attr("srcset").is_some_and(has_remote_candidate);
        if tag.is("source") {
            // Alternatives inside <picture>/<video>; the fallback element gets the placeholder
            if remote {
                stats.external_images_removed += 1;
                return TagAction::Remove;
            }
            return TagAction::Keep;
        }
        let is_image = tag.is("img")
            || (tag.is("input")
                && tag
                    .attr("type")
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case("image")));
        if !(is_image && remote) {
            return TagAction::Keep;
        }
        stats.external_images_removed += 1;
        let placeholder = match tag.attr("alt").map(str::trim).filter(|a| !a.is_empty()) {
            Some(alt) => format!(
                "<span>[external image: {}]</span>",
                alt.replace('<', "&lt;").replace('>', "&gt;")
            ),
            None => "<span>[external image]</span>".to_string(),
        };
        TagAction::Replace(placeholder)
    })
}

/// `srcset` lists `url descriptor` candidates separated by commas.
fn has_remote_candidate(srcset: &str) -> bool {
    decode_char_references(srcset)
        .split(',')
        .any(|candidate| is_remote_url(candidate))
}

// ── Pass 6 helpers ──────────────────────────────────────────────────

/// Decoded byte size of a `data:` URI, or `None` if `src` is not one.
fn data_uri_size(src: &str) -> Option<u64> {
    let src = src.trim();
    if !src.get(..5)?.eq_ignore_ascii_case("data:") {
        return None;
    }
    let (meta, payload) = src[5..].split_once(',')?;
    let payload: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if meta.to_ascii_lowercase().ends_with(";base64") {
        let data_len = payload.iter().filter(|&&b| b != b'=').count() as u64;
        let estimate = data_len * 3 / 4;
        // Exact size for well-formed payloads, estimate otherwise
        Some(
            MIME_BASE64
                .decode(&payload)
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(estimate),
        )
    } else {
        let escapes = payload.iter().filter(|&&b| b == b'%').count() as u64;
        Some((payload.len() as u64).saturating_sub(escapes * 2))
    }
}
