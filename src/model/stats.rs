//! Sanitization and decoding counters.
//!
//! One [`SanitizationStats`] is attached to every message record; the
//! pipeline folds them into a run-wide total with `+=`.

use std::ops::AddAssign;

/// Counts of what was removed or rewritten while processing a message.
///
/// Every counter is always present; zero means the pass ran and found nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SanitizationStats {
    /// `<script>` / `<noscript>` elements removed.
    pub scripts_removed: u64,
    /// `on*` event-handler attributes removed.
    pub event_handlers_removed: u64,
    /// `javascript:` / `vbscript:` link targets rewritten to `#`.
    pub script_links_neutralized: u64,
    /// `<link rel="stylesheet">` tags pointing off-machine.
    pub external_stylesheets_removed: u64,
    /// `<style>` blocks removed.
    pub style_blocks_removed: u64,
    /// `style="..."` attributes removed.
    pub style_attributes_removed: u64,
    /// `class`, `role`, `aria-*`, `data-*` and vendor attributes removed.
    pub annotation_attributes_removed: u64,
    /// Tracking pixels removed without placeholder.
    pub tracking_pixels_removed: u64,
    /// Remote images replaced by a placeholder.
    pub external_images_removed: u64,
    /// Inline `data:` images above the size threshold replaced by a placeholder.
    pub large_inline_images_removed: u64,
    /// HTML comments dropped by the minifier.
    pub comments_removed: u64,
    /// MIME parts that could not be decoded at all.
    pub decode_failures: u64,
    /// Attachments omitted because they could not be written.
    pub attachment_failures: u64,
}

impl SanitizationStats {
    /// Total number of sanitizer removals (decode and attachment failures excluded).
    pub fn total_removed(&self) -> u64 {
        self.scripts_removed
            + self.event_handlers_removed
            + self.script_links_neutralized
            + self.external_stylesheets_removed
            + self.style_blocks_removed
            + self.style_attributes_removed
            + self.annotation_attributes_removed
            + self.tracking_pixels_removed
            + self.external_images_removed
            + self.large_inline_images_removed
            + self.comments_removed
    }

    /// `true` when nothing at all was counted.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for SanitizationStats {
    fn add_assign(&mut self, rhs: Self) {
        self.scripts_removed += rhs.scripts_removed;
        self.event_handlers_removed += rhs.event_handlers_removed;
        self.script_links_neutralized += rhs.script_links_neutralized;
        self.external_stylesheets_removed += rhs.external_stylesheets_removed;
        self.style_blocks_removed += rhs.style_blocks_removed;
        self.style_attributes_removed += rhs.style_attributes_removed;
        self.annotation_attributes_removed += rhs.annotation_attributes_removed;
        self.tracking_pixels_removed += rhs.tracking_pixels_removed;
        self.external_images_removed += rhs.external_images_removed;
        self.large_inline_images_removed += rhs.large_inline_images_removed;
        self.comments_removed += rhs.comments_removed;
        self.decode_failures += rhs.decode_failures;
        self.attachment_failures += rhs.attachment_failures;
    }
}
