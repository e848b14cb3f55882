//! Embedded control directives in generated text
//!
//! The generator embeds two markers: `[CORRECT]` (no payload) and
//! `[IMAGE: subject]`. Directives are extracted from the growing accumulated
//! text of a turn, independently of sentence segmentation, and each directive
//! type fires its side effect at most once per turn no matter how often the
//! marker reappears on later scans.

use once_cell::sync::Lazy;
use regex::Regex;

static IMAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[IMAGE:\s*([^\]]+?)\s*\]").expect("valid image marker regex"));

const CORRECT_MARKER: &str = "[CORRECT]";

/// Result of scanning the accumulated text once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveScan {
    /// Accumulated text with all complete markers removed
    pub display_text: String,

    /// The correctness marker was observed for the first time this turn
    pub new_correct: bool,

    /// An image marker was observed for the first time this turn; carries
    /// the subject argument
    pub new_image: Option<String>,
}

/// Remove all complete directive markers from `text`
///
/// Used both for display text and for cleaning sentence segments before
/// synthesis. A marker split across increments is left in place until its
/// closing bracket arrives.
pub fn strip_markers(text: &str) -> String {
    let stripped = text.replace(CORRECT_MARKER, "");
    IMAGE_MARKER.replace_all(&stripped, "").into_owned()
}

/// Per-turn directive extraction with at-most-once firing
#[derive(Debug, Default)]
pub struct DirectiveScanner {
    correct_seen: bool,
    image_seen: bool,
}

impl DirectiveScanner {
    /// Create a scanner for a new turn
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the full accumulated text of the turn
    ///
    /// Idempotent over a growing input: a marker already reported by an
    /// earlier scan is stripped from the display text but never re-fired.
    pub fn scan(&mut self, accumulated: &str) -> DirectiveScan {
        let mut new_correct = false;
        if !self.correct_seen && accumulated.contains(CORRECT_MARKER) {
            self.correct_seen = true;
            new_correct = true;
        }

        let mut new_image = None;
        if !self.image_seen {
            if let Some(captures) = IMAGE_MARKER.captures(accumulated) {
                self.image_seen = true;
                new_image = Some(captures[1].to_string());
            }
        }

        DirectiveScan {
            display_text: strip_markers(accumulated),
            new_correct,
            new_image,
        }
    }

    /// Has the correctness marker been observed this turn?
    pub fn correct_seen(&self) -> bool {
        self.correct_seen
    }

    /// Has an image marker been observed this turn?
    pub fn image_seen(&self) -> bool {
        self.image_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_and_correct_extraction() {
        let mut scanner = DirectiveScanner::new();
        let scan = scanner.scan("[IMAGE: 苹果]在哪里？[CORRECT]");

        assert_eq!(scan.display_text, "在哪里？");
        assert_eq!(scan.new_image.as_deref(), Some("苹果"));
        assert!(scan.new_correct);
    }

    #[test]
    fn test_at_most_once_per_turn() {
        let mut scanner = DirectiveScanner::new();

        let scan = scanner.scan("ok [CORRECT]");
        assert!(scan.new_correct);

        // Same marker still present on the grown text: no re-fire
        let scan = scanner.scan("ok [CORRECT] more [CORRECT]");
        assert!(!scan.new_correct);
        assert_eq!(scan.display_text, "ok  more ");

        // Second image marker with a different subject: ignored
        let scan = scanner.scan("ok [IMAGE: cat] then [IMAGE: dog]");
        assert_eq!(scan.new_image.as_deref(), Some("cat"));
        let scan = scanner.scan("ok [IMAGE: cat] then [IMAGE: dog] end");
        assert_eq!(scan.new_image, None);
    }

    #[test]
    fn test_marker_spanning_increments() {
        let mut scanner = DirectiveScanner::new();

        // Partial marker: not recognized, left visible
        let scan = scanner.scan("look [IMA");
        assert_eq!(scan.new_image, None);
        assert_eq!(scan.display_text, "look [IMA");

        // Completed on a later increment
        let scan = scanner.scan("look [IMAGE: moon] up");
        assert_eq!(scan.new_image.as_deref(), Some("moon"));
        assert_eq!(scan.display_text, "look  up");
    }

    #[test]
    fn test_strip_markers_whitespace_subject() {
        assert_eq!(strip_markers("a[IMAGE:  spaced  ]b"), "ab");
        assert_eq!(strip_markers("no markers"), "no markers");
    }
}
