//! Sentence segmentation for streaming TTS
//!
//! Consumes arbitrary-length text increments with no lookahead and emits
//! complete sentences, preserving an unflushed remainder per turn.

use voicechat_config::SegmenterSettings;

/// Segmenter configuration
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Sentence-terminating delimiters (CJK and Latin)
    pub delimiters: Vec<char>,

    /// Emit one segment per boundary instead of one combined segment per
    /// feed. Off by default: a feed carrying several complete sentences
    /// becomes one synthesis request, which halves round trips at the cost
    /// of first-audio latency.
    pub split_all_boundaries: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            delimiters: vec!['。', '！', '？', '；', '…', '.', '!', '?', ';', '\n'],
            split_all_boundaries: false,
        }
    }
}

impl From<&SegmenterSettings> for SegmenterConfig {
    fn from(settings: &SegmenterSettings) -> Self {
        Self {
            delimiters: settings.delimiters.clone(),
            split_all_boundaries: settings.split_all_boundaries,
        }
    }
}

/// Streaming sentence segmenter
///
/// One mutable buffer per turn. Each feed appends the increment and splits
/// off everything up to and including the last recognized delimiter; the
/// remainder stays buffered until a later feed or the final flush.
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    buffer: String,
}

impl SentenceSegmenter {
    /// Create a new segmenter
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
        }
    }

    /// Feed a text increment; returns the segments it completed, in order
    ///
    /// With `split_all_boundaries` off (the default) at most one segment is
    /// returned, ending at the last delimiter found in the buffer.
    pub fn feed(&mut self, increment: &str) -> Vec<String> {
        self.buffer.push_str(increment);

        if self.config.split_all_boundaries {
            self.split_each()
        } else {
            self.split_last().into_iter().collect()
        }
    }

    /// Split at the last delimiter in the buffer, if any
    fn split_last(&mut self) -> Option<String> {
        let end = self
            .buffer
            .char_indices()
            .rev()
            .find(|(_, c)| self.config.delimiters.contains(c))
            .map(|(i, c)| i + c.len_utf8())?;

        let remainder = self.buffer.split_off(end);
        let segment = std::mem::replace(&mut self.buffer, remainder);
        Some(segment)
    }

    /// Split at every delimiter in the buffer
    fn split_each(&mut self) -> Vec<String> {
        let mut segments = Vec::new();
        let mut start = 0;

        for (i, c) in self.buffer.char_indices() {
            if self.config.delimiters.contains(&c) {
                let end = i + c.len_utf8();
                segments.push(self.buffer[start..end].to_string());
                start = end;
            }
        }

        self.buffer = self.buffer[start..].to_string();
        segments
    }

    /// Return any non-empty remainder as a final segment, delimiter or not
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    /// Unflushed buffered text
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Reset segmenter state for a new turn
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cjk_increments() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig::default());

        assert!(seg.feed("今天").is_empty());
        assert!(seg.feed("天气").is_empty());
        assert_eq!(seg.feed("真好。"), vec!["今天天气真好。"]);
        assert!(seg.feed("你觉得").is_empty());
        assert_eq!(seg.feed("呢？"), vec!["你觉得呢？"]);
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn test_flush_without_delimiter() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig::default());

        assert!(seg.feed("no terminator here").is_empty());
        assert_eq!(seg.flush(), Some("no terminator here".to_string()));
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn test_last_delimiter_combines_sentences() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig::default());

        // Two complete sentences in one increment are emitted as one segment
        let segments = seg.feed("First. Second. trail");
        assert_eq!(segments, vec!["First. Second."]);
        assert_eq!(seg.pending(), " trail");
    }

    #[test]
    fn test_split_all_boundaries() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig {
            split_all_boundaries: true,
            ..Default::default()
        });

        let segments = seg.feed("First. Second. trail");
        assert_eq!(segments, vec!["First.", " Second."]);
        assert_eq!(seg.pending(), " trail");
    }

    #[test]
    fn test_lossless_partition() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig::default());
        let increments = ["Hel", "lo. How ", "are you? I am ", "fine"];

        let mut rejoined = String::new();
        for inc in increments {
            for segment in seg.feed(inc) {
                rejoined.push_str(&segment);
            }
        }
        if let Some(rest) = seg.flush() {
            rejoined.push_str(&rest);
        }

        assert_eq!(rejoined, increments.concat());
    }

    #[test]
    fn test_reset() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig::default());
        seg.feed("buffered text");
        seg.reset();
        assert_eq!(seg.pending(), "");
        assert_eq!(seg.flush(), None);
    }
}
