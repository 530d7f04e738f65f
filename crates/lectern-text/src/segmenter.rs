//! Paragraph decomposition into reading units.

use crate::filter::{compile_filters, CompiledFilter, SegmentError};
use crate::line::{Line, ReadMode};
use lectern_foundation::FilterSpec;
use regex::Regex;

/// Sentinel paragraph marking a scene transition; played as an earcon.
pub const SCENE_BREAK: &str = "◇ ◇ ◇";

/// Hard ceiling on the per-utterance character limit. Even when a
/// provider claims to accept more, larger units produce audible pauses
/// between synthesis batches.
pub const PROVIDER_INPUT_CEILING: usize = 500;

pub struct Segmenter {
    filters: Vec<CompiledFilter>,
    limit: usize,
    dialogue: Regex,
    sentence_end: Regex,
}

impl Segmenter {
    /// `limit` is the provider's maximum input length in characters; it
    /// is clamped to [1, `PROVIDER_INPUT_CEILING`].
    pub fn new(filters: &[FilterSpec], limit: usize) -> Result<Self, SegmentError> {
        Ok(Self {
            filters: compile_filters(filters)?,
            limit: limit.clamp(1, PROVIDER_INPUT_CEILING),
            // A fully quoted body (straight quotes, Unicode initial/final
            // punctuation, or open/close punctuation), optionally followed
            // by a short bracketed speaker tag.
            dialogue: Regex::new(
                r#"^\s*(?:"(.+)"|\p{Pi}(.+)\p{Pf}|\p{Ps}(.+)\p{Pe})(?:\s*\p{Ps}(.{1,30})\p{Pe})?\s*$"#,
            )
            .expect("dialogue pattern"),
            // Sentence-ending characters only count as boundaries when
            // followed by whitespace or the end of the paragraph.
            sentence_end: Regex::new(r#"[.!?;"'」』”»“‘)\]](?:\s|$)"#).expect("boundary pattern"),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Decomposes raw chapter text into an ordered line list.
    pub fn segment(&self, raw: &str) -> Vec<Line> {
        let mut lines = Vec::new();
        for paragraph in raw.split('\n') {
            if paragraph.trim().is_empty() {
                continue;
            }
            let mut text = paragraph.trim().to_string();
            for filter in &self.filters {
                text = filter.apply(&text);
            }
            let text = text.trim();
            if char_len(text) < self.limit {
                self.push_line(&mut lines, text, false);
                continue;
            }
            self.split_long(&mut lines, text);
        }
        tracing::debug!(count = lines.len(), "Segmented chapter text");
        lines
    }

    fn split_long(&self, lines: &mut Vec<Line>, text: &str) {
        let mut rest = text.to_string();
        let mut continues = false;
        loop {
            let limit_byte = byte_at_char(&rest, self.limit);
            let split = self
                .furthest_boundary(&rest, limit_byte)
                .or_else(|| furthest_char(&rest, limit_byte, ','))
                .or_else(|| furthest_char(&rest, limit_byte, ' '));
            let Some(end) = split else {
                // No boundary at all within the limit: hard-cut at the
                // exact character limit. Leaving the paragraph unsent
                // would starve the queue and stall later chapters.
                while char_len(&rest) > self.limit {
                    let cut = byte_at_char(&rest, self.limit);
                    self.push_line(lines, rest[..cut].trim_end(), continues);
                    continues = true;
                    rest = rest[cut..].to_string();
                }
                if !rest.is_empty() {
                    self.push_line(lines, rest.trim(), continues);
                }
                return;
            };
            self.push_line(lines, rest[..end].trim_end(), continues);
            continues = true;
            rest = rest[end..].trim_start().to_string();
            if char_len(&rest) < self.limit {
                if !rest.is_empty() {
                    self.push_line(lines, &rest, true);
                }
                return;
            }
        }
    }

    /// Byte index just past the furthest sentence-ending boundary whose
    /// position is inside the limit.
    fn furthest_boundary(&self, text: &str, limit_byte: usize) -> Option<usize> {
        let mut best = None;
        for m in self.sentence_end.find_iter(text) {
            if m.start() >= limit_byte {
                break;
            }
            let first = text[m.start()..].chars().next()?;
            best = Some(m.start() + first.len_utf8());
        }
        best
    }

    fn push_line(&self, lines: &mut Vec<Line>, text: &str, continues_previous: bool) {
        if text == SCENE_BREAK {
            lines.push(Line {
                text: text.to_string(),
                mode: ReadMode::SceneChange,
                continues_previous,
            });
            return;
        }
        if let Some(caps) = self.dialogue.captures(text) {
            if let Some(body) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                let speaker = caps
                    .get(4)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty());
                lines.push(Line {
                    text: body.as_str().to_string(),
                    mode: ReadMode::Dialogue { speaker },
                    continues_previous,
                });
                return;
            }
        }
        lines.push(Line {
            text: text.to_string(),
            mode: ReadMode::Regular,
            continues_previous,
        });
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`-th character, or the string length if shorter.
fn byte_at_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_foundation::FilterKind;

    fn segmenter(limit: usize) -> Segmenter {
        Segmenter::new(&[], limit).unwrap()
    }

    #[test]
    fn short_paragraph_is_one_line() {
        let lines = segmenter(500).segment("He said hello.");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].mode, ReadMode::Regular);
        assert!(!lines[0].continues_previous);
    }

    #[test]
    fn splits_at_sentence_boundary() {
        let lines = segmenter(10).segment("Line one. Line two.");
        assert_eq!(
            lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>(),
            vec!["Line one.", "Line two."]
        );
        assert!(lines.iter().all(|l| l.text.chars().count() <= 10));
        assert!(!lines[0].continues_previous);
        assert!(lines[1].continues_previous);
    }

    #[test]
    fn falls_back_to_comma_then_space() {
        let lines = segmenter(12).segment("alpha, bravo charlie");
        assert_eq!(lines[0].text, "alpha,");
        let lines = segmenter(12).segment("alpha bravo charlie");
        assert_eq!(lines[0].text, "alpha bravo");
    }

    #[test]
    fn hard_cuts_unbreakable_text_at_limit() {
        let text = "a".repeat(1200);
        let lines = segmenter(500).segment(&text);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text.chars().count(), 500);
        assert_eq!(lines[1].text.chars().count(), 500);
        assert_eq!(lines[2].text.chars().count(), 200);
        assert!(!lines[0].continues_previous);
        assert!(lines[1].continues_previous && lines[2].continues_previous);
    }

    #[test]
    fn every_split_respects_the_limit() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let limit = 100;
        let lines = segmenter(limit).segment(&text);
        assert!(lines.iter().all(|l| l.text.chars().count() <= limit));
    }

    #[test]
    fn concatenation_preserves_content() {
        let text = "First sentence here. Second sentence follows! Third one? Yes.";
        let lines = segmenter(25).segment(text);
        let joined = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&joined), normalize(text));
    }

    #[test]
    fn detects_dialogue_with_speaker() {
        let lines = segmenter(500).segment("\"Hello.\" [Bob]");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Hello.");
        assert_eq!(
            lines[0].mode,
            ReadMode::Dialogue {
                speaker: Some("Bob".to_string())
            }
        );
        assert_eq!(lines[0].display_text(), "Hello. [Bob]");
    }

    #[test]
    fn detects_dialogue_without_speaker() {
        let lines = segmenter(500).segment("「こんにちは」");
        assert_eq!(lines[0].mode, ReadMode::Dialogue { speaker: None });
        assert_eq!(lines[0].text, "こんにちは");
    }

    #[test]
    fn partial_quotes_are_regular() {
        let lines = segmenter(500).segment("\"Hi,\" she said.");
        assert_eq!(lines[0].mode, ReadMode::Regular);
    }

    #[test]
    fn scene_break_is_classified_regardless_of_context() {
        let lines = segmenter(500).segment("Before.\n◇ ◇ ◇\nAfter.");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].is_scene_change());
    }

    #[test]
    fn blank_paragraphs_are_discarded() {
        let lines = segmenter(500).segment("One.\n\n   \nTwo.");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn filters_apply_before_classification() {
        let specs = vec![FilterSpec {
            kind: FilterKind::Regex,
            lookup: r"\[\d+\]".to_string(),
            flags: String::new(),
            replace: String::new(),
        }];
        let seg = Segmenter::new(&specs, 500).unwrap();
        let lines = seg.segment("Footnoted claim.[3]");
        assert_eq!(lines[0].text, "Footnoted claim.");
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "あ".repeat(40);
        let lines = segmenter(16).segment(&text);
        assert!(lines.iter().all(|l| l.text.chars().count() <= 16));
        let total: usize = lines.iter().map(|l| l.text.chars().count()).sum();
        assert_eq!(total, 40);
    }
}
