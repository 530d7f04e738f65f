//! Engine preferences passed explicitly at construction.
//!
//! The engine never reads ambient global settings; hosts build a
//! `ReaderPrefs`, hand it over, and push updates through the transport
//! handle.

use serde::{Deserialize, Serialize};

/// How a text filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Regex lookup; `replace` may reference capture groups (`$1`, ...).
    Regex,
    /// Literal lookup, replaced verbatim.
    Plaintext,
}

/// A user-configured substitution applied to each decomposed line before
/// classification and splitting.
///
/// Supported `flags` characters:
/// regex — `i` ignore case, `m` multiline, `s` dot matches newline,
/// `l` literal pattern parsing; plaintext — `i` ignore case, `f` full
/// string match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub lookup: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub replace: String,
}

/// Reader/engine preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderPrefs {
    /// Voice pitch multiplier (1.0 is normal).
    pub pitch: f32,
    /// Speech rate multiplier (1.0 is normal).
    pub speech_rate: f32,
    /// BCP-47 language tag; `None` means the provider default.
    pub language: Option<String>,
    /// Provider voice id; `None` means the provider default.
    pub voice: Option<String>,

    /// Speak dialogue lines at a lowered pitch.
    pub downpitch_dialogue: bool,
    /// Multiplier applied to `pitch` for dialogue when downpitching.
    pub downpitch_amount: f32,

    /// Play the chapter-change earcon between chapters.
    pub chapter_change_sfx: bool,
    /// Announce running out of chapters instead of stopping silently.
    pub announce_final_chapter: bool,
    /// Automatically continue into the next chapter at end of chapter.
    pub read_next_chapter: bool,
    /// Seeking past either end of the line list changes chapter.
    pub rewind_to_skip: bool,

    /// Merge linked pages into the chapter text.
    pub merge_linked_pages: bool,
    /// When merging, drop the first page's own (landing-page) text.
    pub discard_first_page: bool,
    /// When merging, keep only the longest linked page.
    pub use_longest_page: bool,

    /// Per-utterance character limit handed to the segmenter.
    pub max_utterance_chars: usize,
    /// Bounded chapter cache capacity.
    pub chapter_cache_capacity: usize,
    /// Bounded rendered-utterance cache capacity (buffered strategy).
    pub rendered_cache_size: usize,

    /// Line-stage text filters.
    pub filters: Vec<FilterSpec>,
}

impl Default for ReaderPrefs {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            speech_rate: 1.0,
            language: None,
            voice: None,
            downpitch_dialogue: false,
            downpitch_amount: 0.8,
            chapter_change_sfx: true,
            announce_final_chapter: true,
            read_next_chapter: true,
            rewind_to_skip: false,
            merge_linked_pages: false,
            discard_first_page: false,
            use_longest_page: false,
            max_utterance_chars: 500,
            chapter_cache_capacity: 6,
            rendered_cache_size: 8,
            filters: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let p = ReaderPrefs::default();
        assert_eq!(p.pitch, 1.0);
        assert_eq!(p.max_utterance_chars, 500);
        assert!(p.read_next_chapter);
        assert!(p.filters.is_empty());
    }
}
