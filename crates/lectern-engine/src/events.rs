//! Messages across the engine boundary.

use lectern_chapters::PageRef;
use lectern_foundation::{PlaybackError, PlaybackState, ReaderPrefs};

/// Transport and configuration requests from the hosting application.
/// All are non-blocking; the engine task applies them in order.
#[derive(Debug)]
pub enum ControlMsg {
    Play,
    /// Halt output, keep the line cursor (pause semantics).
    Pause,
    /// Halt output, reset the cursor, and clear session caches.
    Stop,
    NextLine,
    PreviousLine,
    GotoLine(i64),
    NextChapter,
    PreviousChapter,
    GotoChapter(i64),
    UpdatePrefs(ReaderPrefs),
    Dispose,
}

/// Session events delivered to the hosting application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The current chapter's lines, in display form.
    SentenceList(Vec<String>),
    /// Pages linked from the current chapter.
    LinkedPages(Vec<PageRef>),
    StateChanged {
        desired: PlaybackState,
        current: PlaybackState,
    },
    ChapterChanged {
        index: usize,
        title: String,
    },
    /// Audible playback of a line began.
    LineStarted {
        line: usize,
    },
    /// The word spanning the given character range of the line's display
    /// text is being spoken.
    RangeStarted {
        line: usize,
        char_start: usize,
        char_end: usize,
    },
    /// An utterance was halted before completing; `interrupted` is true
    /// for the one that was audibly cut off.
    UtteranceStopped {
        line: usize,
        interrupted: bool,
    },
    PlaybackError(PlaybackError),
}
