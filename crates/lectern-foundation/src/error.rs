use thiserror::Error;

/// Failures surfaced to the hosting application as session events.
///
/// Transient synthesis hiccups are recovered internally (provider restart,
/// command retry) and never appear here; everything that affects content
/// does.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("speech provider failed to initialize: {0}")]
    Initialization(String),

    #[error("synthesis failed permanently: {reason}")]
    SynthesisPermanent { reason: String },

    #[error("chapter {index} could not be loaded: {reason}")]
    ChapterLoad { index: i64, reason: String },

    #[error("language {tag:?} is not available")]
    LanguageUnavailable { tag: String },
}

impl PlaybackError {
    /// Warnings leave playback running; errors halt it.
    pub fn is_warning(&self) -> bool {
        matches!(self, PlaybackError::LanguageUnavailable { .. })
    }
}
