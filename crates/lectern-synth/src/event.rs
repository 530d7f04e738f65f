//! Synthesis lifecycle events.

use crate::error::SynthError;
use crate::types::AudioSpec;

/// Engine-issued identifier echoed back in every event so retried or
/// interrupted requests can be told apart from the active one.
pub type SynthesisId = u64;

#[derive(Debug, Clone)]
pub enum SynthEvent {
    /// Initialization finished successfully; requests may be issued.
    Ready,
    /// Initialization failed; no synthesis is possible until the host
    /// constructs a fresh provider.
    InitFailed { reason: String },

    /// Synthesis of a unit began; reports the stream format.
    BeginSynthesis { id: SynthesisId, spec: AudioSpec },
    /// A chunk of rendered PCM is available (buffered strategy only).
    AudioAvailable { id: SynthesisId, data: Vec<u8> },
    /// The word spanning `char_start..char_end` begins at `frame`
    /// (relative to the start of this unit's audio).
    RangeStart {
        id: SynthesisId,
        frame: u64,
        char_start: usize,
        char_end: usize,
    },
    /// Audible output for the unit started (direct strategy) or the
    /// first audio chunk is about to arrive (buffered strategy).
    Started { id: SynthesisId },
    /// The unit completed.
    Done { id: SynthesisId },
    /// The unit failed.
    Error { id: SynthesisId, error: SynthError },
}

impl SynthEvent {
    /// The synthesis id this event refers to, if any.
    pub fn id(&self) -> Option<SynthesisId> {
        match self {
            SynthEvent::Ready | SynthEvent::InitFailed { .. } => None,
            SynthEvent::BeginSynthesis { id, .. }
            | SynthEvent::AudioAvailable { id, .. }
            | SynthEvent::RangeStart { id, .. }
            | SynthEvent::Started { id }
            | SynthEvent::Done { id }
            | SynthEvent::Error { id, .. } => Some(*id),
        }
    }
}

/// Channel on which providers post their events.
pub type SynthEventSender = tokio::sync::mpsc::UnboundedSender<SynthEvent>;
