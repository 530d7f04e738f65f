//! Speech synthesis provider abstraction.
//!
//! Providers turn text into audio asynchronously and report lifecycle
//! progress as [`SynthEvent`]s posted onto a channel supplied at
//! construction. The engine correlates events with its command queue via
//! the [`SynthesisId`] it passes into each request; stale ids are ignored
//! on arrival, so providers never need to care about interruption races.

pub mod earcon;
pub mod error;
pub mod event;
pub mod synthesizer;
pub mod types;

pub use earcon::{EarconClip, EarconId, EarconSet};
pub use error::{SynthError, SynthResult};
pub use event::{SynthEvent, SynthEventSender, SynthesisId};
pub use synthesizer::{SpeechSynthesizer, SynthesizerFactory};
pub use types::{
    AudioSpec, LanguageStatus, LanguageTag, SampleFormat, SpeechParams, VoiceGender, VoiceId,
    VoiceInfo,
};
