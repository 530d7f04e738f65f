//! The provider interface.

use crate::earcon::{EarconClip, EarconId};
use crate::error::SynthResult;
use crate::event::{SynthEventSender, SynthesisId};
use crate::types::{LanguageStatus, LanguageTag, SpeechParams, VoiceId, VoiceInfo};
use std::time::Duration;

/// Abstraction over a speech synthesis engine.
///
/// Every request method is non-blocking: it validates its arguments,
/// kicks off the asynchronous work, and returns. Progress and completion
/// arrive as [`crate::SynthEvent`]s on the channel handed to the
/// implementation at construction.
///
/// Implementations support two playback strategies:
/// - **direct**: `speak`/`play_earcon`/`play_silence` drive the
///   provider's own output path; the engine just tracks Started/Done.
/// - **buffered**: `synthesize_to_buffer` renders to memory; PCM arrives
///   as `AudioAvailable` events and the engine owns the output device.
pub trait SpeechSynthesizer: Send {
    fn name(&self) -> &str;

    /// Kicks off asynchronous initialization. Completion is reported as
    /// `Ready` or `InitFailed`.
    fn begin_init(&mut self);

    /// Speaks through the provider's own playback (direct strategy).
    fn speak(&mut self, text: &str, id: SynthesisId, params: &SpeechParams) -> SynthResult<()>;

    /// Plays a registered earcon through the provider (direct strategy).
    fn play_earcon(&mut self, earcon: &EarconId, id: SynthesisId) -> SynthResult<()>;

    /// Plays silence of the given duration (direct strategy).
    fn play_silence(&mut self, duration: Duration, id: SynthesisId) -> SynthResult<()>;

    /// Renders speech to memory (buffered strategy). Audio arrives as
    /// `AudioAvailable` events tagged with `id`.
    fn synthesize_to_buffer(
        &mut self,
        text: &str,
        id: SynthesisId,
        params: &SpeechParams,
    ) -> SynthResult<()>;

    /// Selects the synthesis language. Unsupported languages leave the
    /// previous selection in place.
    fn set_language(&mut self, tag: &LanguageTag) -> LanguageStatus;

    fn set_voice(&mut self, voice: &VoiceId) -> SynthResult<()>;

    /// Registers an earcon clip for direct-strategy playback.
    fn register_earcon(&mut self, id: EarconId, clip: EarconClip);

    fn voices(&self) -> Vec<VoiceInfo>;

    /// Cancels any in-flight request. Events for cancelled requests may
    /// still trickle in and are discarded by id on the engine side.
    fn stop(&mut self);

    /// Releases resources; the instance is unusable afterwards.
    fn shutdown(&mut self);
}

/// Creates provider instances. The engine uses this both at construction
/// and to replace a provider after a transient internal failure.
pub trait SynthesizerFactory: Send {
    fn create(&self, events: SynthEventSender) -> Box<dyn SpeechSynthesizer>;
}

impl<F> SynthesizerFactory for F
where
    F: Fn(SynthEventSender) -> Box<dyn SpeechSynthesizer> + Send,
{
    fn create(&self, events: SynthEventSender) -> Box<dyn SpeechSynthesizer> {
        self(events)
    }
}
