//! Test support: a scripted speech provider that records requests and
//! lets tests inject lifecycle events by hand.

use lectern_synth::{
    EarconClip, EarconId, LanguageStatus, LanguageTag, SpeechParams, SpeechSynthesizer,
    SynthError, SynthEventSender, SynthResult, SynthesisId, SynthesizerFactory, VoiceId, VoiceInfo,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SynthCall {
    Init,
    Speak { text: String, id: SynthesisId },
    Buffer { text: String, id: SynthesisId },
    Earcon { name: String, id: SynthesisId },
    Silence { ms: u64, id: SynthesisId },
    SetLanguage(String),
    SetVoice(String),
    Stop,
    Shutdown,
}

/// Shared script state; clone it, build a factory from it, and inspect
/// the recorded calls after driving the engine.
#[derive(Clone, Default)]
pub struct SynthScript {
    calls: Arc<Mutex<Vec<SynthCall>>>,
    fail_next: Arc<Mutex<Option<SynthError>>>,
    language_supported: Arc<Mutex<bool>>,
    created: Arc<AtomicUsize>,
}

impl SynthScript {
    pub fn new() -> Self {
        let script = Self::default();
        *script.language_supported.lock() = true;
        script
    }

    pub fn factory(&self) -> Box<dyn SynthesizerFactory> {
        let script = self.clone();
        Box::new(move |events: SynthEventSender| -> Box<dyn SpeechSynthesizer> {
            script.created.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedSynth {
                script: script.clone(),
                _events: events,
            })
        })
    }

    pub fn calls(&self) -> Vec<SynthCall> {
        self.calls.lock().clone()
    }

    /// Ids of buffered-synthesis requests, in order.
    pub fn buffer_ids(&self) -> Vec<SynthesisId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SynthCall::Buffer { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Ids of direct playback requests (speak/earcon/silence), in order.
    pub fn playback_ids(&self) -> Vec<SynthesisId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SynthCall::Speak { id, .. }
                | SynthCall::Earcon { id, .. }
                | SynthCall::Silence { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// The next playback/synthesis request fails with `err`.
    pub fn fail_once(&self, err: SynthError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn set_language_supported(&self, supported: bool) {
        *self.language_supported.lock() = supported;
    }

    pub fn providers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

pub struct ScriptedSynth {
    script: SynthScript,
    _events: SynthEventSender,
}

impl ScriptedSynth {
    fn record(&self, call: SynthCall) {
        self.script.calls.lock().push(call);
    }

    fn take_failure(&self) -> SynthResult<()> {
        match self.script.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl SpeechSynthesizer for ScriptedSynth {
    fn name(&self) -> &str {
        "scripted"
    }

    fn begin_init(&mut self) {
        self.record(SynthCall::Init);
    }

    fn speak(&mut self, text: &str, id: SynthesisId, _params: &SpeechParams) -> SynthResult<()> {
        self.take_failure()?;
        self.record(SynthCall::Speak {
            text: text.to_string(),
            id,
        });
        Ok(())
    }

    fn play_earcon(&mut self, earcon: &EarconId, id: SynthesisId) -> SynthResult<()> {
        self.take_failure()?;
        self.record(SynthCall::Earcon {
            name: earcon.0.clone(),
            id,
        });
        Ok(())
    }

    fn play_silence(&mut self, duration: Duration, id: SynthesisId) -> SynthResult<()> {
        self.take_failure()?;
        self.record(SynthCall::Silence {
            ms: duration.as_millis() as u64,
            id,
        });
        Ok(())
    }

    fn synthesize_to_buffer(
        &mut self,
        text: &str,
        id: SynthesisId,
        _params: &SpeechParams,
    ) -> SynthResult<()> {
        self.take_failure()?;
        self.record(SynthCall::Buffer {
            text: text.to_string(),
            id,
        });
        Ok(())
    }

    fn set_language(&mut self, tag: &LanguageTag) -> LanguageStatus {
        self.record(SynthCall::SetLanguage(tag.0.clone()));
        if *self.script.language_supported.lock() {
            LanguageStatus::Available
        } else {
            LanguageStatus::NotSupported
        }
    }

    fn set_voice(&mut self, voice: &VoiceId) -> SynthResult<()> {
        self.record(SynthCall::SetVoice(voice.0.clone()));
        Ok(())
    }

    fn register_earcon(&mut self, _id: EarconId, _clip: EarconClip) {}

    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }

    fn stop(&mut self) {
        self.record(SynthCall::Stop);
    }

    fn shutdown(&mut self) {
        self.record(SynthCall::Shutdown);
    }
}
