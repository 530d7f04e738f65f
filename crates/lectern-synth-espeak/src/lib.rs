//! eSpeak NG backend for the Lectern speech provider interface.
//!
//! Direct strategy spawns `espeak-ng` and lets it play through its own
//! audio output; buffered strategy captures `--stdout` WAV data, parses
//! it with hound, and streams PCM chunks back as events. eSpeak has no
//! word-progress callback, so word-range markers are estimated by
//! mapping character positions proportionally onto the rendered frames.

use lectern_synth::{
    AudioSpec, EarconClip, EarconId, LanguageStatus, LanguageTag, SampleFormat, SpeechParams,
    SpeechSynthesizer, SynthError, SynthEvent, SynthEventSender, SynthResult, SynthesisId,
    SynthesizerFactory, VoiceGender, VoiceId, VoiceInfo,
};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, warn};


/// Bytes of PCM per `AudioAvailable` event; sample-aligned.
const CHUNK_BYTES: usize = 8192;

pub struct EspeakFactory;

impl SynthesizerFactory for EspeakFactory {
    fn create(&self, events: SynthEventSender) -> Box<dyn SpeechSynthesizer> {
        Box::new(EspeakSynthesizer::new(events))
    }
}

pub struct EspeakSynthesizer {
    events: SynthEventSender,
    command: Arc<RwLock<Option<String>>>,
    voices: Arc<RwLock<Vec<VoiceInfo>>>,
    initialized: Arc<AtomicBool>,
    language: Option<LanguageTag>,
    voice: Option<VoiceId>,
    earcons: HashMap<EarconId, Duration>,
    current: Option<tokio::task::JoinHandle<()>>,
}

impl EspeakSynthesizer {
    pub fn new(events: SynthEventSender) -> Self {
        Self {
            events,
            command: Arc::new(RwLock::new(None)),
            voices: Arc::new(RwLock::new(Vec::new())),
            initialized: Arc::new(AtomicBool::new(false)),
            language: None,
            voice: None,
            earcons: HashMap::new(),
            current: None,
        }
    }

    fn command_name(&self) -> SynthResult<String> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(SynthError::NotInitialized);
        }
        self.command
            .read()
            .clone()
            .ok_or(SynthError::NotInitialized)
    }

    fn voice_args(&self, params: &SpeechParams) -> Vec<String> {
        build_args(
            params,
            params
                .voice
                .as_ref()
                .or(self.voice.as_ref())
                .map(|v| v.0.clone()),
            params
                .language
                .as_ref()
                .or(self.language.as_ref())
                .map(|l| l.0.clone()),
        )
    }

    fn track(&mut self, handle: tokio::task::JoinHandle<()>) {
        // At most one request is in flight; a new one supersedes the
        // previous handle.
        if let Some(old) = self.current.replace(handle) {
            if !old.is_finished() {
                old.abort();
            }
        }
    }
}

impl SpeechSynthesizer for EspeakSynthesizer {
    fn name(&self) -> &str {
        "espeak-ng"
    }

    fn begin_init(&mut self) {
        let events = self.events.clone();
        let command = self.command.clone();
        let voices = self.voices.clone();
        let initialized = self.initialized.clone();
        tokio::spawn(async move {
            let Some(cmd) = detect_command().await else {
                let _ = events.send(SynthEvent::InitFailed {
                    reason: "espeak-ng not found; install espeak-ng or espeak".to_string(),
                });
                return;
            };
            match Command::new(&cmd).arg("--voices").output().await {
                Ok(output) => {
                    let listing = String::from_utf8_lossy(&output.stdout);
                    let parsed = parse_voice_list(&listing);
                    debug!(count = parsed.len(), "Loaded espeak voices");
                    *voices.write() = parsed;
                    *command.write() = Some(cmd);
                    initialized.store(true, Ordering::Release);
                    let _ = events.send(SynthEvent::Ready);
                }
                Err(err) => {
                    let _ = events.send(SynthEvent::InitFailed {
                        reason: format!("failed to list voices: {err}"),
                    });
                }
            }
        });
    }

    fn speak(&mut self, text: &str, id: SynthesisId, params: &SpeechParams) -> SynthResult<()> {
        if text.trim().is_empty() {
            return Err(SynthError::InvalidInput("empty text".to_string()));
        }
        let cmd = self.command_name()?;
        let mut args = self.voice_args(params);
        args.push(text.to_string());
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let child = Command::new(&cmd).args(&args).kill_on_drop(true).spawn();
            let mut child = match child {
                Ok(child) => child,
                Err(err) => {
                    let _ = events.send(SynthEvent::Error {
                        id,
                        error: SynthError::EngineGone(err.to_string()),
                    });
                    return;
                }
            };
            let _ = events.send(SynthEvent::Started { id });
            match child.wait().await {
                Ok(status) if status.success() => {
                    let _ = events.send(SynthEvent::Done { id });
                }
                Ok(status) => {
                    let _ = events.send(SynthEvent::Error {
                        id,
                        error: SynthError::Synthesis(format!("espeak exited with {status}")),
                    });
                }
                Err(err) => {
                    let _ = events.send(SynthEvent::Error {
                        id,
                        error: SynthError::EngineGone(err.to_string()),
                    });
                }
            }
        });
        self.track(handle);
        Ok(())
    }

    fn play_earcon(&mut self, earcon: &EarconId, id: SynthesisId) -> SynthResult<()> {
        // eSpeak cannot route foreign PCM through its own output; honor
        // the cue's timing so the queue advances on schedule.
        let duration = self
            .earcons
            .get(earcon)
            .copied()
            .unwrap_or(Duration::from_millis(500));
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let _ = events.send(SynthEvent::Started { id });
            tokio::time::sleep(duration).await;
            let _ = events.send(SynthEvent::Done { id });
        });
        self.track(handle);
        Ok(())
    }

    fn play_silence(&mut self, duration: Duration, id: SynthesisId) -> SynthResult<()> {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let _ = events.send(SynthEvent::Started { id });
            tokio::time::sleep(duration).await;
            let _ = events.send(SynthEvent::Done { id });
        });
        self.track(handle);
        Ok(())
    }

    fn synthesize_to_buffer(
        &mut self,
        text: &str,
        id: SynthesisId,
        params: &SpeechParams,
    ) -> SynthResult<()> {
        if text.trim().is_empty() {
            return Err(SynthError::InvalidInput("empty text".to_string()));
        }
        let cmd = self.command_name()?;
        let mut args = vec!["--stdout".to_string()];
        args.extend(self.voice_args(params));
        args.push(text.to_string());
        let events = self.events.clone();
        let text = text.to_string();
        let handle = tokio::spawn(async move {
            let output = Command::new(&cmd)
                .args(&args)
                .kill_on_drop(true)
                .output()
                .await;
            let output = match output {
                Ok(output) => output,
                Err(err) => {
                    let _ = events.send(SynthEvent::Error {
                        id,
                        error: SynthError::EngineGone(err.to_string()),
                    });
                    return;
                }
            };
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!("espeak synthesis failed: {stderr}");
                let _ = events.send(SynthEvent::Error {
                    id,
                    error: SynthError::Synthesis(stderr.into_owned()),
                });
                return;
            }
            stream_wav(&events, id, &text, &output.stdout);
        });
        self.track(handle);
        Ok(())
    }

    fn set_language(&mut self, tag: &LanguageTag) -> LanguageStatus {
        let wanted = tag.0.to_ascii_lowercase();
        let supported = self
            .voices
            .read()
            .iter()
            .any(|v| language_matches(&v.language, &wanted));
        if supported {
            self.language = Some(tag.clone());
            LanguageStatus::Available
        } else {
            warn!(language = %tag, "Language not offered by espeak");
            LanguageStatus::NotSupported
        }
    }

    fn set_voice(&mut self, voice: &VoiceId) -> SynthResult<()> {
        if !self.voices.read().iter().any(|v| &v.id == voice) {
            return Err(SynthError::VoiceNotFound(voice.0.clone()));
        }
        self.voice = Some(voice.clone());
        Ok(())
    }

    fn register_earcon(&mut self, id: EarconId, clip: EarconClip) {
        self.earcons.insert(id, clip.duration());
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.read().clone()
    }

    fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            // kill_on_drop reaps the child when the task is aborted.
            handle.abort();
        }
    }

    fn shutdown(&mut self) {
        self.stop();
        self.initialized.store(false, Ordering::Release);
        self.earcons.clear();
        debug!("espeak synthesizer shut down");
    }
}

async fn detect_command() -> Option<String> {
    for candidate in ["espeak-ng", "espeak"] {
        if Command::new(candidate)
            .arg("--version")
            .output()
            .await
            .is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Parses `espeak --voices` output.
/// Format: `Pty Language Age/Gender VoiceName File Other`, where the
/// age/gender column looks like `--/M`.
fn parse_voice_list(listing: &str) -> Vec<VoiceInfo> {
    let row = Regex::new(r"^\s*(\d+)\s+([\w-]+)\s+(\S+)\s+(\S+)").expect("voice row pattern");
    let mut voices = Vec::new();
    for line in listing.lines().skip(1) {
        let Some(caps) = row.captures(line) else {
            continue;
        };
        let language = caps.get(2).map_or("", |m| m.as_str()).to_string();
        let age_gender = caps.get(3).map_or("", |m| m.as_str());
        let gender = match age_gender.rsplit('/').next().unwrap_or("") {
            "M" => VoiceGender::Male,
            "F" => VoiceGender::Female,
            _ => VoiceGender::Unknown,
        };
        let id = caps.get(4).map_or("", |m| m.as_str()).to_string();
        voices.push(VoiceInfo {
            name: format!("{language} ({id})"),
            id: VoiceId(id),
            language,
            gender,
        });
    }
    voices
}

fn language_matches(offered: &str, wanted: &str) -> bool {
    let offered = offered.to_ascii_lowercase();
    offered == wanted
        || offered.starts_with(&format!("{wanted}-"))
        || wanted.starts_with(&format!("{offered}-"))
}

/// Common espeak arguments for a request (voice, rate, pitch).
fn build_args(params: &SpeechParams, voice: Option<String>, language: Option<String>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(voice) = voice.or(language) {
        args.push("-v".to_string());
        args.push(voice);
    }
    // espeak speaks in words per minute, default 175.
    let wpm = (175.0 * params.rate).clamp(80.0, 450.0) as u32;
    args.push("-s".to_string());
    args.push(wpm.to_string());
    // Pitch is 0-99 with 50 as the neutral default.
    let pitch = (50.0 * params.pitch).clamp(0.0, 99.0) as u32;
    args.push("-p".to_string());
    args.push(pitch.to_string());
    args
}

/// Decodes captured WAV output and streams it back as synthesis events.
fn stream_wav(events: &SynthEventSender, id: SynthesisId, text: &str, wav: &[u8]) {
    let mut reader = match hound::WavReader::new(Cursor::new(wav)) {
        Ok(reader) => reader,
        Err(err) => {
            let _ = events.send(SynthEvent::Error {
                id,
                error: SynthError::Synthesis(format!("unreadable wav output: {err}")),
            });
            return;
        }
    };
    let wav_spec = reader.spec();
    let spec = AudioSpec {
        sample_rate: wav_spec.sample_rate,
        channels: wav_spec.channels,
        sample_format: SampleFormat::I16,
    };
    let samples: Vec<i16> = match reader.samples::<i16>().collect::<Result<_, _>>() {
        Ok(samples) => samples,
        Err(err) => {
            let _ = events.send(SynthEvent::Error {
                id,
                error: SynthError::Synthesis(format!("bad wav sample data: {err}")),
            });
            return;
        }
    };
    if samples.is_empty() {
        let _ = events.send(SynthEvent::Error {
            id,
            error: SynthError::Synthesis("no audio data generated".to_string()),
        });
        return;
    }

    let _ = events.send(SynthEvent::BeginSynthesis { id, spec });
    let _ = events.send(SynthEvent::Started { id });

    let total_frames = (samples.len() / wav_spec.channels as usize) as u64;
    for span in estimate_word_spans(text, total_frames) {
        let _ = events.send(SynthEvent::RangeStart {
            id,
            frame: span.frame,
            char_start: span.char_start,
            char_end: span.char_end,
        });
    }

    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    for chunk in bytes.chunks(CHUNK_BYTES) {
        let _ = events.send(SynthEvent::AudioAvailable {
            id,
            data: chunk.to_vec(),
        });
    }
    let _ = events.send(SynthEvent::Done { id });
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WordSpan {
    frame: u64,
    char_start: usize,
    char_end: usize,
}

/// Maps each whitespace-separated word to an estimated start frame,
/// proportional to its character position. Coarse, but close enough for
/// read-along highlighting at sentence granularity.
fn estimate_word_spans(text: &str, total_frames: u64) -> Vec<WordSpan> {
    let total_chars = text.chars().count();
    if total_chars == 0 || total_frames == 0 {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;
    for (pos, ch) in text.chars().chain(std::iter::once(' ')).enumerate() {
        if ch.is_whitespace() {
            if let Some(start) = word_start.take() {
                spans.push(WordSpan {
                    frame: total_frames * start as u64 / total_chars as u64,
                    char_start: start,
                    char_end: pos,
                });
            }
        } else if word_start.is_none() {
            word_start = Some(pos);
        }
    }
    spans
}
