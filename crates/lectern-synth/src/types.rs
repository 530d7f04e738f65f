//! Core types shared between the engine and provider implementations.

use serde::{Deserialize, Serialize};

/// PCM sample encoding of a synthesized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Format of one synthesized audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioSpec {
    /// One frame covers one sample period across all channels.
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        // What speech engines commonly produce; also the track format
        // assumed before the first synthesis reports its own.
        Self {
            sample_rate: 22_050,
            channels: 1,
            sample_format: SampleFormat::I16,
        }
    }
}

/// BCP-47 language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageTag(pub String);

impl std::fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-scoped voice identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceId(pub String);

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceGender {
    Male,
    Female,
    Unknown,
}

/// Voice metadata reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: VoiceId,
    pub name: String,
    pub language: String,
    pub gender: VoiceGender,
}

/// Result of a language selection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageStatus {
    Available,
    NotSupported,
}

/// Per-utterance synthesis parameters, snapshotted from the engine's
/// active voice configuration when the request is issued.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechParams {
    /// Pitch multiplier (1.0 is normal).
    pub pitch: f32,
    /// Rate multiplier (1.0 is normal).
    pub rate: f32,
    pub language: Option<LanguageTag>,
    pub voice: Option<VoiceId>,
    /// Added to reported character offsets so word-range callbacks are
    /// relative to the full display line, not the synthesized fragment.
    pub range_offset: usize,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            rate: 1.0,
            language: None,
            voice: None,
            range_offset: 0,
        }
    }
}
