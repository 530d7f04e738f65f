//! Short sound cues played like speech units within the queue.

use crate::error::{SynthError, SynthResult};
use crate::types::{AudioSpec, SampleFormat};
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

/// Registry key for an earcon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EarconId(pub String);

impl EarconId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for EarconId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded sound cue, kept as raw PCM so buffered playback can feed it
/// straight into the output stream.
#[derive(Debug, Clone)]
pub struct EarconClip {
    pub spec: AudioSpec,
    pub pcm: Vec<u8>,
}

impl EarconClip {
    pub fn new(spec: AudioSpec, pcm: Vec<u8>) -> Self {
        Self { spec, pcm }
    }

    /// Decodes a 16-bit PCM WAV resource.
    pub fn from_wav_bytes(bytes: &[u8]) -> SynthResult<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| SynthError::InvalidInput(format!("bad earcon wav: {e}")))?;
        let wav_spec = reader.spec();
        if wav_spec.bits_per_sample != 16 || wav_spec.sample_format != hound::SampleFormat::Int {
            return Err(SynthError::InvalidInput(format!(
                "earcon must be 16-bit PCM, got {} bits",
                wav_spec.bits_per_sample
            )));
        }
        let mut pcm = Vec::new();
        for sample in reader.samples::<i16>() {
            let sample =
                sample.map_err(|e| SynthError::InvalidInput(format!("bad earcon wav: {e}")))?;
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(Self {
            spec: AudioSpec {
                sample_rate: wav_spec.sample_rate,
                channels: wav_spec.channels,
                sample_format: SampleFormat::I16,
            },
            pcm,
        })
    }

    pub fn frames(&self) -> u64 {
        (self.pcm.len() / self.spec.bytes_per_frame()) as u64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.frames() * 1000 / self.spec.sample_rate as u64)
    }
}

/// Earcons registered with the engine, keyed by id. Re-registering an id
/// replaces the clip.
#[derive(Debug, Default)]
pub struct EarconSet {
    clips: HashMap<EarconId, EarconClip>,
}

impl EarconSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: EarconId, clip: EarconClip) {
        tracing::debug!(earcon = %id, duration_ms = clip.duration().as_millis(), "Registered earcon");
        self.clips.insert(id, clip);
    }

    pub fn get(&self, id: &EarconId) -> Option<&EarconClip> {
        self.clips.get(id)
    }

    pub fn contains(&self, id: &EarconId) -> bool {
        self.clips.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EarconId, &EarconClip)> {
        self.clips.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_clip(frames: usize) -> EarconClip {
        EarconClip::new(AudioSpec::default(), vec![0u8; frames * 2])
    }

    #[test]
    fn clip_frame_math() {
        let clip = tone_clip(22_050);
        assert_eq!(clip.frames(), 22_050);
        assert_eq!(clip.duration(), Duration::from_millis(1000));
    }

    #[test]
    fn set_replaces_on_reinsert() {
        let mut set = EarconSet::new();
        let id = EarconId::new("scene_change");
        set.insert(id.clone(), tone_clip(10));
        set.insert(id.clone(), tone_clip(20));
        assert_eq!(set.get(&id).unwrap().frames(), 20);
    }

    #[test]
    fn wav_round_trip() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer =
                hound::WavWriter::new(Cursor::new(&mut bytes), spec).expect("wav writer");
            for i in 0..100i16 {
                writer.write_sample(i).unwrap();
            }
            writer.finalize().unwrap();
        }
        let clip = EarconClip::from_wav_bytes(&bytes).unwrap();
        assert_eq!(clip.frames(), 100);
        assert_eq!(clip.spec.sample_rate, 22_050);
    }
}
