//! Bounded cache of rendered utterances.
//!
//! Seeking backward re-speaks lines that were already synthesized under
//! the same voice configuration; caching the PCM and markers skips the
//! round trip through the provider.

use crate::marker::Marker;
use lectern_audio::TrackSpec;
use lectern_synth::SpeechParams;
use std::collections::VecDeque;
use std::sync::Arc;

/// Identity of a rendered utterance: the text plus every parameter that
/// affects the audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedKey {
    text: String,
    pitch_bits: u32,
    rate_bits: u32,
    language: Option<String>,
    voice: Option<String>,
}

impl RenderedKey {
    pub fn new(text: &str, params: &SpeechParams) -> Self {
        Self {
            text: text.to_string(),
            pitch_bits: params.pitch.to_bits(),
            rate_bits: params.rate.to_bits(),
            language: params.language.as_ref().map(|l| l.0.clone()),
            voice: params.voice.as_ref().map(|v| v.0.clone()),
        }
    }
}

/// PCM plus markers for one fully synthesized utterance.
#[derive(Debug)]
pub struct RenderedSegment {
    pub audio: Vec<Arc<Vec<u8>>>,
    pub markers: Vec<Marker>,
    pub frames: u64,
    pub spec: TrackSpec,
}

/// Small FIFO keyed by [`RenderedKey`]; re-inserting a key refreshes it.
#[derive(Debug, Default)]
pub struct RenderedCache {
    entries: VecDeque<(RenderedKey, Arc<RenderedSegment>)>,
    capacity: usize,
}

impl RenderedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn get(&self, key: &RenderedKey) -> Option<Arc<RenderedSegment>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, seg)| seg.clone())
    }

    pub fn put(&mut self, key: RenderedKey, segment: Arc<RenderedSegment>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == &key) {
            self.entries.remove(pos);
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key, segment));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(frames: u64) -> Arc<RenderedSegment> {
        Arc::new(RenderedSegment {
            audio: Vec::new(),
            markers: Vec::new(),
            frames,
            spec: TrackSpec::default(),
        })
    }

    fn key(text: &str, pitch: f32) -> RenderedKey {
        RenderedKey::new(
            text,
            &SpeechParams {
                pitch,
                ..SpeechParams::default()
            },
        )
    }

    #[test]
    fn hit_requires_matching_params() {
        let mut cache = RenderedCache::new(4);
        cache.put(key("hello", 1.0), segment(10));
        assert!(cache.get(&key("hello", 1.0)).is_some());
        assert!(cache.get(&key("hello", 0.8)).is_none());
        assert!(cache.get(&key("other", 1.0)).is_none());
    }

    #[test]
    fn bounded_eviction() {
        let mut cache = RenderedCache::new(2);
        cache.put(key("a", 1.0), segment(1));
        cache.put(key("b", 1.0), segment(2));
        cache.put(key("c", 1.0), segment(3));
        assert!(cache.get(&key("a", 1.0)).is_none());
        assert!(cache.get(&key("b", 1.0)).is_some());
        assert!(cache.get(&key("c", 1.0)).is_some());
    }

    #[test]
    fn zero_capacity_never_stores() {
        let mut cache = RenderedCache::new(0);
        cache.put(key("a", 1.0), segment(1));
        assert!(cache.is_empty());
    }
}
