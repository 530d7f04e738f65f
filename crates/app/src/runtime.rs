//! Wires the engine to the espeak provider and the cpal output sink.

use crate::fs_provider::FsChapterProvider;
use anyhow::Result;
use lectern_audio::{CpalSink, OutputSink};
use lectern_engine::{
    chapter_change_earcon, scene_change_earcon, EngineBuilder, EngineHandle, PlaybackStrategy,
};
use lectern_foundation::ReaderPrefs;
use lectern_synth::{AudioSpec, EarconClip};
use lectern_synth_espeak::EspeakFactory;
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;

pub struct RuntimeOptions {
    pub chapters_dir: PathBuf,
    pub strategy: PlaybackStrategy,
    pub prefs: ReaderPrefs,
    pub start_chapter: i64,
}

pub fn start(options: RuntimeOptions) -> Result<EngineHandle> {
    let provider = Arc::new(FsChapterProvider::open(&options.chapters_dir)?);
    let mut builder = EngineBuilder::new(options.strategy, Box::new(EspeakFactory), provider)
        .prefs(options.prefs)
        .earcon(scene_change_earcon(), chime(&[880.0, 1320.0], 350))
        .earcon(chapter_change_earcon(), chime(&[523.25, 659.25, 784.0], 600));
    if options.strategy == PlaybackStrategy::Buffered {
        builder = builder.sink(Box::new(|| {
            CpalSink::try_default().map(|sink| Box::new(sink) as Box<dyn OutputSink>)
        }));
    }
    let handle = builder.spawn()?;
    handle.goto_chapter(options.start_chapter);
    Ok(handle)
}

/// Renders a short decaying chord as 16-bit mono PCM so the earcons need
/// no bundled resource files.
fn chime(freqs: &[f32], duration_ms: u64) -> EarconClip {
    let spec = AudioSpec::default();
    let frames = spec.sample_rate as u64 * duration_ms / 1000;
    let mut pcm = Vec::with_capacity(frames as usize * 2);
    for i in 0..frames {
        let t = i as f32 / spec.sample_rate as f32;
        let envelope = (1.0 - i as f32 / frames as f32).powi(2);
        let mix: f32 = freqs.iter().map(|f| (t * f * TAU).sin()).sum::<f32>() / freqs.len() as f32;
        let sample = (mix * envelope * 0.4 * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    EarconClip::new(spec, pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chime_matches_requested_duration() {
        let clip = chime(&[880.0], 350);
        assert_eq!(clip.frames(), 22_050 * 350 / 1000);
        assert_eq!(clip.spec.channels, 1);
        // Decaying envelope: ends silent.
        let tail = &clip.pcm[clip.pcm.len() - 2..];
        assert_eq!(tail, &[0, 0]);
    }
}
