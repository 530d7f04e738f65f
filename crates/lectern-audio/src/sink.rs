//! Output device abstraction.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no output device available")]
    NoDevice,

    #[error("format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("pause stream error: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("device error: {0}")]
    Device(String),
}

/// Format of the output track.
// Mirrors the synthesis-side audio spec to avoid a cross-crate dep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl TrackSpec {
    pub fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample / 8) as usize * self.channels as usize
    }
}

impl Default for TrackSpec {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

/// An output device the buffer writer streams into.
///
/// All methods are called from the writer's thread only. `write` is
/// non-blocking and may accept a prefix of the given bytes; `play_cursor`
/// reports frames the device claims to have played and is allowed to
/// jump backwards after an underrun or a stream rebuild — the writer
/// treats any decrease as "everything written so far was consumed".
pub trait OutputSink: Send {
    /// (Re)configures the device for the given track format. Destroys
    /// any queued audio.
    fn configure(&mut self, spec: TrackSpec) -> Result<(), AudioError>;

    fn spec(&self) -> Option<TrackSpec>;

    /// Non-blocking write; returns bytes accepted (sample-aligned).
    fn write(&mut self, bytes: &[u8]) -> usize;

    fn start(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self);

    fn is_playing(&self) -> bool;

    /// Frames the device reports as played since the last reset.
    fn play_cursor(&self) -> u64;

    /// Stops playback, discards queued audio, and rewinds the cursor to
    /// zero.
    fn reset(&mut self);
}
