//! cpal-backed output sink.
//!
//! The writer pushes samples into an rtrb ring; the device callback
//! drains it, zero-filling on shortfall, and counts consumed frames into
//! an atomic that serves as the play cursor. Rebuilding the stream (on
//! reset or a format change) rewinds the cursor to zero, which the
//! writer's underrun heuristic interprets as a device reset.

use crate::ring_buffer::{PcmProducer, PcmRingBuffer};
use crate::sink::{AudioError, OutputSink, TrackSpec};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ring capacity in seconds of audio; enough to ride out scheduling
/// hiccups of the writer thread without adding noticeable stop latency.
const RING_SECONDS: f32 = 0.5;

pub struct CpalSink {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    producer: Option<PcmProducer>,
    spec: Option<TrackSpec>,
    consumed_frames: Arc<AtomicU64>,
    playing: bool,
}

impl CpalSink {
    pub fn try_default() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        if let Ok(name) = device.name() {
            tracing::info!(device = %name, "Using output device");
        }
        Ok(Self {
            device,
            stream: None,
            producer: None,
            spec: None,
            consumed_frames: Arc::new(AtomicU64::new(0)),
            playing: false,
        })
    }

    fn build_stream(&mut self, spec: TrackSpec) -> Result<(), AudioError> {
        if spec.bits_per_sample != 16 {
            return Err(AudioError::FormatNotSupported {
                format: format!("{} bits per sample", spec.bits_per_sample),
            });
        }
        let capacity = (spec.sample_rate as f32 * RING_SECONDS) as usize * spec.channels as usize;
        let (producer, mut consumer) = PcmRingBuffer::new(capacity.max(1024)).split();

        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let consumed = self.consumed_frames.clone();
        let channels = spec.channels as usize;
        let stream = self.device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let got = consumer.read(data);
                if got < data.len() {
                    // Underrun: keep the device fed with silence.
                    data[got..].fill(0);
                }
                consumed.fetch_add((got / channels) as u64, Ordering::Release);
            },
            |err| tracing::warn!("Output stream error: {err}"),
            None,
        )?;

        self.consumed_frames.store(0, Ordering::Release);
        self.producer = Some(producer);
        self.stream = Some(stream);
        self.spec = Some(spec);
        self.playing = false;
        tracing::debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "Output stream configured"
        );
        Ok(())
    }
}

impl OutputSink for CpalSink {
    fn configure(&mut self, spec: TrackSpec) -> Result<(), AudioError> {
        self.stream = None;
        self.producer = None;
        self.build_stream(spec)
    }

    fn spec(&self) -> Option<TrackSpec> {
        self.spec
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let Some(producer) = self.producer.as_mut() else {
            return 0;
        };
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let want = samples.len().min(producer.slots());
        if want == 0 {
            return 0;
        }
        producer.write(&samples[..want]) * 2
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = &self.stream {
            stream.play()?;
            self.playing = true;
        }
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.pause() {
                tracing::warn!("Failed to pause output stream: {err}");
            }
        }
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn play_cursor(&self) -> u64 {
        self.consumed_frames.load(Ordering::Acquire)
    }

    fn reset(&mut self) {
        // Dropping the stream drops the ring with it; queued audio is
        // gone and the next configure starts from a zero cursor.
        self.stream = None;
        self.producer = None;
        self.playing = false;
        self.consumed_frames.store(0, Ordering::Release);
        if let Some(spec) = self.spec {
            if let Err(err) = self.build_stream(spec) {
                tracing::error!("Failed to rebuild output stream: {err}");
            }
        }
    }
}
