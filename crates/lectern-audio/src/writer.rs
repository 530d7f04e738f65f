//! The Audio Buffer Writer.
//!
//! A dedicated background loop drains queued PCM segments into the
//! output sink at short fixed intervals, tracks how many frames have
//! actually been played despite device underruns, and notifies the
//! engine whenever playback crosses the next scheduled marker frame.
//!
//! The pending segment list and the written/elapsed counters live behind
//! one mutex shared with the engine; an interrupt therefore clears them
//! atomically with respect to the writer, so a stale marker can never
//! fire after an interruption. The next-marker target itself is a plain
//! atomic so the writer never has to lock the engine's marker list.

use crate::metrics::WriterMetrics;
use crate::sink::{AudioError, OutputSink, TrackSpec};
use lectern_foundation::{Clock, SharedClock};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Sentinel for "no marker scheduled".
pub const NO_MARKER: u64 = u64::MAX;

/// Writer loop period. Short enough that marker callbacks land within
/// one frame-ish of their target at speech sample rates.
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Posted to the engine when the elapsed frame counter has crossed the
/// scheduled next-marker frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterTick {
    pub elapsed_frames: u64,
}

pub type TickSender = tokio::sync::mpsc::UnboundedSender<WriterTick>;

struct Chunk {
    data: Arc<Vec<u8>>,
    pos: usize,
}

struct Shared {
    pending: VecDeque<Chunk>,
    written_frames: u64,
    elapsed_frames: u64,
    last_cursor: u64,
    clear_requested: bool,
    spec_request: Option<TrackSpec>,
    active_spec: Option<TrackSpec>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(64),
            written_frames: 0,
            elapsed_frames: 0,
            last_cursor: 0,
            clear_requested: false,
            spec_request: None,
            active_spec: None,
        }
    }

    fn bytes_per_frame(&self) -> usize {
        self.active_spec
            .or(self.spec_request)
            .map(|s| s.bytes_per_frame())
            .unwrap_or(2)
    }
}

/// Engine-side handle to the writer state. All operations are
/// non-blocking apart from taking the shared mutex.
#[derive(Clone)]
pub struct WriterHandle {
    shared: Arc<Mutex<Shared>>,
    next_marker: Arc<AtomicU64>,
    metrics: Arc<WriterMetrics>,
}

impl WriterHandle {
    /// Queues a PCM segment for playback.
    pub fn enqueue(&self, data: Arc<Vec<u8>>) {
        if data.is_empty() {
            return;
        }
        let mut shared = self.shared.lock();
        shared.pending.push_back(Chunk { data, pos: 0 });
        self.metrics.record_chunk();
    }

    /// Queues silence and returns its length in frames.
    pub fn enqueue_silence(&self, duration_ms: u64) -> u64 {
        let mut shared = self.shared.lock();
        let spec = shared
            .active_spec
            .or(shared.spec_request)
            .unwrap_or_default();
        let frames = (spec.sample_rate as u64 * duration_ms).div_ceil(1000);
        let bytes = frames as usize * spec.bytes_per_frame();
        if bytes > 0 {
            shared.pending.push_back(Chunk {
                data: Arc::new(vec![0u8; bytes]),
                pos: 0,
            });
            self.metrics.record_chunk();
        }
        frames
    }

    /// Requests a track reconfiguration; applied by the writer on its
    /// next tick. Reconfiguring destroys queued device audio, so callers
    /// only change specs between utterances.
    pub fn request_spec(&self, spec: TrackSpec) {
        let mut shared = self.shared.lock();
        if shared.active_spec != Some(spec) || shared.spec_request.is_some() {
            shared.spec_request = Some(spec);
        }
    }

    pub fn active_spec(&self) -> Option<TrackSpec> {
        let shared = self.shared.lock();
        shared.active_spec.or(shared.spec_request)
    }

    /// Drops all queued audio and rewinds the frame counters to zero.
    /// The sink itself is reset on the writer's next tick.
    pub fn clear(&self) {
        let mut shared = self.shared.lock();
        shared.pending.clear();
        shared.written_frames = 0;
        shared.elapsed_frames = 0;
        shared.last_cursor = 0;
        shared.clear_requested = true;
        self.next_marker.store(NO_MARKER, Ordering::Release);
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.shared.lock().elapsed_frames
    }

    pub fn written_frames(&self) -> u64 {
        self.shared.lock().written_frames
    }

    pub fn set_next_marker(&self, frame: u64) {
        self.next_marker.store(frame, Ordering::Release);
    }

    pub fn clear_next_marker(&self) {
        self.next_marker.store(NO_MARKER, Ordering::Release);
    }

    pub fn metrics(&self) -> Arc<WriterMetrics> {
        self.metrics.clone()
    }
}

/// Writer state plus the sink it drains into. Owned by the writer thread
/// in production; tests drive `tick_once` directly.
pub struct WriterCore {
    shared: Arc<Mutex<Shared>>,
    next_marker: Arc<AtomicU64>,
    metrics: Arc<WriterMetrics>,
    sink: Box<dyn OutputSink>,
}

impl WriterCore {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::new())),
            next_marker: Arc::new(AtomicU64::new(NO_MARKER)),
            metrics: Arc::new(WriterMetrics::default()),
            sink,
        }
    }

    fn with_parts(
        shared: Arc<Mutex<Shared>>,
        next_marker: Arc<AtomicU64>,
        metrics: Arc<WriterMetrics>,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        Self {
            shared,
            next_marker,
            metrics,
            sink,
        }
    }

    pub fn handle(&self) -> WriterHandle {
        WriterHandle {
            shared: self.shared.clone(),
            next_marker: self.next_marker.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// One writer pass: apply control requests, drain pending audio,
    /// advance the elapsed counter from the device cursor, and report
    /// whether the next marker frame has been crossed.
    pub fn tick_once(&mut self) -> Option<WriterTick> {
        let mut shared = self.shared.lock();

        if shared.clear_requested {
            self.sink.reset();
            shared.clear_requested = false;
        }
        if let Some(spec) = shared.spec_request.take() {
            if self.sink.spec() != Some(spec) {
                if self.sink.spec().is_some() {
                    self.sink.reset();
                }
                if let Err(err) = self.sink.configure(spec) {
                    tracing::error!("Failed to configure output sink: {err}");
                    shared.spec_request = Some(spec);
                    return None;
                }
            }
            shared.active_spec = Some(spec);
        }

        let bpf = shared.bytes_per_frame();

        // Drain as much as the device accepts, non-blocking.
        loop {
            let Some(front) = shared.pending.front_mut() else {
                break;
            };
            let accepted = self.sink.write(&front.data[front.pos..]);
            if accepted == 0 {
                break; // Device buffer full.
            }
            front.pos += accepted;
            let done = front.pos >= front.data.len();
            shared.written_frames += (accepted / bpf) as u64;
            self.metrics.record_written((accepted / bpf) as u64);
            if done {
                shared.pending.pop_front();
            } else {
                break;
            }
        }

        // Primed: start once the device buffer is full or everything we
        // had fit.
        if shared.written_frames > 0 && !self.sink.is_playing() {
            if let Err(err) = self.sink.start() {
                tracing::error!("Failed to start output sink: {err}");
            }
        }

        if self.sink.is_playing() {
            let pos = self.sink.play_cursor();
            if pos < shared.last_cursor {
                // The device reset its position after an underrun and
                // silently dropped its notion of progress. Assume all
                // written frames were consumed so elapsed doesn't stall.
                tracing::debug!(
                    cursor = pos,
                    last = shared.last_cursor,
                    written = shared.written_frames,
                    "Play cursor reset detected"
                );
                shared.elapsed_frames = shared.written_frames;
                self.metrics.record_underrun_reset();
            } else {
                shared.elapsed_frames += pos - shared.last_cursor;
            }
            shared.last_cursor = pos;
            self.metrics.set_elapsed(shared.elapsed_frames);

            let target = self.next_marker.load(Ordering::Acquire);
            if target != NO_MARKER && target <= shared.elapsed_frames {
                return Some(WriterTick {
                    elapsed_frames: shared.elapsed_frames,
                });
            }
        }
        None
    }
}

/// Builds the sink on the writer thread; cpal streams are not `Send`, so
/// the device must be opened where it is used.
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn OutputSink>, AudioError> + Send>;

/// Handle to the dedicated writer thread.
pub struct BufferWriterThread {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl BufferWriterThread {
    /// Spawns the writer loop. Returns the thread handle plus the
    /// engine-side writer handle.
    pub fn spawn(
        sink_factory: SinkFactory,
        tick_tx: TickSender,
        clock: SharedClock,
    ) -> (Self, WriterHandle) {
        let shared = Arc::new(Mutex::new(Shared::new()));
        let next_marker = Arc::new(AtomicU64::new(NO_MARKER));
        let metrics = Arc::new(WriterMetrics::default());
        let handle = WriterHandle {
            shared: shared.clone(),
            next_marker: next_marker.clone(),
            metrics: metrics.clone(),
        };
        let running = Arc::new(AtomicBool::new(true));
        let running_in_thread = running.clone();

        let join = std::thread::Builder::new()
            .name("audio-writer".to_string())
            .spawn(move || {
                let sink = match sink_factory() {
                    Ok(sink) => sink,
                    Err(err) => {
                        tracing::error!("Failed to open output sink: {err}");
                        return;
                    }
                };
                let mut core = WriterCore::with_parts(shared, next_marker, metrics, sink);
                tracing::info!("Audio writer started");
                while running_in_thread.load(Ordering::Relaxed) {
                    if let Some(tick) = core.tick_once() {
                        if tick_tx.send(tick).is_err() {
                            break; // Engine gone.
                        }
                    }
                    clock.sleep(TICK_INTERVAL);
                }
                tracing::info!("Audio writer stopped");
            })
            .expect("spawn audio-writer thread");

        (
            Self {
                handle: Some(join),
                running,
            },
            handle,
        )
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BufferWriterThread {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualSink;

    fn core_with_sink(accept_bytes: usize) -> (WriterCore, WriterHandle, ManualSink) {
        let sink = ManualSink::new(accept_bytes);
        let core = WriterCore::new(Box::new(sink.clone()));
        let handle = core.handle();
        handle.request_spec(TrackSpec::default());
        (core, handle, sink)
    }

    #[test]
    fn drains_pending_audio_and_starts_playback() {
        let (mut core, handle, sink) = core_with_sink(1_000_000);
        handle.enqueue(Arc::new(vec![1u8; 400]));
        assert_eq!(core.tick_once(), None);
        assert_eq!(sink.written_bytes(), 400);
        assert!(sink.is_playing_flag());
        assert_eq!(handle.written_frames(), 200);
    }

    #[test]
    fn partial_accept_resumes_next_tick() {
        let (mut core, handle, sink) = core_with_sink(100);
        handle.enqueue(Arc::new(vec![1u8; 250]));
        core.tick_once();
        assert_eq!(sink.written_bytes(), 100);
        core.tick_once();
        assert_eq!(sink.written_bytes(), 200);
        core.tick_once();
        assert_eq!(sink.written_bytes(), 250);
        assert_eq!(handle.written_frames(), 125);
    }

    #[test]
    fn elapsed_follows_cursor_and_fires_marker() {
        let (mut core, handle, sink) = core_with_sink(1_000_000);
        handle.enqueue(Arc::new(vec![0u8; 2000]));
        handle.set_next_marker(500);

        core.tick_once();
        sink.set_cursor(300);
        assert_eq!(core.tick_once(), None);
        sink.set_cursor(600);
        assert_eq!(
            core.tick_once(),
            Some(WriterTick {
                elapsed_frames: 600
            })
        );
    }

    #[test]
    fn cursor_decrease_counts_written_as_elapsed() {
        let (mut core, handle, sink) = core_with_sink(1_000_000);
        handle.enqueue(Arc::new(vec![0u8; 2000])); // 1000 frames
        handle.set_next_marker(1000);

        core.tick_once();
        sink.set_cursor(400);
        core.tick_once();
        assert_eq!(handle.elapsed_frames(), 400);

        // Device reset: cursor jumps backwards.
        sink.set_cursor(10);
        let tick = core.tick_once();
        assert_eq!(handle.elapsed_frames(), 1000);
        assert_eq!(
            tick,
            Some(WriterTick {
                elapsed_frames: 1000
            })
        );
        assert_eq!(handle.metrics().underrun_resets(), 1);
    }

    #[test]
    fn clear_resets_counters_and_sink() {
        let (mut core, handle, sink) = core_with_sink(1_000_000);
        handle.enqueue(Arc::new(vec![0u8; 2000]));
        core.tick_once();
        sink.set_cursor(500);
        core.tick_once();
        assert!(handle.elapsed_frames() > 0);

        handle.clear();
        assert_eq!(handle.elapsed_frames(), 0);
        assert_eq!(handle.written_frames(), 0);
        core.tick_once();
        assert_eq!(sink.reset_count(), 1);
    }

    #[test]
    fn silence_length_is_frame_accurate() {
        let (_core, handle, _sink) = core_with_sink(0);
        // 100 ms at 22050 Hz rounds up to 2205 frames.
        assert_eq!(handle.enqueue_silence(100), 2205);
    }
}
