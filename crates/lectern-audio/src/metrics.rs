//! Writer counters, shared as plain atomics so any thread can snapshot
//! them without locking the writer.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WriterMetrics {
    frames_written: AtomicU64,
    frames_elapsed: AtomicU64,
    underrun_resets: AtomicU64,
    chunks_enqueued: AtomicU64,
}

impl WriterMetrics {
    pub fn record_written(&self, frames: u64) {
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_elapsed(&self, frames: u64) {
        self.frames_elapsed.store(frames, Ordering::Relaxed);
    }

    pub fn record_underrun_reset(&self) {
        self.underrun_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self) {
        self.chunks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn frames_elapsed(&self) -> u64 {
        self.frames_elapsed.load(Ordering::Relaxed)
    }

    pub fn underrun_resets(&self) -> u64 {
        self.underrun_resets.load(Ordering::Relaxed)
    }

    pub fn chunks_enqueued(&self) -> u64 {
        self.chunks_enqueued.load(Ordering::Relaxed)
    }
}
