//! Test support: an output sink with a hand-driven play cursor.

use crate::sink::{AudioError, OutputSink, TrackSpec};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    spec: Option<TrackSpec>,
    playing: bool,
    cursor: u64,
    written: Vec<u8>,
    resets: usize,
}

/// An [`OutputSink`] whose play cursor is set explicitly by the test,
/// accepting at most `accept_per_write` bytes per write call to simulate
/// a bounded device buffer.
#[derive(Clone)]
pub struct ManualSink {
    inner: Arc<Mutex<Inner>>,
    accept_per_write: usize,
}

impl ManualSink {
    pub fn new(accept_per_write: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            accept_per_write,
        }
    }

    pub fn set_cursor(&self, frames: u64) {
        self.inner.lock().cursor = frames;
    }

    pub fn written_bytes(&self) -> usize {
        self.inner.lock().written.len()
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().written.clone()
    }

    pub fn is_playing_flag(&self) -> bool {
        self.inner.lock().playing
    }

    pub fn reset_count(&self) -> usize {
        self.inner.lock().resets
    }
}

impl OutputSink for ManualSink {
    fn configure(&mut self, spec: TrackSpec) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        inner.spec = Some(spec);
        inner.cursor = 0;
        Ok(())
    }

    fn spec(&self) -> Option<TrackSpec> {
        self.inner.lock().spec
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let accept = bytes.len().min(self.accept_per_write) & !1;
        let mut inner = self.inner.lock();
        inner.written.extend_from_slice(&bytes[..accept]);
        accept
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.inner.lock().playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.inner.lock().playing = false;
    }

    fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    fn play_cursor(&self) -> u64 {
        self.inner.lock().cursor
    }

    fn reset(&mut self) {
        let mut inner = self.inner.lock();
        inner.playing = false;
        inner.cursor = 0;
        inner.written.clear();
        inner.resets += 1;
    }
}
