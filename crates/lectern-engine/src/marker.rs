//! Frame-timeline markers.
//!
//! A marker associates a future point in the output stream's frame
//! timeline with an event to fire: utterance start, word-range start,
//! earcon start, or utterance done. The writer thread only ever sees the
//! next marker's absolute target frame (a plain atomic published through
//! the writer handle); the ordered queue itself stays on the engine side.

use crate::command::{CommandId, UtteranceKind};
use lectern_audio::WriterHandle;
use lectern_synth::EarconId;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    Start,
    RangeStart { char_start: usize, char_end: usize },
    StartEarcon(EarconId),
    Done,
}

/// A marker as recorded on its owning command: frame offset relative to
/// the command's begin frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub frame: u64,
}

/// A marker scheduled against the stream's absolute frame timeline.
#[derive(Debug, Clone)]
pub struct ScheduledMarker {
    pub kind: MarkerKind,
    /// Absolute frame at which to fire.
    pub target: u64,
    pub owner: CommandId,
    pub utterance: UtteranceKind,
    pub line: usize,
    pub range_offset: usize,
}

/// Ordered pending markers. Markers for a command are only appended
/// while that command is the synthesis target and commands render
/// sequentially, so targets arrive in non-decreasing order and a plain
/// FIFO suffices.
#[derive(Debug, Default)]
pub struct MarkerQueue {
    next: Option<ScheduledMarker>,
    pending: VecDeque<ScheduledMarker>,
}

impl MarkerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, marker: ScheduledMarker, writer: &WriterHandle) {
        if self.next.is_none() {
            writer.set_next_marker(marker.target);
            self.next = Some(marker);
        } else {
            self.pending.push_back(marker);
        }
    }

    /// Pops the next marker if playback has reached its target,
    /// promoting the following one to the writer's watch atomic.
    pub fn pop_due(&mut self, elapsed: u64, writer: &WriterHandle) -> Option<ScheduledMarker> {
        if self.next.as_ref().map_or(true, |m| m.target > elapsed) {
            return None;
        }
        let fired = self.next.take();
        match self.pending.pop_front() {
            Some(next) => {
                writer.set_next_marker(next.target);
                self.next = Some(next);
            }
            None => writer.clear_next_marker(),
        }
        fired
    }

    pub fn clear(&mut self, writer: &WriterHandle) {
        self.next = None;
        self.pending.clear();
        writer.clear_next_marker();
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_none() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_audio::testing::ManualSink;
    use lectern_audio::WriterCore;

    fn scheduled(target: u64, owner: CommandId) -> ScheduledMarker {
        ScheduledMarker {
            kind: MarkerKind::Done,
            target,
            owner,
            utterance: UtteranceKind::Sentence,
            line: 0,
            range_offset: 0,
        }
    }

    #[test]
    fn fires_in_order_and_tracks_writer_atomic() {
        let core = WriterCore::new(Box::new(ManualSink::new(0)));
        let writer = core.handle();
        let mut q = MarkerQueue::new();

        q.push(scheduled(100, 1), &writer);
        q.push(scheduled(200, 2), &writer);
        q.push(scheduled(200, 3), &writer);

        assert!(q.pop_due(50, &writer).is_none());
        assert_eq!(q.pop_due(150, &writer).unwrap().owner, 1);
        assert!(q.pop_due(150, &writer).is_none());
        assert_eq!(q.pop_due(250, &writer).unwrap().owner, 2);
        assert_eq!(q.pop_due(250, &writer).unwrap().owner, 3);
        assert!(q.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let core = WriterCore::new(Box::new(ManualSink::new(0)));
        let writer = core.handle();
        let mut q = MarkerQueue::new();
        q.push(scheduled(10, 1), &writer);
        q.push(scheduled(20, 2), &writer);
        q.clear(&writer);
        assert!(q.is_empty());
        assert!(q.pop_due(u64::MAX - 1, &writer).is_none());
    }
}
