//! Playback commands and the ordered queue they live in.

use crate::marker::Marker;
use lectern_synth::{EarconId, LanguageTag, VoiceId};
use std::collections::VecDeque;
use std::sync::Arc;

/// Internal id disambiguating retried or interrupted synthesis attempts.
/// Provider events carry it back; stale ids are ignored on arrival.
pub type CommandId = u64;

/// What a playback command is, for the purpose of reacting to its
/// completion. Mirrors how the provider callbacks are correlated: a
/// `DialoguePartial` completion does not advance the line (the speaker
/// tag is still queued behind it), a `FinalChapter` completion stops
/// playback, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    Sentence,
    Dialogue,
    DialoguePartial,
    Earcon,
    ChapterChangeEarcon,
    FinalChapter,
}

/// State shared by every playback (non-configuration) command.
#[derive(Debug)]
pub struct PlaybackBody {
    pub id: CommandId,
    pub kind: UtteranceKind,
    /// Line this utterance belongs to.
    pub line: usize,
    /// Added to word-range character offsets so they are relative to the
    /// full display line.
    pub range_offset: usize,
    /// Absolute frame at which this command's audio starts.
    pub begin: u64,
    /// Rendered length in frames (grows during synthesis).
    pub frames: u64,
    /// Markers recorded while this command was the synthesis target,
    /// with frame offsets relative to `begin`.
    pub markers: Vec<Marker>,
    pub retries: u8,
}

impl PlaybackBody {
    pub fn new(id: CommandId, kind: UtteranceKind, line: usize, range_offset: usize) -> Self {
        Self {
            id,
            kind,
            line,
            range_offset,
            begin: 0,
            frames: 0,
            markers: Vec::new(),
            retries: 0,
        }
    }
}

/// One entry of the command queue. Configuration commands execute
/// synchronously and always auto-advance; playback commands hand off to
/// the provider (or the writer) and complete asynchronously.
#[derive(Debug)]
pub enum Command {
    SetPitch(f32),
    SetRate(f32),
    SetLanguage(LanguageTag),
    SetVoice(VoiceId),
    Speak {
        body: PlaybackBody,
        text: String,
        /// PCM accumulated during buffered synthesis, kept for the
        /// rendered-utterance cache.
        audio: Vec<Arc<Vec<u8>>>,
    },
    Earcon {
        body: PlaybackBody,
        earcon: EarconId,
    },
    Silence {
        body: PlaybackBody,
        duration_ms: u64,
    },
}

impl Command {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Command::SetPitch(_)
                | Command::SetRate(_)
                | Command::SetLanguage(_)
                | Command::SetVoice(_)
        )
    }

    pub fn body(&self) -> Option<&PlaybackBody> {
        match self {
            Command::Speak { body, .. }
            | Command::Earcon { body, .. }
            | Command::Silence { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut PlaybackBody> {
        match self {
            Command::Speak { body, .. }
            | Command::Earcon { body, .. }
            | Command::Silence { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// FIFO command queue. Commands are owned exclusively by the queue until
/// popped for execution; a transiently failed command is pushed back to
/// the front so ordering survives provider restarts.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<Command>,
    next_id: CommandId,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_id(&mut self) -> CommandId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn push_back(&mut self, cmd: Command) {
        self.items.push_back(cmd);
    }

    pub fn push_front(&mut self, cmd: Command) {
        self.items.push_front(cmd);
    }

    pub fn pop_front(&mut self) -> Option<Command> {
        self.items.pop_front()
    }

    /// Empties the queue, handing the drained commands to the caller
    /// (interrupt still executes configuration commands from them).
    pub fn take_all(&mut self) -> VecDeque<Command> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut q = CommandQueue::new();
        let a = q.alloc_id();
        let b = q.alloc_id();
        assert!(b > a);
    }

    #[test]
    fn push_front_preserves_retry_ordering() {
        let mut q = CommandQueue::new();
        let id0 = q.alloc_id();
        let id1 = q.alloc_id();
        q.push_back(Command::Speak {
            body: PlaybackBody::new(id0, UtteranceKind::Sentence, 0, 0),
            text: "first".into(),
            audio: Vec::new(),
        });
        q.push_back(Command::Speak {
            body: PlaybackBody::new(id1, UtteranceKind::Sentence, 1, 0),
            text: "second".into(),
            audio: Vec::new(),
        });

        let popped = q.pop_front().unwrap();
        q.push_front(popped);
        let again = q.pop_front().unwrap();
        assert_eq!(again.body().unwrap().id, id0);
    }
}
