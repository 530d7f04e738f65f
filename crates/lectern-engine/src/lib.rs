//! The chapter playback engine.
//!
//! Serializes caller intents into an ordered command queue, drives
//! synthesis through a pluggable provider, and — under the buffered
//! strategy — owns the audio output path with a frame-accurate marker
//! scheduler. One internal event channel carries control calls, provider
//! callbacks, writer ticks, and chapter-fetch completions; a single
//! consumer task applies them sequentially, so the engine's state never
//! needs cross-thread locking of its own.

pub mod command;
pub mod engine;
pub mod events;
pub mod marker;
pub mod rendered;
pub mod testing;

pub use command::{Command, CommandId, CommandQueue, PlaybackBody, UtteranceKind};
pub use engine::{EngineBuilder, EngineHandle, PlaybackStrategy, SpawnError};
pub use events::{ControlMsg, SessionEvent};
pub use marker::{Marker, MarkerKind, MarkerQueue, ScheduledMarker};
pub use rendered::{RenderedCache, RenderedKey, RenderedSegment};

use lectern_synth::EarconId;

/// Earcon id for the scene-change chime.
pub fn scene_change_earcon() -> EarconId {
    EarconId::new("scene_change")
}

/// Earcon id for the chapter-change chime.
pub fn chapter_change_earcon() -> EarconId {
    EarconId::new("chapter_change")
}
