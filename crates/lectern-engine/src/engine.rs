//! The engine task: one consumer loop over one internal event channel.
//!
//! Control calls, provider callbacks, writer ticks, and chapter-fetch
//! completions all arrive as [`EngineMsg`]s and are applied sequentially,
//! which preserves the ordering guarantees the original callback soup
//! relied on implicitly. The only state shared with other threads is the
//! writer's pending-segment list (behind its own mutex) and the
//! next-marker atomic.

use crate::command::{Command, CommandId, CommandQueue, PlaybackBody, UtteranceKind};
use crate::events::{ControlMsg, SessionEvent};
use crate::marker::{Marker, MarkerKind, MarkerQueue, ScheduledMarker};
use crate::rendered::{RenderedCache, RenderedKey, RenderedSegment};
use crate::{chapter_change_earcon, scene_change_earcon};
use lectern_audio::{BufferWriterThread, SinkFactory, TrackSpec, WriterHandle, WriterTick};
use lectern_chapters::{ChapterLoader, ChapterProvider, CleanChapter, FetchOutcome, LoadStatus, MergeOptions, PageRef};
use lectern_foundation::{real_clock, PlaybackError, PlaybackState, ReaderPrefs, SharedClock, StateTracker};
use lectern_synth::{
    AudioSpec, EarconClip, EarconId, LanguageStatus, LanguageTag, SampleFormat, SpeechParams,
    SpeechSynthesizer, SynthEvent, SynthEventSender, SynthesizerFactory, VoiceId,
};
use lectern_text::{Line, ReadMode, SegmentError, Segmenter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Playback execution strategy, selected once at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStrategy {
    /// Delegate playback to the provider's own output and callbacks.
    Direct,
    /// Render to memory and drive the output device through the buffer
    /// writer and marker scheduler.
    Buffered,
}

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("buffered strategy requires an output sink")]
    MissingSink,
    #[error(transparent)]
    Segmenter(#[from] SegmentError),
}

/// Everything that can wake the engine task.
#[derive(Debug)]
pub(crate) enum EngineMsg {
    Control(ControlMsg),
    Synth(SynthEvent),
    Writer(WriterTick),
    Chapter(FetchOutcome),
    /// Self-posted: the last line of the chapter finished.
    EndOfChapter,
    /// Self-posted: prefetch the given chapter for caching.
    Prefetch(i64),
}

/// Cloneable, non-blocking handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    msg_tx: mpsc::UnboundedSender<EngineMsg>,
    events: broadcast::Sender<SessionEvent>,
}

impl EngineHandle {
    fn send(&self, msg: ControlMsg) {
        let _ = self.msg_tx.send(EngineMsg::Control(msg));
    }

    pub fn play(&self) {
        self.send(ControlMsg::Play);
    }

    pub fn pause(&self) {
        self.send(ControlMsg::Pause);
    }

    pub fn stop(&self) {
        self.send(ControlMsg::Stop);
    }

    pub fn next_line(&self) {
        self.send(ControlMsg::NextLine);
    }

    pub fn previous_line(&self) {
        self.send(ControlMsg::PreviousLine);
    }

    pub fn goto_line(&self, line: i64) {
        self.send(ControlMsg::GotoLine(line));
    }

    pub fn next_chapter(&self) {
        self.send(ControlMsg::NextChapter);
    }

    pub fn previous_chapter(&self) {
        self.send(ControlMsg::PreviousChapter);
    }

    pub fn goto_chapter(&self, chapter: i64) {
        self.send(ControlMsg::GotoChapter(chapter));
    }

    pub fn update_prefs(&self, prefs: ReaderPrefs) {
        self.send(ControlMsg::UpdatePrefs(prefs));
    }

    pub fn dispose(&self) {
        self.send(ControlMsg::Dispose);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Builds and spawns an engine task. Must be called within a tokio
/// runtime.
pub struct EngineBuilder {
    strategy: PlaybackStrategy,
    prefs: ReaderPrefs,
    factory: Box<dyn SynthesizerFactory>,
    provider: Arc<dyn ChapterProvider>,
    sink_factory: Option<SinkFactory>,
    earcons: Vec<(EarconId, EarconClip)>,
    clock: SharedClock,
}

impl EngineBuilder {
    pub fn new(
        strategy: PlaybackStrategy,
        factory: Box<dyn SynthesizerFactory>,
        provider: Arc<dyn ChapterProvider>,
    ) -> Self {
        Self {
            strategy,
            prefs: ReaderPrefs::default(),
            factory,
            provider,
            sink_factory: None,
            earcons: Vec::new(),
            clock: real_clock(),
        }
    }

    pub fn prefs(mut self, prefs: ReaderPrefs) -> Self {
        self.prefs = prefs;
        self
    }

    pub fn sink(mut self, sink_factory: SinkFactory) -> Self {
        self.sink_factory = Some(sink_factory);
        self
    }

    pub fn earcon(mut self, id: EarconId, clip: EarconClip) -> Self {
        self.earcons.push((id, clip));
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn spawn(self) -> Result<EngineHandle, SpawnError> {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<EngineMsg>();
        let (events_tx, _) = broadcast::channel(128);

        // Provider callbacks, fetch completions, and writer ticks each
        // get a thin forwarder onto the single engine channel.
        let (synth_tx, mut synth_rx) = mpsc::unbounded_channel::<SynthEvent>();
        {
            let msg_tx = msg_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = synth_rx.recv().await {
                    if msg_tx.send(EngineMsg::Synth(event)).is_err() {
                        break;
                    }
                }
            });
        }
        let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel::<FetchOutcome>();
        {
            let msg_tx = msg_tx.clone();
            tokio::spawn(async move {
                while let Some(outcome) = fetch_rx.recv().await {
                    if msg_tx.send(EngineMsg::Chapter(outcome)).is_err() {
                        break;
                    }
                }
            });
        }

        let (buffered, writer_thread) = match self.strategy {
            PlaybackStrategy::Buffered => {
                let sink_factory = self.sink_factory.ok_or(SpawnError::MissingSink)?;
                let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<WriterTick>();
                {
                    let msg_tx = msg_tx.clone();
                    tokio::spawn(async move {
                        while let Some(tick) = tick_rx.recv().await {
                            if msg_tx.send(EngineMsg::Writer(tick)).is_err() {
                                break;
                            }
                        }
                    });
                }
                let (thread, writer) =
                    BufferWriterThread::spawn(sink_factory, tick_tx, self.clock.clone());
                (
                    Some(BufferedPipeline::new(writer, self.prefs.rendered_cache_size)),
                    Some(thread),
                )
            }
            PlaybackStrategy::Direct => (None, None),
        };

        let segmenter = Segmenter::new(&self.prefs.filters, self.prefs.max_utterance_chars)?;
        let loader = ChapterLoader::new(
            self.provider,
            MergeOptions::from_prefs(&self.prefs),
            self.prefs.chapter_cache_capacity,
            fetch_tx,
        );

        let mut synth = self.factory.create(synth_tx.clone());
        synth.begin_init();

        let mut earcons = lectern_synth::EarconSet::new();
        for (id, clip) in self.earcons {
            earcons.insert(id, clip);
        }

        let engine = Engine {
            prefs: self.prefs,
            strategy: self.strategy,
            synth,
            factory: self.factory,
            synth_tx,
            synth_ready: false,
            active_params: SpeechParams::default(),
            earcons,
            queue: CommandQueue::new(),
            synthesizing: None,
            playing: None,
            buffered,
            writer_thread,
            lines: Vec::new(),
            line_number: 0,
            queued_line: 0,
            cache_next_chapter_line: None,
            chapter_index: -1,
            chapter_title: String::new(),
            linked_pages: Vec::new(),
            loader,
            segmenter,
            state: StateTracker::new(),
            events: events_tx.clone(),
            self_tx: msg_tx.clone(),
            consuming: false,
            advancing: false,
            disposed: false,
        };
        tokio::spawn(engine.run(msg_rx));

        Ok(EngineHandle {
            msg_tx,
            events: events_tx,
        })
    }
}

/// Buffered-strategy state: the writer handle, the marker schedule, the
/// running frame counter, and the rendered-utterance cache.
struct BufferedPipeline {
    writer: WriterHandle,
    markers: MarkerQueue,
    /// Running frame counter for marker placement; resets to zero on
    /// interrupt, together with the writer's counters.
    frame: u64,
    bytes_per_frame: usize,
    rendered: RenderedCache,
}

impl BufferedPipeline {
    fn new(writer: WriterHandle, rendered_capacity: usize) -> Self {
        Self {
            writer,
            markers: MarkerQueue::new(),
            frame: 0,
            bytes_per_frame: 2,
            rendered: RenderedCache::new(rendered_capacity),
        }
    }
}

/// What is audibly playing right now (buffered) or in flight at the
/// provider (direct).
#[derive(Debug, Clone, Copy)]
struct ActiveInfo {
    id: CommandId,
    kind: UtteranceKind,
    line: usize,
    range_offset: usize,
}

struct Engine {
    prefs: ReaderPrefs,
    strategy: PlaybackStrategy,

    synth: Box<dyn SpeechSynthesizer>,
    factory: Box<dyn SynthesizerFactory>,
    synth_tx: SynthEventSender,
    synth_ready: bool,
    active_params: SpeechParams,
    earcons: lectern_synth::EarconSet,

    queue: CommandQueue,
    /// At most one command is the synthesis target at any time.
    synthesizing: Option<Command>,
    playing: Option<ActiveInfo>,
    buffered: Option<BufferedPipeline>,
    writer_thread: Option<BufferWriterThread>,

    lines: Vec<Line>,
    line_number: usize,
    queued_line: usize,
    cache_next_chapter_line: Option<usize>,

    chapter_index: i64,
    chapter_title: String,
    linked_pages: Vec<PageRef>,
    loader: ChapterLoader,
    segmenter: Segmenter,

    state: StateTracker,
    events: broadcast::Sender<SessionEvent>,
    self_tx: mpsc::UnboundedSender<EngineMsg>,

    consuming: bool,
    advancing: bool,
    disposed: bool,
}

impl Engine {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMsg>) {
        tracing::info!(strategy = ?self.strategy, "Engine task started");
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
            if self.disposed {
                break;
            }
        }
        if !self.disposed {
            self.dispose();
        }
        tracing::info!("Engine task stopped");
    }

    async fn handle(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Control(ctl) => self.handle_control(ctl).await,
            EngineMsg::Synth(event) => self.handle_synth(event),
            EngineMsg::Writer(tick) => self.handle_tick(tick),
            EngineMsg::Chapter(outcome) => self.handle_fetch(outcome),
            EngineMsg::EndOfChapter => {
                self.advancing = false;
                let next = self.chapter_index + 1;
                self.change_chapter(next, true).await;
            }
            EngineMsg::Prefetch(index) => {
                let _ = self.loader.request(index, true).await;
            }
        }
    }

    // ---- control ----

    async fn handle_control(&mut self, msg: ControlMsg) {
        if self.disposed {
            return;
        }
        match msg {
            ControlMsg::Play => {
                if self.lines.is_empty() && self.chapter_index < 0 {
                    // Fresh session: pull in the first chapter.
                    self.change_chapter(0, false).await;
                } else {
                    self.start();
                }
            }
            ControlMsg::Pause => self.stop(false),
            ControlMsg::Stop => self.stop(true),
            ControlMsg::NextLine => self.goto_line(self.line_number as i64 + 1),
            ControlMsg::PreviousLine => self.goto_line(self.line_number as i64 - 1),
            ControlMsg::GotoLine(line) => self.goto_line(line),
            ControlMsg::NextChapter => {
                let next = self.chapter_index + 1;
                self.change_chapter(next, false).await;
            }
            ControlMsg::PreviousChapter => {
                let previous = self.chapter_index - 1;
                self.change_chapter(previous, false).await;
            }
            ControlMsg::GotoChapter(chapter) => self.change_chapter(chapter, false).await,
            ControlMsg::UpdatePrefs(prefs) => self.update_prefs(prefs),
            ControlMsg::Dispose => self.dispose(),
        }
    }

    fn start(&mut self) {
        if self.disposed {
            return;
        }
        self.state.request(PlaybackState::Playing);
        if !self.synth_ready {
            tracing::debug!("Play requested before provider init; deferred until ready");
            self.emit_state();
            return;
        }
        self.state.set_current(PlaybackState::Playing);
        self.emit_state();
        self.update_voice_config();
        self.queued_line = self.line_number;
        self.speak_line(false);
    }

    /// `full` stops for good: the cursor rewinds and session caches are
    /// dropped. Without it this is a pause that keeps the reading
    /// position.
    fn stop(&mut self, full: bool) {
        if self.disposed {
            return;
        }
        self.state.request(PlaybackState::Stopped);
        if self.state.current() != PlaybackState::Stopped {
            // A chapter still loading keeps `Loading` so a late fetch can
            // settle the state; with nothing in flight, lower it now.
            if self.state.current() != PlaybackState::Loading || !self.loader.has_primary_fetch() {
                self.state.set_current(PlaybackState::Stopped);
            }
            self.interrupt();
            self.queued_line = self.line_number;
        }
        if full {
            self.line_number = 0;
            self.queued_line = 0;
            self.loader.clear_cache();
            if let Some(buffered) = &mut self.buffered {
                buffered.rendered.clear();
            }
        }
        self.emit_state();
    }

    fn goto_line(&mut self, line: i64) {
        if self.disposed || self.lines.is_empty() {
            return;
        }
        let count = self.lines.len() as i64;
        if self.prefs.rewind_to_skip {
            if line < 0 && self.line_number == 0 {
                let _ = self.self_tx.send(EngineMsg::Control(ControlMsg::PreviousChapter));
                return;
            }
            if line >= count && self.line_number == self.lines.len() - 1 {
                let _ = self.self_tx.send(EngineMsg::Control(ControlMsg::NextChapter));
                return;
            }
        }
        self.line_number = line.clamp(0, count - 1) as usize;
        tracing::debug!(line = self.line_number, "Seeking to line");
        if self.state.current() != PlaybackState::Playing {
            self.start();
        } else {
            self.speak_line(true);
        }
    }

    async fn change_chapter(&mut self, target: i64, with_earcon: bool) {
        if self.disposed {
            return;
        }
        self.state.set_current(PlaybackState::Loading);
        self.state.request(PlaybackState::Playing);
        self.emit_state();
        match self.loader.request(target, false).await {
            LoadStatus::NoChapter => {
                if self.prefs.announce_final_chapter {
                    let text = if target < self.chapter_index {
                        "Already at the first chapter."
                    } else {
                        "The final chapter has been read. No more chapters are available."
                    };
                    self.enqueue_announcement(text);
                } else {
                    self.stop(false);
                }
            }
            LoadStatus::Cached(chapter) | LoadStatus::Loaded(chapter) => {
                if with_earcon && self.prefs.chapter_change_sfx {
                    self.enqueue_chapter_change_earcon();
                } else {
                    self.interrupt();
                }
                self.activate_chapter(chapter);
                self.start();
            }
            LoadStatus::Fetching => {
                // The primary fetch owns this index now; playback resumes
                // from handle_fetch if it is still wanted when it lands.
                self.chapter_index = target;
                if with_earcon && self.prefs.chapter_change_sfx {
                    self.enqueue_chapter_change_earcon();
                } else {
                    self.interrupt();
                }
            }
            LoadStatus::Offline => self.stop(false),
        }
    }

    fn update_prefs(&mut self, prefs: ReaderPrefs) {
        match Segmenter::new(&prefs.filters, prefs.max_utterance_chars) {
            Ok(segmenter) => self.segmenter = segmenter,
            Err(err) => tracing::warn!("Keeping previous filters: {err}"),
        }
        self.loader.set_merge(MergeOptions::from_prefs(&prefs));
        self.prefs = prefs;
        if self.synth_ready {
            self.select_language();
            self.update_voice_config();
            self.consume_next();
        }
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        tracing::info!("Disposing engine");
        self.interrupt();
        self.synth.shutdown();
        self.loader.cancel_all();
        if let Some(writer_thread) = self.writer_thread.take() {
            writer_thread.stop();
        }
        self.state.request(PlaybackState::Disposed);
        self.state.set_current(PlaybackState::Disposed);
        self.emit_state();
        self.disposed = true;
    }

    // ---- line scheduling ----

    fn speak_line(&mut self, flush: bool) {
        if flush {
            self.interrupt();
            self.queued_line = self.line_number;
        }
        if self.lines.is_empty() || self.line_number >= self.lines.len() {
            self.on_last_line();
            return;
        }
        if Some(self.line_number) == self.cache_next_chapter_line {
            let _ = self.self_tx.send(EngineMsg::Prefetch(self.chapter_index + 1));
        }
        while self.queued_line < self.lines.len() && self.line_number >= self.queued_line {
            let line = self.lines[self.queued_line].clone();
            self.enqueue_line(&line);
            self.queued_line += 1;
        }
        self.consume_next();
        if self.state.set_current(PlaybackState::Playing) {
            self.emit_state();
        }
    }

    fn on_last_line(&mut self) {
        if self.prefs.read_next_chapter {
            if !self.advancing {
                self.advancing = true;
                let _ = self.self_tx.send(EngineMsg::EndOfChapter);
            }
        } else {
            self.stop(false);
        }
    }

    fn enqueue_line(&mut self, line: &Line) {
        let line_no = self.queued_line;
        match &line.mode {
            ReadMode::SceneChange => self.enqueue_earcon(scene_change_earcon(), line_no, UtteranceKind::Earcon),
            ReadMode::Dialogue { speaker } => {
                let body_len = line.text.chars().count();
                let kind = if speaker.is_some() {
                    UtteranceKind::DialoguePartial
                } else {
                    UtteranceKind::Dialogue
                };
                if self.prefs.downpitch_dialogue {
                    self.queue
                        .push_back(Command::SetPitch(self.prefs.pitch * self.prefs.downpitch_amount));
                    self.enqueue_speak(line.text.clone(), kind, line_no, 0);
                    self.queue.push_back(Command::SetPitch(self.prefs.pitch));
                } else {
                    self.enqueue_speak(line.text.clone(), kind, line_no, 0);
                }
                if let Some(speaker) = speaker {
                    self.enqueue_speak(speaker.clone(), UtteranceKind::Dialogue, line_no, body_len);
                }
            }
            ReadMode::Regular => {
                self.enqueue_speak(line.text.clone(), UtteranceKind::Sentence, line_no, 0)
            }
        }
    }

    fn enqueue_speak(&mut self, text: String, kind: UtteranceKind, line: usize, range_offset: usize) {
        let id = self.queue.alloc_id();
        let body = PlaybackBody::new(id, kind, line, range_offset);
        if text.trim().is_empty() {
            // Blank lines still occupy their slot in the timeline.
            self.queue.push_back(Command::Silence {
                body,
                duration_ms: 100,
            });
        } else {
            self.queue.push_back(Command::Speak {
                body,
                text,
                audio: Vec::new(),
            });
        }
    }

    fn enqueue_earcon(&mut self, earcon: EarconId, line: usize, kind: UtteranceKind) {
        let id = self.queue.alloc_id();
        if self.strategy == PlaybackStrategy::Direct || self.earcons.contains(&earcon) {
            self.queue.push_back(Command::Earcon {
                body: PlaybackBody::new(id, kind, line, 0),
                earcon,
            });
        } else {
            // No clip registered: fall back to announcing the cue.
            self.queue.push_back(Command::Speak {
                body: PlaybackBody::new(id, kind, line, 0),
                text: format!("Earcon: {earcon}"),
                audio: Vec::new(),
            });
        }
    }

    fn enqueue_chapter_change_earcon(&mut self) {
        self.interrupt();
        self.enqueue_earcon(
            chapter_change_earcon(),
            self.line_number,
            UtteranceKind::ChapterChangeEarcon,
        );
        self.consume_next();
    }

    fn enqueue_announcement(&mut self, text: &str) {
        self.enqueue_speak(text.to_string(), UtteranceKind::FinalChapter, self.line_number, 0);
        self.consume_next();
    }

    fn update_voice_config(&mut self) {
        self.queue.push_back(Command::SetPitch(self.prefs.pitch));
        self.queue.push_back(Command::SetRate(self.prefs.speech_rate));
    }

    fn activate_chapter(&mut self, chapter: CleanChapter) {
        self.chapter_index = chapter.chapter_index as i64;
        self.chapter_title = chapter.title.clone();
        self.linked_pages = chapter.linked_pages.clone();
        self.set_text(&chapter.text);
        self.emit(SessionEvent::ChapterChanged {
            index: chapter.chapter_index,
            title: chapter.title,
        });
        self.emit(SessionEvent::LinkedPages(self.linked_pages.clone()));
    }

    fn set_text(&mut self, text: &str) {
        self.lines = self.segmenter.segment(text);
        self.line_number = 0;
        self.queued_line = 0;
        // Prefetch the next chapter mid-way through long chapters only.
        self.cache_next_chapter_line = if self.lines.len() > 42 {
            Some(self.lines.len() / 2)
        } else {
            None
        };
        if self.synth_ready {
            self.select_language();
        }
        self.emit(SessionEvent::SentenceList(
            self.lines.iter().map(Line::display_text).collect(),
        ));
    }

    // ---- queue consumption ----

    fn consume_next(&mut self) {
        if self.consuming || self.synthesizing.is_some() {
            return;
        }
        self.consuming = true;
        while self.synthesizing.is_none() {
            let Some(cmd) = self.queue.pop_front() else {
                break;
            };
            let advance = self.execute(cmd);
            if !advance && self.synthesizing.is_none() {
                // The command went back to the queue pending a provider
                // restart; consumption resumes on Ready.
                break;
            }
        }
        self.consuming = false;
    }

    /// Executes one command. Returns true when the next command may be
    /// consumed immediately.
    fn execute(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SetPitch(pitch) => {
                self.active_params.pitch = pitch;
                true
            }
            Command::SetRate(rate) => {
                self.active_params.rate = rate;
                true
            }
            Command::SetLanguage(tag) => {
                match self.synth.set_language(&tag) {
                    LanguageStatus::Available => self.active_params.language = Some(tag),
                    LanguageStatus::NotSupported => {
                        self.emit(SessionEvent::PlaybackError(
                            PlaybackError::LanguageUnavailable { tag: tag.0 },
                        ));
                    }
                }
                true
            }
            Command::SetVoice(voice) => {
                match self.synth.set_voice(&voice) {
                    Ok(()) => self.active_params.voice = Some(voice),
                    Err(err) => tracing::warn!("Voice not applied: {err}"),
                }
                true
            }
            Command::Speak { body, text, audio } => self.execute_speak(body, text, audio),
            Command::Earcon { body, earcon } => self.execute_earcon(body, earcon),
            Command::Silence { body, duration_ms } => self.execute_silence(body, duration_ms),
        }
    }

    fn params_for(&self, body: &PlaybackBody) -> SpeechParams {
        SpeechParams {
            range_offset: body.range_offset,
            ..self.active_params.clone()
        }
    }

    fn execute_speak(&mut self, body: PlaybackBody, text: String, audio: Vec<Arc<Vec<u8>>>) -> bool {
        if self.strategy == PlaybackStrategy::Buffered {
            let key = RenderedKey::new(&text, &self.active_params);
            let cached = self
                .buffered
                .as_ref()
                .and_then(|buffered| buffered.rendered.get(&key));
            if let Some(segment) = cached {
                tracing::trace!(line = body.line, "Replaying rendered utterance");
                self.replay_rendered(body, segment);
                return true;
            }
        }
        let params = self.params_for(&body);
        let id = body.id;
        let result = match self.strategy {
            PlaybackStrategy::Direct => self.synth.speak(&text, id, &params),
            PlaybackStrategy::Buffered => self.synth.synthesize_to_buffer(&text, id, &params),
        };
        let cmd = Command::Speak { body, text, audio };
        match result {
            Ok(()) => {
                self.synthesizing = Some(cmd);
                false
            }
            Err(err) => self.request_failed(cmd, err),
        }
    }

    fn execute_earcon(&mut self, mut body: PlaybackBody, earcon: EarconId) -> bool {
        match self.strategy {
            PlaybackStrategy::Direct => match self.synth.play_earcon(&earcon, body.id) {
                Ok(()) => {
                    self.synthesizing = Some(Command::Earcon { body, earcon });
                    false
                }
                Err(err) => {
                    tracing::warn!(%earcon, "Skipping earcon: {err}");
                    true
                }
            },
            PlaybackStrategy::Buffered => {
                let Some(clip_spec) = self.earcons.get(&earcon).map(|c| (c.spec, c.duration())) else {
                    tracing::debug!(%earcon, "No clip registered; skipping earcon");
                    return true;
                };
                let (spec, duration) = clip_spec;
                self.ensure_track();
                let label_len = earcon.0.chars().count();
                let Some(buffered) = self.buffered.as_mut() else {
                    return true;
                };
                let track = buffered.writer.active_spec().unwrap_or_default();
                let frames = if track_spec_of(&spec) == track {
                    match self.earcons.get(&earcon) {
                        Some(clip) => {
                            let frames = clip.frames();
                            buffered.writer.enqueue(Arc::new(clip.pcm.clone()));
                            frames
                        }
                        None => return true,
                    }
                } else {
                    // Format mismatch with the active track: preserve the
                    // cue's slot in the timeline as silence rather than
                    // rebuilding the stream mid-utterance.
                    buffered.writer.enqueue_silence(duration.as_millis() as u64)
                };
                body.begin = buffered.frame;
                body.frames = frames;
                buffered.frame += frames;
                self.schedule(&body, Marker { kind: MarkerKind::StartEarcon(earcon), frame: 0 });
                self.schedule(
                    &body,
                    Marker {
                        kind: MarkerKind::RangeStart {
                            char_start: 0,
                            char_end: label_len,
                        },
                        frame: 0,
                    },
                );
                self.schedule(&body, Marker { kind: MarkerKind::Done, frame: frames });
                true
            }
        }
    }

    fn execute_silence(&mut self, mut body: PlaybackBody, duration_ms: u64) -> bool {
        match self.strategy {
            PlaybackStrategy::Direct => {
                match self
                    .synth
                    .play_silence(Duration::from_millis(duration_ms), body.id)
                {
                    Ok(()) => {
                        self.synthesizing = Some(Command::Silence { body, duration_ms });
                        false
                    }
                    Err(err) => {
                        tracing::warn!("Skipping silence: {err}");
                        true
                    }
                }
            }
            PlaybackStrategy::Buffered => {
                self.ensure_track();
                let Some(buffered) = self.buffered.as_mut() else {
                    return true;
                };
                let frames = buffered.writer.enqueue_silence(duration_ms);
                body.begin = buffered.frame;
                body.frames = frames;
                buffered.frame += frames;
                self.schedule(&body, Marker { kind: MarkerKind::Start, frame: 0 });
                self.schedule(&body, Marker { kind: MarkerKind::Done, frame: frames });
                true
            }
        }
    }

    fn replay_rendered(&mut self, mut body: PlaybackBody, segment: Arc<RenderedSegment>) {
        let Some(buffered) = self.buffered.as_mut() else {
            return;
        };
        buffered.writer.request_spec(segment.spec);
        buffered.bytes_per_frame = segment.spec.bytes_per_frame();
        body.begin = buffered.frame;
        body.frames = segment.frames;
        buffered.frame += segment.frames;
        for chunk in &segment.audio {
            buffered.writer.enqueue(chunk.clone());
        }
        for marker in segment.markers.clone() {
            self.schedule(&body, marker);
        }
    }

    /// Retry-or-surface for a failed synthesis request.
    fn request_failed(&mut self, mut cmd: Command, err: lectern_synth::SynthError) -> bool {
        let Some(body) = cmd.body_mut() else {
            return true;
        };
        if err.is_transient() && body.retries < 3 {
            body.retries += 1;
            tracing::warn!(retries = body.retries, "Provider failed transiently; restarting: {err}");
            self.queue.push_front(cmd);
            self.restart_provider();
            return false;
        }
        let kind = body.kind;
        let line = body.line;
        self.emit(SessionEvent::PlaybackError(
            PlaybackError::SynthesisPermanent {
                reason: err.to_string(),
            },
        ));
        // Treat the failure as a completion so the cursor never stalls.
        self.finish_utterance(kind, line);
        true
    }

    fn restart_provider(&mut self) {
        tracing::info!("Restarting speech provider");
        self.synth.shutdown();
        self.synth = self.factory.create(self.synth_tx.clone());
        self.synth_ready = false;
        self.synth.begin_init();
    }

    fn ensure_track(&mut self) {
        let Some(buffered) = self.buffered.as_mut() else {
            return;
        };
        if buffered.writer.active_spec().is_none() {
            buffered.writer.request_spec(TrackSpec::default());
            buffered.bytes_per_frame = TrackSpec::default().bytes_per_frame();
        }
    }

    // ---- marker scheduling ----

    /// Records the marker on its owning body and schedules it against
    /// the absolute timeline, firing it immediately when its target is
    /// already in the past.
    fn schedule(&mut self, body: &PlaybackBody, marker: Marker) {
        let scheduled = ScheduledMarker {
            kind: marker.kind.clone(),
            target: body.begin + marker.frame,
            owner: body.id,
            utterance: body.kind,
            line: body.line,
            range_offset: body.range_offset,
        };
        let elapsed = match self.buffered.as_mut() {
            Some(buffered) => {
                buffered.markers.push(scheduled, &buffered.writer);
                buffered.writer.elapsed_frames()
            }
            None => return,
        };
        self.fire_due(elapsed);
    }

    fn handle_tick(&mut self, tick: WriterTick) {
        self.fire_due(tick.elapsed_frames);
    }

    fn fire_due(&mut self, elapsed: u64) {
        loop {
            let marker = match self.buffered.as_mut() {
                Some(buffered) => buffered.markers.pop_due(elapsed, &buffered.writer),
                None => None,
            };
            let Some(marker) = marker else {
                break;
            };
            self.fire_marker(marker);
        }
    }

    fn fire_marker(&mut self, marker: ScheduledMarker) {
        match marker.kind {
            MarkerKind::Start | MarkerKind::StartEarcon(_) => {
                self.playing = Some(ActiveInfo {
                    id: marker.owner,
                    kind: marker.utterance,
                    line: marker.line,
                    range_offset: marker.range_offset,
                });
                self.emit(SessionEvent::LineStarted { line: marker.line });
            }
            MarkerKind::RangeStart {
                char_start,
                char_end,
            } => {
                // Only report ranges for the utterance that is audible.
                if self.playing.map_or(false, |p| p.id == marker.owner) {
                    self.emit(SessionEvent::RangeStarted {
                        line: marker.line,
                        char_start: char_start + marker.range_offset,
                        char_end: char_end + marker.range_offset,
                    });
                }
            }
            MarkerKind::Done => {
                if self.playing.map_or(false, |p| p.id == marker.owner) {
                    self.playing = None;
                }
                self.finish_utterance(marker.utterance, marker.line);
            }
        }
    }

    /// Reacts to an utterance completing, advancing the line cursor for
    /// content utterances.
    fn finish_utterance(&mut self, kind: UtteranceKind, line: usize) {
        match kind {
            UtteranceKind::DialoguePartial => {}
            UtteranceKind::ChapterChangeEarcon => {
                if !self.loader.has_primary_fetch() {
                    self.speak_line(false);
                }
            }
            UtteranceKind::FinalChapter => self.stop(false),
            UtteranceKind::Sentence | UtteranceKind::Dialogue | UtteranceKind::Earcon => {
                let _ = line;
                self.line_number += 1;
                self.speak_line(false);
            }
        }
    }

    // ---- provider events ----

    fn handle_synth(&mut self, event: SynthEvent) {
        match event {
            SynthEvent::Ready => self.on_provider_ready(),
            SynthEvent::InitFailed { reason } => {
                self.emit(SessionEvent::PlaybackError(PlaybackError::Initialization(
                    reason,
                )));
                self.state.request(PlaybackState::Stopped);
                self.state.set_current(PlaybackState::Stopped);
                self.emit_state();
            }
            SynthEvent::BeginSynthesis { id, spec } => self.on_begin_synthesis(id, spec),
            SynthEvent::AudioAvailable { id, data } => self.on_audio_available(id, data),
            SynthEvent::RangeStart {
                id,
                frame,
                char_start,
                char_end,
            } => self.on_range_start(id, frame, char_start, char_end),
            SynthEvent::Started { id } => self.on_utterance_started(id),
            SynthEvent::Done { id } => self.on_utterance_done(id),
            SynthEvent::Error { id, error } => self.on_synth_error(id, error),
        }
    }

    fn on_provider_ready(&mut self) {
        tracing::info!(provider = self.synth.name(), "Speech provider ready");
        for (id, clip) in self.earcons.iter() {
            self.synth.register_earcon(id.clone(), clip.clone());
        }
        self.select_language();
        if let Some(voice) = self.prefs.voice.clone() {
            if let Err(err) = self.synth.set_voice(&VoiceId(voice)) {
                tracing::warn!("Preferred voice unavailable: {err}");
            }
        }
        self.synth_ready = true;
        if self.state.desired() == PlaybackState::Playing
            && self.state.current() != PlaybackState::Playing
        {
            tracing::debug!("Play was requested before provider init; starting now");
            self.start();
        } else if self.synthesizing.is_none() && !self.queue.is_empty() {
            self.consume_next();
        }
    }

    fn select_language(&mut self) {
        let Some(tag) = self.prefs.language.clone() else {
            return;
        };
        match self.synth.set_language(&LanguageTag(tag.clone())) {
            LanguageStatus::Available => {
                self.active_params.language = Some(LanguageTag(tag));
            }
            LanguageStatus::NotSupported => {
                self.emit(SessionEvent::PlaybackError(
                    PlaybackError::LanguageUnavailable { tag },
                ));
            }
        }
    }

    /// True when `id` belongs to the command currently being
    /// synthesized. Everything else is a stale callback.
    fn synth_guard(&self, id: CommandId) -> bool {
        self.synthesizing
            .as_ref()
            .and_then(Command::body)
            .map_or(false, |body| body.id == id)
    }

    fn on_begin_synthesis(&mut self, id: CommandId, spec: AudioSpec) {
        if self.strategy != PlaybackStrategy::Buffered || !self.synth_guard(id) {
            return;
        }
        let Some(buffered) = self.buffered.as_mut() else {
            return;
        };
        let track = track_spec_of(&spec);
        buffered.writer.request_spec(track);
        buffered.bytes_per_frame = spec.bytes_per_frame();
    }

    fn on_audio_available(&mut self, id: CommandId, data: Vec<u8>) {
        if self.strategy != PlaybackStrategy::Buffered || !self.synth_guard(id) {
            return;
        }
        let Some(buffered) = self.buffered.as_mut() else {
            return;
        };
        let Some(Command::Speak { body, audio, .. }) = self.synthesizing.as_mut() else {
            return;
        };
        let frames = (data.len() / buffered.bytes_per_frame) as u64;
        let chunk = Arc::new(data);
        audio.push(chunk.clone());
        body.frames += frames;
        buffered.frame += frames;
        buffered.writer.enqueue(chunk);
    }

    fn on_range_start(&mut self, id: CommandId, frame: u64, char_start: usize, char_end: usize) {
        match self.strategy {
            PlaybackStrategy::Direct => {
                if !self.synth_guard(id) {
                    return;
                }
                let Some(body) = self.synthesizing.as_ref().and_then(Command::body) else {
                    return;
                };
                self.emit(SessionEvent::RangeStarted {
                    line: body.line,
                    char_start: char_start + body.range_offset,
                    char_end: char_end + body.range_offset,
                });
            }
            PlaybackStrategy::Buffered => {
                if !self.synth_guard(id) {
                    return;
                }
                let marker = Marker {
                    kind: MarkerKind::RangeStart {
                        char_start,
                        char_end,
                    },
                    frame,
                };
                self.record_and_schedule(marker);
            }
        }
    }

    fn on_utterance_started(&mut self, id: CommandId) {
        if !self.synth_guard(id) {
            return;
        }
        match self.strategy {
            PlaybackStrategy::Direct => {
                let Some(body) = self.synthesizing.as_ref().and_then(Command::body) else {
                    return;
                };
                self.playing = Some(ActiveInfo {
                    id: body.id,
                    kind: body.kind,
                    line: body.line,
                    range_offset: body.range_offset,
                });
                self.emit(SessionEvent::LineStarted { line: body.line });
            }
            PlaybackStrategy::Buffered => {
                let frame = self.buffered.as_ref().map(|b| b.frame).unwrap_or(0);
                if let Some(body) = self.synthesizing.as_mut().and_then(Command::body_mut) {
                    body.begin = frame;
                }
                self.record_and_schedule(Marker {
                    kind: MarkerKind::Start,
                    frame: 0,
                });
            }
        }
    }

    fn on_utterance_done(&mut self, id: CommandId) {
        if !self.synth_guard(id) {
            return;
        }
        match self.strategy {
            PlaybackStrategy::Direct => {
                let Some(cmd) = self.synthesizing.take() else {
                    return;
                };
                let (kind, line) = cmd
                    .body()
                    .map(|b| (b.kind, b.line))
                    .unwrap_or((UtteranceKind::Sentence, self.line_number));
                self.playing = None;
                self.finish_utterance(kind, line);
                self.consume_next();
            }
            PlaybackStrategy::Buffered => {
                self.record_and_schedule(Marker {
                    kind: MarkerKind::Done,
                    frame: self
                        .synthesizing
                        .as_ref()
                        .and_then(Command::body)
                        .map(|b| b.frames)
                        .unwrap_or(0),
                });
                // Cache the finished rendering for backward seeks.
                if let Some(Command::Speak { body, text, audio }) = self.synthesizing.take() {
                    if let Some(buffered) = self.buffered.as_mut() {
                        let spec = buffered.writer.active_spec().unwrap_or_default();
                        let key = RenderedKey::new(&text, &self.active_params);
                        buffered.rendered.put(
                            key,
                            Arc::new(RenderedSegment {
                                audio,
                                markers: body.markers,
                                frames: body.frames,
                                spec,
                            }),
                        );
                    }
                }
                self.consume_next();
            }
        }
    }

    fn on_synth_error(&mut self, id: CommandId, error: lectern_synth::SynthError) {
        if !self.synth_guard(id) {
            tracing::debug!("Ignoring error for stale synthesis {id}: {error}");
            return;
        }
        let Some(cmd) = self.synthesizing.take() else {
            return;
        };
        self.playing = None;
        let advanced = self.request_failed(cmd, error);
        if advanced {
            self.consume_next();
        }
    }

    /// Records a provider-driven marker on the synthesizing command and
    /// schedules it.
    fn record_and_schedule(&mut self, marker: Marker) {
        let scheduled = {
            let Some(body) = self.synthesizing.as_mut().and_then(Command::body_mut) else {
                return;
            };
            body.markers.push(marker.clone());
            ScheduledMarker {
                kind: marker.kind,
                target: body.begin + marker.frame,
                owner: body.id,
                utterance: body.kind,
                line: body.line,
                range_offset: body.range_offset,
            }
        };
        let elapsed = match self.buffered.as_mut() {
            Some(buffered) => {
                buffered.markers.push(scheduled, &buffered.writer);
                buffered.writer.elapsed_frames()
            }
            None => return,
        };
        self.fire_due(elapsed);
    }

    // ---- chapter fetches ----

    fn handle_fetch(&mut self, outcome: FetchOutcome) {
        let was_prefetch = self.loader.finish(&outcome);
        match outcome.result {
            Ok(chapter) => {
                let wanted = !was_prefetch
                    && self.state.desired() == PlaybackState::Playing
                    && chapter.chapter_index as i64 == self.chapter_index;
                if wanted {
                    self.activate_chapter(chapter);
                    self.start();
                } else if self.state.desired() != PlaybackState::Playing
                    && self.state.current() == PlaybackState::Loading
                {
                    // Stop was requested while loading; the result stays
                    // cached and playback settles at Stopped.
                    self.state.set_current(PlaybackState::Stopped);
                    self.emit_state();
                }
            }
            Err(err) => {
                if was_prefetch {
                    tracing::warn!(index = outcome.index, "Prefetch failed: {err}");
                    return;
                }
                self.emit(SessionEvent::PlaybackError(PlaybackError::ChapterLoad {
                    index: outcome.index as i64,
                    reason: err.to_string(),
                }));
                self.state.request(PlaybackState::Stopped);
                self.state.set_current(PlaybackState::Stopped);
                self.emit_state();
            }
        }
    }

    // ---- interrupt ----

    /// The sole cancellation primitive: stops provider playback, clears
    /// the device buffer and the marker schedule, notifies stop for the
    /// playing and synthesizing commands, and drains the queue while
    /// still executing configuration commands so voice state stays
    /// correct for the next session.
    fn interrupt(&mut self) {
        self.synth.stop();
        if let Some(buffered) = &mut self.buffered {
            buffered.writer.clear();
            let writer = buffered.writer.clone();
            buffered.markers.clear(&writer);
            buffered.frame = 0;
        }
        let mut stopped_id = None;
        if let Some(active) = self.playing.take() {
            stopped_id = Some(active.id);
            self.emit(SessionEvent::UtteranceStopped {
                line: active.line,
                interrupted: true,
            });
        }
        if let Some(cmd) = self.synthesizing.take() {
            if let Some(body) = cmd.body() {
                // Under the direct strategy the playing and synthesizing
                // command are one and the same; notify only once.
                if stopped_id != Some(body.id) {
                    self.emit(SessionEvent::UtteranceStopped {
                        line: body.line,
                        interrupted: false,
                    });
                }
            }
        }
        for cmd in self.queue.take_all() {
            if cmd.is_config() {
                self.execute(cmd);
            } else if let Some(body) = cmd.body() {
                self.emit(SessionEvent::UtteranceStopped {
                    line: body.line,
                    interrupted: false,
                });
            }
        }
    }

    // ---- events ----

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self) {
        self.emit(SessionEvent::StateChanged {
            desired: self.state.desired(),
            current: self.state.current(),
        });
    }
}

fn track_spec_of(spec: &AudioSpec) -> TrackSpec {
    TrackSpec {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: match spec.sample_format {
            SampleFormat::U8 => 8,
            SampleFormat::I16 => 16,
            SampleFormat::F32 => 32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SynthCall, SynthScript};
    use async_trait::async_trait;
    use lectern_audio::testing::ManualSink;
    use lectern_audio::WriterCore;
    use lectern_chapters::ChapterError;
    use lectern_synth::SynthError;

    struct TestProvider {
        chapters: Vec<String>,
    }

    #[async_trait]
    impl ChapterProvider for TestProvider {
        fn chapter_count(&self) -> usize {
            self.chapters.len()
        }

        fn is_online(&self) -> bool {
            false
        }

        async fn load_local(&self, index: usize) -> Result<Option<CleanChapter>, ChapterError> {
            Ok(self.chapters.get(index).map(|text| CleanChapter {
                chapter_index: index,
                text: text.clone(),
                title: format!("Chapter {index}"),
                linked_pages: Vec::new(),
            }))
        }

        async fn fetch_remote(&self, index: usize) -> Result<CleanChapter, ChapterError> {
            Err(ChapterError::Offline { index })
        }

        async fn fetch_page(&self, _index: usize, href: &str) -> Result<CleanChapter, ChapterError> {
            Err(ChapterError::Fetch(format!("no page {href}")))
        }
    }

    struct TestBed {
        engine: Engine,
        msg_rx: mpsc::UnboundedReceiver<EngineMsg>,
        events_rx: broadcast::Receiver<SessionEvent>,
        script: SynthScript,
        core: Option<WriterCore>,
        sink: Option<ManualSink>,
        _fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
        _synth_rx: mpsc::UnboundedReceiver<SynthEvent>,
    }

    fn bed(strategy: PlaybackStrategy, chapters: &[&str]) -> TestBed {
        let script = SynthScript::new();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = broadcast::channel(256);
        let (synth_tx, _synth_rx) = mpsc::unbounded_channel();
        let (fetch_tx, _fetch_rx) = mpsc::unbounded_channel();

        let prefs = ReaderPrefs::default();
        let provider = Arc::new(TestProvider {
            chapters: chapters.iter().map(|s| s.to_string()).collect(),
        });
        let loader = ChapterLoader::new(
            provider,
            MergeOptions::default(),
            prefs.chapter_cache_capacity,
            fetch_tx,
        );
        let segmenter = Segmenter::new(&[], prefs.max_utterance_chars).unwrap();
        let factory = script.factory();
        let mut synth = factory.create(synth_tx.clone());
        synth.begin_init();

        let (core, sink, buffered) = match strategy {
            PlaybackStrategy::Buffered => {
                let sink = ManualSink::new(1_000_000);
                let core = WriterCore::new(Box::new(sink.clone()));
                let pipeline = BufferedPipeline::new(core.handle(), prefs.rendered_cache_size);
                (Some(core), Some(sink), Some(pipeline))
            }
            PlaybackStrategy::Direct => (None, None, None),
        };

        let engine = Engine {
            prefs,
            strategy,
            synth,
            factory,
            synth_tx,
            synth_ready: false,
            active_params: SpeechParams::default(),
            earcons: lectern_synth::EarconSet::new(),
            queue: CommandQueue::new(),
            synthesizing: None,
            playing: None,
            buffered,
            writer_thread: None,
            lines: Vec::new(),
            line_number: 0,
            queued_line: 0,
            cache_next_chapter_line: None,
            chapter_index: -1,
            chapter_title: String::new(),
            linked_pages: Vec::new(),
            loader,
            segmenter,
            state: StateTracker::new(),
            events: events_tx,
            self_tx: msg_tx,
            consuming: false,
            advancing: false,
            disposed: false,
        };
        TestBed {
            engine,
            msg_rx,
            events_rx,
            script,
            core,
            sink,
            _fetch_rx,
            _synth_rx,
        }
    }

    impl TestBed {
        /// Applies any self-posted engine messages.
        async fn pump(&mut self) {
            while let Ok(msg) = self.msg_rx.try_recv() {
                self.engine.handle(msg).await;
            }
        }

        async fn control(&mut self, msg: ControlMsg) {
            self.engine.handle(EngineMsg::Control(msg)).await;
            self.pump().await;
        }

        async fn synth(&mut self, event: SynthEvent) {
            self.engine.handle(EngineMsg::Synth(event)).await;
            self.pump().await;
        }

        /// Advances the mock device cursor and runs one writer pass,
        /// delivering any resulting tick to the engine.
        async fn tick(&mut self, cursor: u64) {
            self.sink.as_ref().unwrap().set_cursor(cursor);
            let tick = self.core.as_mut().unwrap().tick_once();
            if let Some(tick) = tick {
                self.engine.handle(EngineMsg::Writer(tick)).await;
                self.pump().await;
            }
        }

        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events_rx.try_recv() {
                out.push(event);
            }
            out
        }

        fn started_lines(&mut self) -> Vec<usize> {
            self.drain_events()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::LineStarted { line } => Some(line),
                    _ => None,
                })
                .collect()
        }
    }

    fn spoken_texts(script: &SynthScript) -> Vec<String> {
        script
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SynthCall::Speak { text, .. } | SynthCall::Buffer { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn start_is_deferred_until_provider_ready() {
        let mut t = bed(PlaybackStrategy::Direct, &["Hello there."]);
        t.control(ControlMsg::Play).await;
        assert!(t.script.playback_ids().is_empty());

        t.synth(SynthEvent::Ready).await;
        assert_eq!(spoken_texts(&t.script), vec!["Hello there."]);
        let playing = t.drain_events().iter().any(|e| {
            matches!(
                e,
                SessionEvent::StateChanged {
                    current: PlaybackState::Playing,
                    ..
                }
            )
        });
        assert!(playing);
    }

    #[tokio::test]
    async fn direct_done_advances_lines_and_stops_after_final_chapter() {
        let mut t = bed(PlaybackStrategy::Direct, &["One.\nTwo."]);
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        let id0 = t.script.playback_ids()[0];
        t.synth(SynthEvent::Started { id: id0 }).await;
        t.synth(SynthEvent::Done { id: id0 }).await;
        assert_eq!(spoken_texts(&t.script), vec!["One.", "Two."]);

        let id1 = t.script.playback_ids()[1];
        t.synth(SynthEvent::Done { id: id1 }).await;
        // Out of chapters: the final-chapter announcement plays, then we
        // stop.
        let texts = spoken_texts(&t.script);
        assert_eq!(texts.len(), 3);
        assert!(texts[2].contains("final chapter"));

        let id2 = t.script.playback_ids()[2];
        t.synth(SynthEvent::Done { id: id2 }).await;
        assert_eq!(t.engine.state.current(), PlaybackState::Stopped);
        assert_eq!(t.engine.state.desired(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn buffered_done_markers_fire_in_enqueue_order() {
        let mut t = bed(PlaybackStrategy::Buffered, &["One.\nTwo."]);
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        let id0 = t.script.buffer_ids()[0];
        t.synth(SynthEvent::BeginSynthesis {
            id: id0,
            spec: AudioSpec::default(),
        })
        .await;
        t.synth(SynthEvent::Started { id: id0 }).await;
        t.synth(SynthEvent::AudioAvailable {
            id: id0,
            data: vec![0u8; 2000],
        })
        .await;
        t.synth(SynthEvent::Done { id: id0 }).await;
        // The next line is only queued once playback reaches the end of
        // this one.
        assert_eq!(t.script.buffer_ids().len(), 1);

        t.tick(0).await;
        t.tick(1000).await;
        assert_eq!(t.script.buffer_ids().len(), 2);

        let id1 = t.script.buffer_ids()[1];
        t.synth(SynthEvent::BeginSynthesis {
            id: id1,
            spec: AudioSpec::default(),
        })
        .await;
        t.synth(SynthEvent::Started { id: id1 }).await;
        t.synth(SynthEvent::AudioAvailable {
            id: id1,
            data: vec![0u8; 1600],
        })
        .await;
        t.synth(SynthEvent::Done { id: id1 }).await;
        t.tick(1800).await;

        let started = t.started_lines();
        assert_eq!(started, vec![0, 1]);
    }

    #[tokio::test]
    async fn interrupt_mid_synthesis_empties_queue_and_stops_once() {
        let mut t = bed(PlaybackStrategy::Buffered, &["One.\nTwo."]);
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;
        let id0 = t.script.buffer_ids()[0];
        t.synth(SynthEvent::BeginSynthesis {
            id: id0,
            spec: AudioSpec::default(),
        })
        .await;
        t.synth(SynthEvent::Started { id: id0 }).await;
        t.synth(SynthEvent::AudioAvailable {
            id: id0,
            data: vec![0u8; 2000],
        })
        .await;
        t.drain_events();

        t.control(ControlMsg::Pause).await;
        let stops: Vec<_> = t
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::UtteranceStopped { .. }))
            .collect();
        assert_eq!(stops.len(), 1);
        assert!(t.engine.queue.is_empty());
        assert!(t.engine.synthesizing.is_none());

        // Stale completion for the interrupted command is ignored and no
        // marker ever fires for it.
        t.synth(SynthEvent::Done { id: id0 }).await;
        t.tick(1_000_000).await;
        assert!(t.started_lines().is_empty());
        assert_eq!(t.script.buffer_ids().len(), 1);
    }

    #[tokio::test]
    async fn goto_line_clamps_to_valid_range() {
        let mut t = bed(PlaybackStrategy::Direct, &["A.\nB.\nC."]);
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        t.control(ControlMsg::GotoLine(50)).await;
        assert_eq!(t.engine.line_number, 2);
        assert_eq!(spoken_texts(&t.script).last().unwrap(), "C.");

        t.control(ControlMsg::GotoLine(-7)).await;
        assert_eq!(t.engine.line_number, 0);
        assert_eq!(spoken_texts(&t.script).last().unwrap(), "A.");
    }

    #[tokio::test]
    async fn transient_failure_restarts_provider_and_retries() {
        let mut t = bed(PlaybackStrategy::Buffered, &["One."]);
        t.script.fail_once(SynthError::EngineGone("ipc died".into()));
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        // The failed attempt never reached the provider's queue, a fresh
        // provider instance was created, and the command is waiting.
        assert!(t.script.buffer_ids().is_empty());
        assert_eq!(t.script.providers_created(), 2);

        t.synth(SynthEvent::Ready).await;
        assert_eq!(spoken_texts(&t.script), vec!["One."]);
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_and_playback_continues() {
        let mut t = bed(PlaybackStrategy::Direct, &["One.\nTwo."]);
        t.script.fail_once(SynthError::Synthesis("unsupported text".into()));
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        let errors: Vec<_> = t
            .drain_events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::PlaybackError(PlaybackError::SynthesisPermanent { .. })
                )
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(spoken_texts(&t.script), vec!["Two."]);
    }

    #[tokio::test]
    async fn unsupported_language_is_surfaced_as_warning() {
        let mut t = bed(PlaybackStrategy::Direct, &["A."]);
        t.engine.prefs.language = Some("xx-XX".into());
        t.script.set_language_supported(false);
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        let warned = t.drain_events().into_iter().any(|e| {
            matches!(
                e,
                SessionEvent::PlaybackError(PlaybackError::LanguageUnavailable { .. })
            )
        });
        assert!(warned);
        // Playback continues with the previous language.
        assert_eq!(spoken_texts(&t.script), vec!["A."]);
    }

    #[tokio::test]
    async fn rendered_cache_replays_backward_seek_without_resynthesis() {
        let mut t = bed(PlaybackStrategy::Buffered, &["One.\nTwo."]);
        t.engine.prefs.read_next_chapter = false;
        t.control(ControlMsg::Play).await;
        t.synth(SynthEvent::Ready).await;

        for _ in 0..2 {
            let id = *t.script.buffer_ids().last().unwrap();
            t.synth(SynthEvent::BeginSynthesis {
                id,
                spec: AudioSpec::default(),
            })
            .await;
            t.synth(SynthEvent::Started { id }).await;
            t.synth(SynthEvent::AudioAvailable {
                id,
                data: vec![0u8; 2000],
            })
            .await;
            t.synth(SynthEvent::Done { id }).await;
            let elapsed = t.engine.buffered.as_ref().unwrap().frame;
            t.tick(0).await;
            t.tick(elapsed).await;
        }
        // Chapter finished without auto-advance.
        assert_eq!(t.engine.state.current(), PlaybackState::Stopped);
        assert_eq!(t.script.buffer_ids().len(), 2);
        t.drain_events();

        // Seeking back replays the cached rendering.
        t.control(ControlMsg::GotoLine(0)).await;
        assert_eq!(t.script.buffer_ids().len(), 2);
        assert_eq!(t.started_lines(), vec![0]);
    }
}
