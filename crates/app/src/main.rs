mod fs_provider;
mod runtime;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lectern_engine::{PlaybackStrategy, SessionEvent};
use lectern_foundation::{PlaybackState, ReaderPrefs};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lectern", about = "Read chapter text aloud", version)]
struct Cli {
    /// Directory containing .txt chapter files, ordered by name.
    chapters: PathBuf,

    /// Chapter index to start from.
    #[arg(long, default_value_t = 0)]
    chapter: i64,

    /// Optional TOML preferences file (see ReaderPrefs).
    #[arg(long)]
    prefs: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = StrategyArg::Buffered)]
    strategy: StrategyArg,

    /// Speech rate multiplier.
    #[arg(long)]
    rate: Option<f32>,

    /// Pitch multiplier.
    #[arg(long)]
    pitch: Option<f32>,

    /// Voice id (see `espeak-ng --voices`).
    #[arg(long)]
    voice: Option<String>,

    /// BCP-47 language tag.
    #[arg(long)]
    language: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// The provider plays through its own output.
    Direct,
    /// The engine renders and owns the output device.
    Buffered,
}

impl From<StrategyArg> for PlaybackStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Direct => PlaybackStrategy::Direct,
            StrategyArg::Buffered => PlaybackStrategy::Buffered,
        }
    }
}

fn load_prefs(cli: &Cli) -> Result<ReaderPrefs> {
    let mut prefs = match &cli.prefs {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading prefs {}", path.display()))?;
            toml::from_str(&raw).context("parsing prefs")?
        }
        None => ReaderPrefs::default(),
    };
    if let Some(rate) = cli.rate {
        prefs.speech_rate = rate;
    }
    if let Some(pitch) = cli.pitch {
        prefs.pitch = pitch;
    }
    if let Some(voice) = &cli.voice {
        prefs.voice = Some(voice.clone());
    }
    if let Some(language) = &cli.language {
        prefs.language = Some(language.clone());
    }
    Ok(prefs)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let prefs = load_prefs(&cli)?;
    let handle = runtime::start(runtime::RuntimeOptions {
        chapters_dir: cli.chapters.clone(),
        strategy: cli.strategy.into(),
        prefs,
        start_chapter: cli.chapter,
    })?;

    // Session events to the terminal.
    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::ChapterChanged { index, title } => {
                    println!("== Chapter {index}: {title}");
                }
                SessionEvent::SentenceList(lines) => {
                    println!("   ({} lines)", lines.len());
                }
                SessionEvent::LineStarted { line } => println!("-> line {line}"),
                SessionEvent::StateChanged { desired, current } => {
                    tracing::debug!(?desired, ?current, "state");
                    if current == PlaybackState::Disposed {
                        break;
                    }
                }
                SessionEvent::PlaybackError(err) => eprintln!("!! {err}"),
                _ => {}
            }
        }
    });

    println!("commands: play pause stop next prev nl pl goto <n> chapter <n> quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("play"), _) => handle.play(),
                    (Some("pause"), _) => handle.pause(),
                    (Some("stop"), _) => handle.stop(),
                    (Some("next"), _) => handle.next_chapter(),
                    (Some("prev"), _) => handle.previous_chapter(),
                    (Some("nl"), _) => handle.next_line(),
                    (Some("pl"), _) => handle.previous_line(),
                    (Some("goto"), Some(n)) => match n.parse() {
                        Ok(n) => handle.goto_line(n),
                        Err(_) => eprintln!("usage: goto <line>"),
                    },
                    (Some("chapter"), Some(n)) => match n.parse() {
                        Ok(n) => handle.goto_chapter(n),
                        Err(_) => eprintln!("usage: chapter <index>"),
                    },
                    (Some("quit"), _) | (Some("q"), _) => break,
                    (Some(other), _) => eprintln!("unknown command: {other}"),
                    (None, _) => {}
                }
            }
        }
    }

    handle.dispose();
    let _ = printer.await;
    Ok(())
}
