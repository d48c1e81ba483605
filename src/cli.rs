use crate::error::SessionError;
use crate::matching::{
    advance_watermark, normalize_for, similarity, FixedPlatform, MatchDecider, PlatformClass,
    PlatformClassifier, WordListClassifier,
};
use crate::passages::{HierarchicalText, PassageKey, PassageSource};
use crate::persistence::{Identity, JsonFileStore, MemoryStore, ProgressStore};
use crate::session::{EngineEvent, SessionController, SessionEffect};
use crate::settings::{get_default_settings, load_or_create_settings, ReaderSettings};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timers still pending after the last script line are serviced up to this long.
const SETTLE_AFTER_SCRIPT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug, Clone)]
#[command(name = "recite", about = "Recite - real-time read-aloud certification")]
pub struct CliArgs {
    /// Enable debug mode with verbose logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Reader settings file (created with defaults when missing)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Override the platform class from the settings
    #[arg(long, global = true, value_enum)]
    pub platform: Option<PlatformArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformArg {
    Standard,
    Constrained,
}

impl From<PlatformArg> for PlatformClass {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Standard => PlatformClass::Standard,
            PlatformArg::Constrained => PlatformClass::Constrained,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Drive a reading session from a script of timed engine events and commands
    Replay(ReplayArgs),
    /// Print the normalized form of a text
    Normalize {
        /// Text to normalize
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Score a transcript against a passage
    Score {
        #[arg(long)]
        passage: String,
        #[arg(long)]
        transcript: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Passage JSON file: { book: { chapter: { verse: text } } }
    #[arg(long)]
    pub passages: PathBuf,

    /// JSON lines, each {"at_ms": N, "command": ...} or {"at_ms": N, "event": ...}
    #[arg(long)]
    pub script: PathBuf,

    #[arg(long)]
    pub book: String,

    /// Chapters to read, e.g. "3" or "1-4"
    #[arg(long, default_value = "1")]
    pub chapters: String,

    /// Resume after the stored last position
    #[arg(long)]
    pub resume: bool,

    /// Store progress as JSON files here instead of in memory
    #[arg(long)]
    pub progress_dir: Option<PathBuf>,

    #[arg(long, default_value = "reader")]
    pub user: String,

    #[arg(long)]
    pub group: Option<i64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ScriptCommand {
    BeginSetup,
    Confirm,
    Skip,
    Retry,
    Stop,
    Exit,
}

#[derive(Deserialize, Debug, Clone)]
struct ScriptLine {
    at_ms: u64,
    #[serde(default)]
    command: Option<ScriptCommand>,
    #[serde(default)]
    event: Option<EngineEvent>,
}

pub fn execute(args: CliArgs) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => load_or_create_settings(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => get_default_settings(),
    };
    let classifier: Box<dyn PlatformClassifier> = match args.platform {
        Some(platform) => Box::new(FixedPlatform(platform.into())),
        None => settings.platform_classifier(),
    };

    match args.command {
        Command::Replay(replay_args) => replay(&settings, classifier.as_ref(), &replay_args),
        Command::Normalize { text } => {
            println!("{}", normalize_for(&text.join(" "), classifier.classify()));
            Ok(())
        }
        Command::Score {
            passage,
            transcript,
        } => score(&settings, classifier.classify(), &passage, &transcript),
    }
}

fn score(
    settings: &ReaderSettings,
    platform: PlatformClass,
    passage: &str,
    transcript: &str,
) -> Result<()> {
    let decider = MatchDecider::new(
        settings.threshold_profile(platform),
        platform,
        Arc::new(WordListClassifier::with_extra_words(
            &settings.extra_difficult_words,
        )),
    );
    let normalized_passage = normalize_for(passage, platform);
    let normalized_transcript = normalize_for(transcript, platform);
    let watermark = advance_watermark(passage, transcript, 0, platform);
    let verdict = decider.decide(passage, &normalized_transcript, watermark);

    let report = json!({
        "platform": platform,
        "normalized_passage": normalized_passage,
        "normalized_transcript": normalized_transcript,
        "similarity": similarity(&normalized_passage, &normalized_transcript),
        "difficult": decider.is_difficult(passage),
        "watermark": watermark,
        "verdict": verdict,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn replay(
    settings: &ReaderSettings,
    classifier: &dyn PlatformClassifier,
    args: &ReplayArgs,
) -> Result<()> {
    let text = HierarchicalText::from_path(&args.passages)
        .with_context(|| format!("loading passages from {}", args.passages.display()))?;
    let chapters = parse_chapters(&args.chapters)?;
    let passages = text
        .range(&args.book, chapters)
        .with_context(|| format!("selecting {} {}", args.book, args.chapters))?;
    let script = read_script(&args.script)?;

    let identity = match args.group {
        Some(group) => Identity::in_group(args.user.clone(), group),
        None => Identity::personal(args.user.clone()),
    };
    let store: Box<dyn ProgressStore> = match &args.progress_dir {
        Some(dir) => Box::new(JsonFileStore::new(dir.clone())),
        None => Box::new(MemoryStore::new()),
    };
    let progress = store
        .load_progress(&identity)
        .context("loading stored progress")?;

    let resume_at: Option<PassageKey> = if args.resume {
        let next = text.next_reading_start(progress.last_position.as_ref());
        info!("Resuming at {:?}", next);
        next
    } else {
        None
    };

    let mut controller = SessionController::from_settings(settings, classifier);
    controller.restore_progress(progress);
    info!(
        "Replaying {} script lines over {} passages ({:?})",
        script.len(),
        passages.len(),
        controller.platform()
    );

    let mut replay = Replay {
        controller,
        store,
        identity,
        base: Instant::now(),
    };
    replay.run_command(replay.base, |c, _| c.begin_setup())?;
    replay.run_command(replay.base, |c, _| {
        c.select_range(passages, resume_at.as_ref())
    })?;

    let mut clock = replay.base;
    for line in script {
        let at = (replay.base + Duration::from_millis(line.at_ms)).max(clock);
        replay.advance_to(at);
        clock = at;

        if let Some(command) = line.command {
            let result = replay.run_command(at, |c, now| match command {
                ScriptCommand::BeginSetup => c.begin_setup(),
                ScriptCommand::Confirm => c.confirm(now),
                ScriptCommand::Skip => c.skip(now),
                ScriptCommand::Retry => c.retry(now),
                ScriptCommand::Stop => c.stop(now),
                ScriptCommand::Exit => Ok(c.exit()),
            });
            if let Err(e) = result {
                warn!(
                    "Script command {:?} at {}ms rejected: {}",
                    command, line.at_ms, e
                );
            }
        }
        if let Some(event) = line.event {
            let effects = replay.controller.on_engine_event(event, at);
            replay.apply(at, effects);
        }
    }
    replay.advance_to(clock + SETTLE_AFTER_SCRIPT);

    match replay.controller.certification() {
        Some(certification) => {
            println!("{}", json!({ "certification": certification }));
        }
        None => info!(
            "Script ended in state {} without a certification",
            replay.controller.state().as_str()
        ),
    }
    Ok(())
}

struct Replay {
    controller: SessionController,
    store: Box<dyn ProgressStore>,
    identity: Identity,
    base: Instant,
}

impl Replay {
    fn run_command<F>(&mut self, at: Instant, command: F) -> Result<()>
    where
        F: FnOnce(&mut SessionController, Instant) -> Result<Vec<SessionEffect>, SessionError>,
    {
        let effects = command(&mut self.controller, at)?;
        self.apply(at, effects);
        Ok(())
    }

    /// Service every timer due up to `until`, in deadline order.
    fn advance_to(&mut self, until: Instant) {
        while let Some(deadline) = self.controller.next_deadline() {
            if deadline > until {
                break;
            }
            let effects = self.controller.poll_timers(deadline);
            self.apply(deadline, effects);
        }
    }

    /// Print effects and perform saves inline; the engine side is simulated
    /// by the script.
    fn apply(&mut self, at: Instant, effects: Vec<SessionEffect>) {
        let mut queue: VecDeque<SessionEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let at_ms = at.saturating_duration_since(self.base).as_millis();
            println!("{}", json!({ "at_ms": at_ms, "effect": &effect }));
            if let SessionEffect::SaveProgress { id, progress } = effect {
                let result = self.store.save_progress(&self.identity, &progress);
                debug!("Replay save {} finished (ok: {})", id, result.is_ok());
                queue.extend(self.controller.on_save_finished(id, result));
            }
        }
    }
}

fn read_script(path: &Path) -> Result<Vec<ScriptLine>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let mut lines = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let parsed: ScriptLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid script line", path.display(), number + 1))?;
        if parsed.command.is_none() && parsed.event.is_none() {
            bail!(
                "{}:{}: line has neither a command nor an event",
                path.display(),
                number + 1
            );
        }
        lines.push(parsed);
    }
    Ok(lines)
}

/// "3" or "1-4".
fn parse_chapters(spec: &str) -> Result<std::ops::RangeInclusive<u32>> {
    let parse = |s: &str| -> Result<u32> {
        s.trim()
            .parse::<u32>()
            .with_context(|| format!("'{}' is not a chapter number", s))
    };
    let range = match spec.split_once('-') {
        Some((start, end)) => parse(start)?..=parse(end)?,
        None => {
            let chapter = parse(spec)?;
            chapter..=chapter
        }
    };
    if range.is_empty() {
        bail!("chapter range '{}' is empty", spec);
    }
    Ok(range)
}
