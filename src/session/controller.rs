//! Reading session controller.
//!
//! Owns the passage list, the live transcript and every timer of a reading
//! session. It never performs I/O: each operation takes the current instant
//! and returns the [`SessionEffect`]s the host has to carry out (engine
//! commands, saves, UI updates).

use super::certification::{Certification, SessionOutcome};
use super::engine::{
    EndAction, EngineAdapter, EngineCommand, EngineEvent, ErrorAction, RecognitionResult,
};
use super::timers::{TimerKind, TimerScope, TimerSet};
use super::transcript::TranscriptState;
use crate::error::{EngineError, SessionError, StoreError};
use crate::matching::{
    highlight_chars, normalize_for, DifficultyClassifier, MatchDecider, PlatformClass,
    PlatformClassifier, WordListClassifier,
};
use crate::passages::{Passage, PassageKey};
use crate::persistence::UserProgress;
use crate::settings::ReaderSettings;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// States of a reading session.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadingState {
    /// No reading session
    Idle,
    /// Choosing a passage range
    Setup,
    /// Range chosen, waiting for the reader to begin
    Preview,
    Listening,
    /// Current passage cleared, engine restarting
    Retrying,
    /// Final progress is being written
    Saving,
    Completed,
}

impl ReadingState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingState::Idle => "idle",
            ReadingState::Setup => "setup",
            ReadingState::Preview => "preview",
            ReadingState::Listening => "listening",
            ReadingState::Retrying => "retrying",
            ReadingState::Saving => "saving",
            ReadingState::Completed => "completed",
        }
    }

    fn expects_engine(self) -> bool {
        matches!(self, ReadingState::Listening | ReadingState::Retrying)
    }
}

/// How a passage was completed.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Matched,
    /// Force-completed with the spoken passkey.
    PasskeyUsed,
    Skipped,
}

/// One line of the matched-content log.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MatchedEntry {
    pub key: PassageKey,
    pub text: String,
    pub completion: Completion,
}

/// Work the host must carry out on behalf of the controller.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEffect {
    Engine {
        command: EngineCommand,
    },
    StateChanged {
        state: ReadingState,
    },
    /// A passage became the active one.
    PassageActivated {
        index: usize,
        key: PassageKey,
        difficult: bool,
    },
    /// Live highlight of the active passage.
    Watermark {
        key: PassageKey,
        watermark: usize,
        highlight_chars: usize,
    },
    PassageCompleted {
        entry: MatchedEntry,
        completed_count: usize,
        total: usize,
    },
    /// Persist `progress`; report the outcome through `on_save_finished(id, ..)`.
    SaveProgress {
        id: u64,
        progress: UserProgress,
    },
    EscapePrompt {
        active: bool,
    },
    MicWaiting {
        active: bool,
    },
    /// Dismissible, non-fatal message.
    Warning {
        message: String,
    },
    /// The session was terminated.
    Fatal {
        message: String,
    },
    Certified {
        certification: Certification,
    },
}

/// Runtime configuration of the controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Spoken word that force-completes a difficult passage once prompted
    pub passkey: String,
    pub mic_watchdog: Duration,
    pub saving_display: Duration,
    pub verse_timeout_per_char: Duration,
    pub verse_timeout_min: Duration,
    pub verse_timeout_max: Duration,
    pub restart_debounce: Duration,
    /// Results arriving this soon after a transcript reset are dropped
    pub ignore_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_platform(PlatformClass::Standard)
    }
}

impl SessionConfig {
    pub fn for_platform(platform: PlatformClass) -> Self {
        Self {
            passkey: "아멘".to_string(),
            mic_watchdog: Duration::from_secs(3),
            saving_display: Duration::from_millis(1500),
            verse_timeout_per_char: Duration::from_millis(300),
            verse_timeout_min: Duration::from_secs(5),
            verse_timeout_max: Duration::from_secs(45),
            restart_debounce: platform.restart_debounce(),
            ignore_window: platform.ignore_window(),
        }
    }

    /// Load config from reader settings.
    pub fn from_settings(settings: &ReaderSettings, platform: PlatformClass) -> Self {
        Self {
            passkey: settings.passkey.clone(),
            mic_watchdog: Duration::from_millis(settings.mic_watchdog_ms),
            saving_display: Duration::from_millis(settings.saving_display_ms),
            verse_timeout_per_char: Duration::from_millis(settings.verse_timeout_ms_per_char),
            verse_timeout_min: Duration::from_millis(settings.verse_timeout_min_ms),
            verse_timeout_max: Duration::from_millis(settings.verse_timeout_max_ms),
            restart_debounce: settings
                .restart_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| platform.restart_debounce()),
            ignore_window: settings
                .ignore_window_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| platform.ignore_window()),
        }
    }

    /// Time a difficult passage of `chars` normalized characters gets before
    /// the escape prompt appears.
    pub fn verse_timeout(&self, chars: usize) -> Duration {
        let max = self.verse_timeout_max.max(self.verse_timeout_min);
        let chars = u32::try_from(chars).unwrap_or(u32::MAX);
        self.verse_timeout_per_char
            .checked_mul(chars)
            .unwrap_or(max)
            .clamp(self.verse_timeout_min, max)
    }
}

#[derive(Debug)]
struct Session {
    targets: Vec<Passage>,
    current_index: usize,
    skip_offset: usize,
    completed_count: usize,
}

impl Session {
    fn current(&self) -> Option<&Passage> {
        self.targets.get(self.current_index)
    }
}

#[derive(Debug)]
struct SavingPhase {
    certification: Certification,
    /// The final save, until it reports back.
    pending_save: Option<u64>,
    hold_elapsed: bool,
}

/// State machine for one reader.
pub struct SessionController {
    state: ReadingState,
    platform: PlatformClass,
    decider: MatchDecider,
    config: SessionConfig,
    passkey: String,

    session: Option<Session>,
    transcript: TranscriptState,
    adapter: EngineAdapter,
    timers: TimerSet,

    /// Bumped for every new session; session-scoped timers carry it.
    generation: u64,
    /// Bumped on every passage transition and retry; passage-scoped timers carry it.
    epoch: u64,
    next_save_id: u64,

    current_difficult: bool,
    escape_prompt_active: bool,
    mic_waiting: bool,
    /// The watchdog already reissued a start during this stall.
    watchdog_reissued: bool,
    ignore_until: Option<Instant>,

    matched_log: Vec<MatchedEntry>,
    progress: UserProgress,
    saving: Option<SavingPhase>,
    certification: Option<Certification>,
    last_error: Option<String>,

    wall_clock: fn() -> DateTime<Utc>,
}

impl SessionController {
    pub fn new(decider: MatchDecider, config: SessionConfig) -> Self {
        let platform = decider.platform();
        debug!(
            "SessionController created: platform={:?} profile={:?}",
            platform,
            decider.profile()
        );
        Self {
            state: ReadingState::Idle,
            platform,
            passkey: normalize_for(&config.passkey, platform),
            decider,
            config,
            session: None,
            transcript: TranscriptState::new(),
            adapter: EngineAdapter::new(platform),
            timers: TimerSet::new(),
            generation: 0,
            epoch: 0,
            next_save_id: 1,
            current_difficult: false,
            escape_prompt_active: false,
            mic_waiting: false,
            watchdog_reissued: false,
            ignore_until: None,
            matched_log: Vec::new(),
            progress: UserProgress::default(),
            saving: None,
            certification: None,
            last_error: None,
            wall_clock: Utc::now,
        }
    }

    /// Build a controller from reader settings and the platform `classifier`.
    pub fn from_settings(settings: &ReaderSettings, classifier: &dyn PlatformClassifier) -> Self {
        let platform = classifier.classify();
        let classifier: Arc<dyn DifficultyClassifier> = Arc::new(
            WordListClassifier::with_extra_words(&settings.extra_difficult_words),
        );
        let decider = MatchDecider::new(settings.threshold_profile(platform), platform, classifier);
        Self::new(decider, SessionConfig::from_settings(settings, platform))
    }

    /// Replace the clock used to date history records.
    pub fn set_wall_clock(&mut self, clock: fn() -> DateTime<Utc>) {
        self.wall_clock = clock;
    }

    /// Seed the controller with previously stored progress.
    pub fn restore_progress(&mut self, progress: UserProgress) {
        self.progress = progress;
    }

    pub fn state(&self) -> ReadingState {
        self.state
    }

    pub fn platform(&self) -> PlatformClass {
        self.platform
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn progress(&self) -> &UserProgress {
        &self.progress
    }

    pub fn transcript(&self) -> &TranscriptState {
        &self.transcript
    }

    pub fn matched_log(&self) -> &[MatchedEntry] {
        &self.matched_log
    }

    pub fn certification(&self) -> Option<&Certification> {
        self.certification.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn current_passage(&self) -> Option<&Passage> {
        self.session.as_ref().and_then(Session::current)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.current_index)
    }

    pub fn completed_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.completed_count)
    }

    pub fn skip_offset(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.skip_offset)
    }

    pub fn total_passages(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.targets.len())
    }

    pub fn escape_prompt_active(&self) -> bool {
        self.escape_prompt_active
    }

    pub fn mic_waiting(&self) -> bool {
        self.mic_waiting
    }

    pub fn is_timer_armed(&self, kind: TimerKind) -> bool {
        self.timers.is_armed(kind)
    }

    /// Earliest pending timer; the host should call [`Self::poll_timers`] then.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// `IDLE -> SETUP`.
    pub fn begin_setup(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        match self.state {
            ReadingState::Setup => Ok(Vec::new()),
            ReadingState::Idle | ReadingState::Completed => {
                let mut effects = Vec::new();
                self.set_state(ReadingState::Setup, &mut effects);
                Ok(effects)
            }
            state => Err(invalid("begin_setup", state)),
        }
    }

    /// Choose the passages to read. Passages before `resume_at` count as
    /// already read (the initial skip).
    pub fn select_range(
        &mut self,
        passages: Vec<Passage>,
        resume_at: Option<&PassageKey>,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        if !matches!(
            self.state,
            ReadingState::Idle
                | ReadingState::Setup
                | ReadingState::Preview
                | ReadingState::Completed
        ) {
            return Err(invalid("select_range", self.state));
        }
        if passages.is_empty() {
            return Err(SessionError::EmptyRange);
        }

        self.reset_session();
        let skip_offset = resume_at
            .and_then(|key| passages.iter().position(|p| &p.key == key))
            .unwrap_or(0);
        info!(
            "SessionController: selected {} passages from {}, resuming at index {}",
            passages.len(),
            passages[0].key,
            skip_offset
        );
        self.session = Some(Session {
            targets: passages,
            current_index: skip_offset,
            skip_offset,
            completed_count: skip_offset,
        });

        let mut effects = Vec::new();
        self.set_state(ReadingState::Preview, &mut effects);
        Ok(effects)
    }

    /// `PREVIEW -> LISTENING`: start the engine on the first passage to read.
    pub fn confirm(&mut self, now: Instant) -> Result<Vec<SessionEffect>, SessionError> {
        if self.state != ReadingState::Preview {
            return Err(invalid("confirm", self.state));
        }
        let mut effects = Vec::new();
        self.set_state(ReadingState::Listening, &mut effects);
        self.issue(EngineCommand::Start, &mut effects);
        self.activate_passage(now, &mut effects);
        self.ensure_watchdog(now);
        Ok(effects)
    }

    pub fn on_engine_event(&mut self, event: EngineEvent, now: Instant) -> Vec<SessionEffect> {
        match event {
            EngineEvent::Started => self.on_started(now),
            EngineEvent::Results {
                result_index,
                results,
            } => self.on_results(result_index, &results, now),
            EngineEvent::End => self.on_end(now),
            EngineEvent::Error { code } => {
                let mut effects = Vec::new();
                match self.adapter.on_error(&code) {
                    ErrorAction::Ignore => {}
                    ErrorAction::Fatal(message) => self.fatal(message, &mut effects),
                    ErrorAction::Stalled(message) => {
                        warn!("SessionController: engine stalled: {}", code);
                        self.set_mic_waiting(true, &mut effects);
                        effects.push(SessionEffect::Warning { message });
                        self.ensure_watchdog(now);
                    }
                    ErrorAction::Warn(message) => {
                        warn!("SessionController: engine error '{}'", code);
                        effects.push(SessionEffect::Warning { message });
                    }
                }
                effects
            }
        }
    }

    /// The host could not deliver an engine command.
    pub fn on_engine_command_failed(
        &mut self,
        command: EngineCommand,
        err: &EngineError,
        now: Instant,
    ) -> Vec<SessionEffect> {
        warn!(
            "SessionController: engine command '{}' failed: {}",
            command.as_str(),
            err
        );
        let mut effects = Vec::new();
        if command == EngineCommand::Start && self.state.expects_engine() {
            self.adapter.on_start_failed();
            if self.platform.is_constrained() {
                self.set_mic_waiting(true, &mut effects);
            }
            effects.push(SessionEffect::Warning {
                message: format!("Could not start speech recognition: {}", err),
            });
            self.ensure_watchdog(now);
        }
        effects
    }

    /// User "skip to next": completes the active passage without a match.
    pub fn skip(&mut self, now: Instant) -> Result<Vec<SessionEffect>, SessionError> {
        if !self.state.expects_engine() {
            return Err(invalid("skip", self.state));
        }
        Ok(self.complete_passage(Completion::Skipped, now))
    }

    /// Clear the transcript of the active passage and restart the engine.
    pub fn retry(&mut self, now: Instant) -> Result<Vec<SessionEffect>, SessionError> {
        if self.state != ReadingState::Listening {
            return Err(invalid("retry", self.state));
        }
        info!("SessionController: retrying current passage");
        let mut effects = Vec::new();
        self.reset_passage_state(now, &mut effects);
        self.set_state(ReadingState::Retrying, &mut effects);
        self.issue(EngineCommand::Stop, &mut effects);
        self.issue(EngineCommand::Reset, &mut effects);
        self.timers.arm(
            TimerKind::EngineRestart,
            now + self.config.restart_debounce,
            self.generation,
            self.epoch,
        );
        self.push_watermark(&mut effects);
        self.ensure_watchdog(now);
        Ok(effects)
    }

    /// End the session early, saving what was read.
    pub fn stop(&mut self, now: Instant) -> Result<Vec<SessionEffect>, SessionError> {
        if !matches!(
            self.state,
            ReadingState::Preview | ReadingState::Listening | ReadingState::Retrying
        ) {
            return Err(invalid("stop", self.state));
        }
        info!("SessionController: stop requested");
        let mut effects = Vec::new();
        let read = self.completed_count().saturating_sub(self.skip_offset());
        if read > 0 {
            self.finish(now, &mut effects);
            return Ok(effects);
        }

        self.timers.clear();
        if self.state.expects_engine() {
            self.issue(EngineCommand::Stop, &mut effects);
        }
        self.clear_indicators(&mut effects);
        let certification = self.certify();
        self.certification = Some(certification.clone());
        self.set_state(ReadingState::Idle, &mut effects);
        effects.push(SessionEffect::Certified { certification });
        Ok(effects)
    }

    /// Abandon the session: no save, engine aborted.
    pub fn exit(&mut self) -> Vec<SessionEffect> {
        info!("SessionController: exit from {}", self.state.as_str());
        let mut effects = Vec::new();
        if matches!(
            self.state,
            ReadingState::Listening | ReadingState::Retrying | ReadingState::Saving
        ) {
            self.issue(EngineCommand::Abort, &mut effects);
        }
        self.clear_indicators(&mut effects);
        self.reset_session();
        self.session = None;
        self.set_state(ReadingState::Idle, &mut effects);
        effects
    }

    /// Service every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        for deadline in self.timers.take_due(now) {
            if !deadline.is_current(self.generation, self.epoch) {
                debug!(
                    "SessionController: dropping stale {:?} (epoch {} != {})",
                    deadline.kind, deadline.epoch, self.epoch
                );
                continue;
            }
            match deadline.kind {
                TimerKind::VerseTimeout => self.on_verse_timeout(&mut effects),
                TimerKind::MicWatchdog => self.on_watchdog(&mut effects),
                TimerKind::EngineRestart => {
                    if self.state.expects_engine()
                        && !(self.adapter.is_listening() && !self.adapter.stopped_intentionally())
                    {
                        debug!("SessionController: restarting engine");
                        self.issue(EngineCommand::Start, &mut effects);
                        self.ensure_watchdog(now);
                    }
                }
                TimerKind::SavingHold => {
                    if let Some(saving) = self.saving.as_mut() {
                        saving.hold_elapsed = true;
                    }
                    self.try_leave_saving(&mut effects);
                }
            }
        }
        effects
    }

    /// Outcome of a [`SessionEffect::SaveProgress`]. Failures only warn; the
    /// in-memory progress stays authoritative.
    pub fn on_save_finished(
        &mut self,
        id: u64,
        result: Result<(), StoreError>,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match result {
            Ok(()) => debug!("SessionController: save {} finished", id),
            Err(e) => {
                warn!("SessionController: save {} failed: {}", id, e);
                effects.push(SessionEffect::Warning {
                    message: format!("Progress could not be saved: {}", e),
                });
            }
        }
        if let Some(saving) = self.saving.as_mut() {
            if saving.pending_save == Some(id) {
                saving.pending_save = None;
            }
        }
        self.try_leave_saving(&mut effects);
        effects
    }

    fn on_started(&mut self, now: Instant) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        self.adapter.on_started();
        self.timers.cancel(TimerKind::MicWatchdog);
        self.watchdog_reissued = false;
        self.set_mic_waiting(false, &mut effects);

        match self.state {
            ReadingState::Listening => {}
            ReadingState::Retrying => {
                self.set_state(ReadingState::Listening, &mut effects);
                self.arm_verse_timeout(now);
            }
            state => {
                debug!(
                    "SessionController: engine started while {}, stopping it",
                    state.as_str()
                );
                self.issue(EngineCommand::Stop, &mut effects);
            }
        }
        effects
    }

    fn on_results(
        &mut self,
        result_index: usize,
        results: &[RecognitionResult],
        now: Instant,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if self.state != ReadingState::Listening {
            debug!(
                "SessionController: results while {}, ignored",
                self.state.as_str()
            );
            return effects;
        }
        if self.ignore_until.is_some_and(|until| now < until) {
            debug!("SessionController: results inside the ignore window, dropped");
            return effects;
        }
        let Some(passage) = self.current_passage().cloned() else {
            return effects;
        };

        let raw = self.adapter.on_results(result_index, results);
        let moved = self.transcript.update(raw, &passage.text, self.platform);

        if self.escape_prompt_active
            && !self.passkey.is_empty()
            && self.transcript.normalized().contains(self.passkey.as_str())
        {
            info!("SessionController: passkey used for {}", passage.key);
            return self.complete_passage(Completion::PasskeyUsed, now);
        }

        if moved {
            self.push_watermark(&mut effects);
        }

        let verdict = self.decider.decide(
            &passage.text,
            self.transcript.normalized(),
            self.transcript.watermark(),
        );
        if verdict.complete {
            info!("SessionController: {} matched, {}", passage.key, verdict);
            effects.extend(self.complete_passage(Completion::Matched, now));
        }
        effects
    }

    fn on_end(&mut self, now: Instant) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        let action = self.adapter.on_end();
        if !self.state.expects_engine() {
            return effects;
        }
        match action {
            EndAction::Stopped => {}
            EndAction::Restart(delay) => {
                self.timers.arm(
                    TimerKind::EngineRestart,
                    now + delay,
                    self.generation,
                    self.epoch,
                );
            }
            EndAction::Stalled => {
                self.set_mic_waiting(true, &mut effects);
                effects.push(SessionEffect::Warning {
                    message: "Speech recognition stopped. Tap the mic to resume.".to_string(),
                });
            }
        }
        self.ensure_watchdog(now);
        effects
    }

    fn on_verse_timeout(&mut self, effects: &mut Vec<SessionEffect>) {
        if self.state != ReadingState::Listening
            || !self.current_difficult
            || self.escape_prompt_active
        {
            return;
        }
        info!("SessionController: verse timeout, escape prompt raised");
        self.escape_prompt_active = true;
        effects.push(SessionEffect::EscapePrompt { active: true });
    }

    fn on_watchdog(&mut self, effects: &mut Vec<SessionEffect>) {
        if !self.state.expects_engine() || self.adapter.is_listening() || self.watchdog_reissued {
            return;
        }
        warn!(
            "SessionController: engine not listening for {}ms, reissuing start",
            self.config.mic_watchdog.as_millis()
        );
        self.watchdog_reissued = true;
        self.issue(EngineCommand::Start, effects);
        self.set_mic_waiting(true, effects);
    }

    /// Log the active passage as done and move on, or finish the session
    /// after the last one.
    fn complete_passage(&mut self, completion: Completion, now: Instant) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return effects;
        };
        let Some(passage) = session.current().cloned() else {
            return effects;
        };
        session.completed_count = session.current_index + 1;
        let completed_count = session.completed_count;
        let total = session.targets.len();
        // a retry already stopped the engine and is waiting to restart it
        let restart_pending = self.state == ReadingState::Retrying;

        let entry = MatchedEntry {
            key: passage.key.clone(),
            text: passage.text.clone(),
            completion,
        };
        info!(
            "SessionController: {} {:?} ({}/{})",
            passage.key, completion, completed_count, total
        );
        self.matched_log.push(entry.clone());
        effects.push(SessionEffect::PassageCompleted {
            entry,
            completed_count,
            total,
        });

        self.reset_passage_state(now, &mut effects);
        self.issue(EngineCommand::Reset, &mut effects);
        self.progress.record_passage(&passage, (self.wall_clock)());

        if completed_count >= total {
            self.finish(now, &mut effects);
            return effects;
        }

        if let Some(session) = self.session.as_mut() {
            session.current_index += 1;
        }
        let checkpoint = self.save_effect();
        effects.push(checkpoint);

        let bounce = self.platform.restarts_between_passages();
        if bounce && !restart_pending {
            self.issue(EngineCommand::Stop, &mut effects);
        }
        if bounce || restart_pending {
            self.timers.arm(
                TimerKind::EngineRestart,
                now + self.config.restart_debounce,
                self.generation,
                self.epoch,
            );
        }
        self.activate_passage(now, &mut effects);
        self.ensure_watchdog(now);
        effects
    }

    /// Enter SAVING: certify, write the history record and hold the saving
    /// screen for its minimum duration.
    fn finish(&mut self, now: Instant, effects: &mut Vec<SessionEffect>) {
        self.timers.clear();
        self.epoch += 1;
        self.clear_indicators(effects);
        if self.state.expects_engine() {
            self.issue(EngineCommand::Stop, effects);
        }
        self.set_state(ReadingState::Saving, effects);

        let certification = self.certify();
        info!("SessionController: {}", certification.message);

        let pending_save = match certification.to_record((self.wall_clock)()) {
            Some(record) => {
                self.progress.add_session(record);
                let effect = self.save_effect();
                let id = match &effect {
                    SessionEffect::SaveProgress { id, .. } => Some(*id),
                    _ => None,
                };
                effects.push(effect);
                id
            }
            None => None,
        };

        self.timers.arm(
            TimerKind::SavingHold,
            now + self.config.saving_display,
            self.generation,
            self.epoch,
        );
        self.saving = Some(SavingPhase {
            certification,
            pending_save,
            hold_elapsed: false,
        });
    }

    fn try_leave_saving(&mut self, effects: &mut Vec<SessionEffect>) {
        if self.state != ReadingState::Saving {
            return;
        }
        let ready = self
            .saving
            .as_ref()
            .is_some_and(|s| s.hold_elapsed && s.pending_save.is_none());
        if !ready {
            return;
        }
        let Some(saving) = self.saving.take() else {
            return;
        };
        let next = if saving.certification.outcome == SessionOutcome::Completed {
            ReadingState::Completed
        } else {
            ReadingState::Idle
        };
        self.certification = Some(saving.certification.clone());
        self.set_state(next, effects);
        effects.push(SessionEffect::Certified {
            certification: saving.certification,
        });
    }

    fn certify(&self) -> Certification {
        match &self.session {
            Some(session) => Certification::for_session(
                &session.targets,
                session.skip_offset,
                session.completed_count,
            ),
            None => Certification::for_session(&[], 0, 0),
        }
    }

    fn activate_passage(&mut self, now: Instant, effects: &mut Vec<SessionEffect>) {
        let Some((index, passage)) = self
            .session
            .as_ref()
            .and_then(|s| s.current().map(|p| (s.current_index, p.clone())))
        else {
            return;
        };
        self.current_difficult = self.decider.is_difficult(&passage.text);
        debug!(
            "SessionController: active passage {} (difficult: {})",
            passage.key, self.current_difficult
        );
        effects.push(SessionEffect::PassageActivated {
            index,
            key: passage.key,
            difficult: self.current_difficult,
        });
        self.arm_verse_timeout(now);
    }

    fn arm_verse_timeout(&mut self, now: Instant) {
        if !self.current_difficult || self.escape_prompt_active {
            return;
        }
        let Some(passage) = self.current_passage() else {
            return;
        };
        let chars = normalize_for(&passage.text, self.platform).chars().count();
        let timeout = self.config.verse_timeout(chars);
        debug!(
            "SessionController: verse timeout in {}ms",
            timeout.as_millis()
        );
        self.timers.arm(
            TimerKind::VerseTimeout,
            now + timeout,
            self.generation,
            self.epoch,
        );
    }

    /// Arm the mic watchdog when the engine should be listening but is not.
    fn ensure_watchdog(&mut self, now: Instant) {
        if !self.state.expects_engine()
            || self.adapter.is_listening()
            || self.watchdog_reissued
            || self.timers.is_armed(TimerKind::MicWatchdog)
        {
            return;
        }
        self.timers.arm(
            TimerKind::MicWatchdog,
            now + self.config.mic_watchdog,
            self.generation,
            self.epoch,
        );
    }

    /// Drop everything tied to the active passage. Runs before any new timer
    /// is armed so nothing from the old passage can fire against the new one.
    fn reset_passage_state(&mut self, now: Instant, effects: &mut Vec<SessionEffect>) {
        self.epoch += 1;
        self.timers.cancel_scope(TimerScope::Passage);
        self.timers.cancel(TimerKind::EngineRestart);
        if self.escape_prompt_active {
            self.escape_prompt_active = false;
            effects.push(SessionEffect::EscapePrompt { active: false });
        }
        self.transcript.reset();
        self.adapter.reset_transcript();
        self.ignore_until = Some(now + self.config.ignore_window);
    }

    fn reset_session(&mut self) {
        self.generation += 1;
        self.epoch += 1;
        self.timers.clear();
        self.transcript.reset();
        self.adapter.reset_transcript();
        self.matched_log.clear();
        self.saving = None;
        self.certification = None;
        self.last_error = None;
        self.current_difficult = false;
        self.escape_prompt_active = false;
        self.mic_waiting = false;
        self.watchdog_reissued = false;
        self.ignore_until = None;
    }

    fn clear_indicators(&mut self, effects: &mut Vec<SessionEffect>) {
        if self.escape_prompt_active {
            self.escape_prompt_active = false;
            effects.push(SessionEffect::EscapePrompt { active: false });
        }
        self.set_mic_waiting(false, effects);
    }

    fn fatal(&mut self, message: String, effects: &mut Vec<SessionEffect>) {
        error!("SessionController: {}", message);
        self.timers.clear();
        self.epoch += 1;
        self.issue(EngineCommand::Abort, effects);
        self.clear_indicators(effects);
        self.transcript.reset();
        self.session = None;
        self.last_error = Some(message.clone());
        self.set_state(ReadingState::Idle, effects);
        effects.push(SessionEffect::Fatal { message });
    }

    fn issue(&mut self, command: EngineCommand, effects: &mut Vec<SessionEffect>) {
        match command {
            EngineCommand::Start => self.adapter.prepare_start(),
            EngineCommand::Stop | EngineCommand::Abort => self.adapter.prepare_stop(),
            EngineCommand::Reset => {}
        }
        debug!("SessionController: engine {}", command.as_str());
        effects.push(SessionEffect::Engine { command });
    }

    fn push_watermark(&self, effects: &mut Vec<SessionEffect>) {
        let Some(passage) = self.current_passage() else {
            return;
        };
        let watermark = self.transcript.watermark();
        effects.push(SessionEffect::Watermark {
            key: passage.key.clone(),
            watermark,
            highlight_chars: highlight_chars(&passage.text, watermark, self.platform),
        });
    }

    fn save_effect(&mut self) -> SessionEffect {
        let id = self.next_save_id;
        self.next_save_id += 1;
        SessionEffect::SaveProgress {
            id,
            progress: self.progress.clone(),
        }
    }

    fn set_mic_waiting(&mut self, active: bool, effects: &mut Vec<SessionEffect>) {
        if self.mic_waiting != active {
            self.mic_waiting = active;
            effects.push(SessionEffect::MicWaiting { active });
        }
    }

    fn set_state(&mut self, state: ReadingState, effects: &mut Vec<SessionEffect>) {
        if self.state == state {
            return;
        }
        info!(
            "SessionController: {} -> {}",
            self.state.as_str(),
            state.as_str()
        );
        self.state = state;
        effects.push(SessionEffect::StateChanged { state });
    }
}

fn invalid(command: &'static str, state: ReadingState) -> SessionError {
    SessionError::InvalidState {
        command,
        state: state.as_str(),
    }
}
