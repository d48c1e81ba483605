//! Async host for a [`SessionController`].
//!
//! Feeds engine events, user commands and save completions into the
//! controller, sleeps until its next deadline and carries out the effects it
//! returns. Saves run on the blocking pool so a slow store never holds up
//! recognition.

use crate::error::{SessionError, StoreError};
use crate::passages::{Passage, PassageKey};
use crate::persistence::{Identity, ProgressStore, UserProgress};
use crate::session::{EngineEvent, SessionController, SessionEffect, SpeechEngine};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// User intents accepted by the manager.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    BeginSetup,
    SelectRange {
        passages: Vec<Passage>,
        resume_at: Option<PassageKey>,
    },
    Confirm,
    Skip,
    Retry,
    Stop,
    Exit,
}

type SaveResult = (u64, Result<(), StoreError>);

pub struct SessionManager {
    controller: SessionController,
    engine: Box<dyn SpeechEngine>,
    store: Arc<dyn ProgressStore>,
    identity: Identity,
    observer: mpsc::UnboundedSender<SessionEffect>,
    save_tx: mpsc::UnboundedSender<SaveResult>,
    save_rx: mpsc::UnboundedReceiver<SaveResult>,
    pending_saves: usize,
}

impl SessionManager {
    /// Load the identity's stored progress into `controller` and wrap it.
    /// Every effect is also forwarded to `observer`.
    pub fn new(
        mut controller: SessionController,
        engine: Box<dyn SpeechEngine>,
        store: Arc<dyn ProgressStore>,
        identity: Identity,
        observer: mpsc::UnboundedSender<SessionEffect>,
    ) -> Result<Self, StoreError> {
        let progress = store.load_progress(&identity)?;
        debug!(
            "SessionManager: loaded progress for '{}' (last position: {:?})",
            identity.user, progress.last_position
        );
        controller.restore_progress(progress);

        let (save_tx, save_rx) = mpsc::unbounded_channel();
        Ok(Self {
            controller,
            engine,
            store,
            identity,
            observer,
            save_tx,
            save_rx,
            pending_saves: 0,
        })
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn progress(&self) -> &UserProgress {
        self.controller.progress()
    }

    /// Drive the controller until the command channel closes, then wait for
    /// outstanding saves and hand the controller back.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> SessionController {
        info!("SessionManager: running for '{}'", self.identity.user);
        loop {
            let deadline = self.controller.next_deadline().map(Instant::from_std);
            let effects = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => {
                    self.controller.on_engine_event(event, now())
                }
                Some((id, result)) = self.save_rx.recv() => {
                    self.pending_saves = self.pending_saves.saturating_sub(1);
                    self.controller.on_save_finished(id, result)
                }
                _ = sleep_until(deadline) => self.controller.poll_timers(now()),
            };
            self.apply(effects);
        }

        while self.pending_saves > 0 {
            let Some((id, result)) = self.save_rx.recv().await else {
                break;
            };
            self.pending_saves -= 1;
            let effects = self.controller.on_save_finished(id, result);
            self.apply(effects);
        }
        info!("SessionManager: command channel closed, stopping");
        self.controller
    }

    fn handle_command(&mut self, command: SessionCommand) -> Vec<SessionEffect> {
        debug!("SessionManager: command {:?}", command);
        let now = now();
        let result: Result<Vec<SessionEffect>, SessionError> = match command {
            SessionCommand::BeginSetup => self.controller.begin_setup(),
            SessionCommand::SelectRange {
                passages,
                resume_at,
            } => self.controller.select_range(passages, resume_at.as_ref()),
            SessionCommand::Confirm => self.controller.confirm(now),
            SessionCommand::Skip => self.controller.skip(now),
            SessionCommand::Retry => self.controller.retry(now),
            SessionCommand::Stop => self.controller.stop(now),
            SessionCommand::Exit => Ok(self.controller.exit()),
        };
        result.unwrap_or_else(|e| {
            warn!("SessionManager: command rejected: {}", e);
            vec![SessionEffect::Warning {
                message: e.to_string(),
            }]
        })
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) {
        let mut queue: VecDeque<SessionEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match &effect {
                SessionEffect::Engine { command } => {
                    if let Err(e) = self.engine.execute(*command) {
                        queue.extend(self.controller.on_engine_command_failed(*command, &e, now()));
                    }
                }
                SessionEffect::SaveProgress { id, progress } => {
                    self.spawn_save(*id, progress.clone());
                }
                _ => {}
            }
            let _ = self.observer.send(effect);
        }
    }

    fn spawn_save(&mut self, id: u64, progress: UserProgress) {
        self.pending_saves += 1;
        let store = Arc::clone(&self.store);
        let identity = self.identity.clone();
        let tx = self.save_tx.clone();
        tokio::spawn(async move {
            let job = move || store.save_progress(&identity, &progress);
            let result = match tokio::task::spawn_blocking(job).await {
                Ok(result) => result,
                Err(e) => Err(StoreError::io("joining save task", e.into())),
            };
            let _ = tx.send((id, result));
        });
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::matching::{MatchDecider, NoDifficultWords, PlatformClass, ThresholdProfile};
    use crate::persistence::MemoryStore;
    use crate::session::{
        EngineCommand, ReadingState, RecognitionResult, SessionConfig, SessionOutcome,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingEngine {
        commands: Arc<Mutex<Vec<EngineCommand>>>,
        fail_start: bool,
    }

    impl SpeechEngine for RecordingEngine {
        fn start(&mut self) -> Result<(), EngineError> {
            self.commands.lock().unwrap().push(EngineCommand::Start);
            if self.fail_start {
                return Err(EngineError::Unavailable);
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), EngineError> {
            self.commands.lock().unwrap().push(EngineCommand::Stop);
            Ok(())
        }

        fn reset(&mut self) -> Result<(), EngineError> {
            self.commands.lock().unwrap().push(EngineCommand::Reset);
            Ok(())
        }

        fn abort(&mut self) -> Result<(), EngineError> {
            self.commands.lock().unwrap().push(EngineCommand::Abort);
            Ok(())
        }
    }

    fn controller() -> SessionController {
        let decider = MatchDecider::new(
            ThresholdProfile::default(),
            PlatformClass::Standard,
            Arc::new(NoDifficultWords),
        );
        SessionController::new(decider, SessionConfig::default())
    }

    fn passages() -> Vec<Passage> {
        vec![
            Passage::new(
                PassageKey::new("Book", 3, 1),
                "in the beginning was the word",
            ),
            Passage::new(PassageKey::new("Book", 3, 2), "and the word was near").ending_chapter(),
        ]
    }

    fn said(text: &str) -> EngineEvent {
        EngineEvent::Results {
            result_index: 0,
            results: vec![RecognitionResult::final_result(text)],
        }
    }

    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<SessionEffect>,
        pred: impl Fn(&SessionEffect) -> bool,
    ) -> SessionEffect {
        loop {
            let effect = rx.recv().await.expect("effect channel closed");
            if pred(&effect) {
                return effect;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_session_is_saved() {
        let engine = RecordingEngine::default();
        let store = Arc::new(MemoryStore::new());
        let identity = Identity::personal("reader");
        let (effect_tx, mut effect_rx) = mpsc::unbounded_channel();
        let manager = SessionManager::new(
            controller(),
            Box::new(engine.clone()),
            store.clone(),
            identity.clone(),
            effect_tx,
        )
        .unwrap();

        let (event_tx, event_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = tokio::spawn(manager.run(event_rx, command_rx));

        command_tx
            .send(SessionCommand::SelectRange {
                passages: passages(),
                resume_at: None,
            })
            .await
            .unwrap();
        command_tx.send(SessionCommand::Confirm).await.unwrap();
        wait_for(&mut effect_rx, |e| {
            matches!(
                e,
                SessionEffect::StateChanged {
                    state: ReadingState::Listening
                }
            )
        })
        .await;

        event_tx.send(EngineEvent::Started).await.unwrap();
        event_tx
            .send(said("in the beginning was the word"))
            .await
            .unwrap();
        wait_for(&mut effect_rx, |e| {
            matches!(e, SessionEffect::PassageCompleted { .. })
        })
        .await;

        tokio::time::advance(Duration::from_millis(500)).await;
        event_tx.send(said("and the word was near")).await.unwrap();
        let certified = wait_for(&mut effect_rx, |e| {
            matches!(e, SessionEffect::Certified { .. })
        })
        .await;
        match certified {
            SessionEffect::Certified { certification } => {
                assert_eq!(certification.outcome, SessionOutcome::Completed);
                assert_eq!(certification.passages_read, 2);
            }
            other => panic!("unexpected effect {:?}", other),
        }

        drop(command_tx);
        let controller = handle.await.unwrap();
        assert_eq!(controller.state(), ReadingState::Completed);

        let stored = store.load_progress(&identity).unwrap();
        assert_eq!(stored.history.len(), 1);
        assert!(stored.has_completed_chapter("Book", 3));
        assert_eq!(store.save_count(), 2);

        let commands = engine.commands.lock().unwrap().clone();
        assert_eq!(commands.first(), Some(&EngineCommand::Start));
        assert_eq!(commands.last(), Some(&EngineCommand::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_reported() {
        let engine = RecordingEngine {
            fail_start: true,
            ..Default::default()
        };
        let (effect_tx, mut effect_rx) = mpsc::unbounded_channel();
        let manager = SessionManager::new(
            controller(),
            Box::new(engine.clone()),
            Arc::new(MemoryStore::new()),
            Identity::personal("reader"),
            effect_tx,
        )
        .unwrap();
        let (_event_tx, event_rx) = mpsc::channel(1);
        let (command_tx, command_rx) = mpsc::channel(4);
        let handle = tokio::spawn(manager.run(event_rx, command_rx));

        command_tx
            .send(SessionCommand::SelectRange {
                passages: passages(),
                resume_at: None,
            })
            .await
            .unwrap();
        command_tx.send(SessionCommand::Confirm).await.unwrap();
        wait_for(&mut effect_rx, |e| {
            matches!(e, SessionEffect::Warning { .. })
        })
        .await;

        // the watchdog retries once on its own
        wait_for(&mut effect_rx, |e| {
            matches!(e, SessionEffect::MicWaiting { active: true })
        })
        .await;
        assert_eq!(
            engine.commands.lock().unwrap().as_slice(),
            &[EngineCommand::Start, EngineCommand::Start]
        );

        command_tx.send(SessionCommand::Exit).await.unwrap();
        drop(command_tx);
        let controller = handle.await.unwrap();
        assert_eq!(controller.state(), ReadingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_becomes_warning() {
        let (effect_tx, mut effect_rx) = mpsc::unbounded_channel();
        let manager = SessionManager::new(
            controller(),
            Box::new(RecordingEngine::default()),
            Arc::new(MemoryStore::new()),
            Identity::personal("reader"),
            effect_tx,
        )
        .unwrap();
        let (_event_tx, event_rx) = mpsc::channel(1);
        let (command_tx, command_rx) = mpsc::channel(4);
        let handle = tokio::spawn(manager.run(event_rx, command_rx));

        command_tx.send(SessionCommand::Skip).await.unwrap();
        let warning = wait_for(&mut effect_rx, |e| {
            matches!(e, SessionEffect::Warning { .. })
        })
        .await;
        assert_eq!(
            warning,
            SessionEffect::Warning {
                message: "'skip' is not allowed while idle".to_string()
            }
        );
        drop(command_tx);
        handle.await.unwrap();
    }
}
