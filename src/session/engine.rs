//! The boundary to the external speech recognition engine.
//!
//! The engine is not part of this crate. It receives [`EngineCommand`]s and
//! reports back through [`EngineEvent`]s; [`EngineAdapter`] keeps the little
//! state the session needs to interpret those events.

use crate::error::EngineError;
use crate::matching::PlatformClass;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineCommand {
    Start,
    Stop,
    /// Drop the engine's accumulated transcript.
    Reset,
    /// Stop immediately and discard pending results.
    Abort,
}

impl EngineCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineCommand::Start => "start",
            EngineCommand::Stop => "stop",
            EngineCommand::Reset => "reset",
            EngineCommand::Abort => "abort",
        }
    }
}

/// A streaming speech recognition engine.
pub trait SpeechEngine: Send {
    fn start(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self) -> Result<(), EngineError>;
    fn reset(&mut self) -> Result<(), EngineError>;
    fn abort(&mut self) -> Result<(), EngineError>;

    fn execute(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        match command {
            EngineCommand::Start => self.start(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::Reset => self.reset(),
            EngineCommand::Abort => self.abort(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    #[serde(default)]
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Error codes reported by the engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum EngineErrorCode {
    NoSpeech,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    Aborted,
    Other(String),
}

impl EngineErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            EngineErrorCode::NoSpeech => "no-speech",
            EngineErrorCode::AudioCapture => "audio-capture",
            EngineErrorCode::Network => "network",
            EngineErrorCode::NotAllowed => "not-allowed",
            EngineErrorCode::ServiceNotAllowed => "service-not-allowed",
            EngineErrorCode::Aborted => "aborted",
            EngineErrorCode::Other(code) => code,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            EngineErrorCode::NotAllowed | EngineErrorCode::ServiceNotAllowed
        )
    }
}

impl From<String> for EngineErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "no-speech" => EngineErrorCode::NoSpeech,
            "audio-capture" => EngineErrorCode::AudioCapture,
            "network" => EngineErrorCode::Network,
            "not-allowed" => EngineErrorCode::NotAllowed,
            "service-not-allowed" => EngineErrorCode::ServiceNotAllowed,
            "aborted" => EngineErrorCode::Aborted,
            _ => EngineErrorCode::Other(code),
        }
    }
}

impl From<EngineErrorCode> for String {
    fn from(code: EngineErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine is capturing.
    Started,
    /// A result batch. Results before `result_index` are unchanged since the
    /// previous batch.
    Results {
        #[serde(default)]
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    /// The engine stopped, on request or on its own.
    End,
    Error { code: EngineErrorCode },
}

/// What should happen after the engine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndAction {
    /// The stop was requested; nothing to do.
    Stopped,
    /// Restart after the delay.
    Restart(Duration),
    /// Automatic restarts are exhausted; the user has to intervene.
    Stalled,
}

/// What the session should do with an engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAction {
    /// Reported after an intentional stop; not meaningful.
    Ignore,
    /// The session cannot continue.
    Fatal(String),
    /// The engine is wedged and waits for the user.
    Stalled(String),
    Warn(String),
}

/// Session-side view of the engine.
#[derive(Debug)]
pub struct EngineAdapter {
    platform: PlatformClass,
    listening: bool,
    stopped_intentionally: bool,
    restart_attempts: u32,
    /// Final results accumulated on engines that deliver increments.
    final_transcript: String,
}

impl EngineAdapter {
    pub fn new(platform: PlatformClass) -> Self {
        Self {
            platform,
            listening: false,
            stopped_intentionally: true,
            restart_attempts: 0,
            final_transcript: String::new(),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn stopped_intentionally(&self) -> bool {
        self.stopped_intentionally
    }

    /// Called before issuing a start.
    pub fn prepare_start(&mut self) {
        self.stopped_intentionally = false;
    }

    /// Called before issuing a stop or abort.
    pub fn prepare_stop(&mut self) {
        self.stopped_intentionally = true;
    }

    pub fn reset_transcript(&mut self) {
        self.final_transcript.clear();
    }

    pub fn on_started(&mut self) {
        debug!("EngineAdapter: engine started");
        self.listening = true;
        self.stopped_intentionally = false;
        self.restart_attempts = 0;
    }

    /// Assemble the engine's current hypothesis for the whole utterance.
    pub fn on_results(&mut self, result_index: usize, results: &[RecognitionResult]) -> String {
        if self.platform.is_constrained() {
            let mut interim = String::new();
            for result in results.iter().skip(result_index) {
                if result.is_final {
                    self.final_transcript.push_str(&result.transcript);
                } else {
                    interim.push_str(&result.transcript);
                }
            }
            if interim.is_empty() {
                self.final_transcript.clone()
            } else {
                format!("{} {}", self.final_transcript, interim)
            }
        } else {
            results
                .last()
                .map(|result| result.transcript.clone())
                .unwrap_or_default()
        }
    }

    pub fn on_end(&mut self) -> EndAction {
        self.listening = false;
        if self.stopped_intentionally {
            debug!("EngineAdapter: engine ended after a requested stop");
            return EndAction::Stopped;
        }

        let delay = self.platform.restart_debounce();
        match self.platform.max_auto_restarts() {
            Some(max) if self.restart_attempts >= max => {
                warn!(
                    "EngineAdapter: engine ended again after {} restart(s), waiting for the user",
                    self.restart_attempts
                );
                EndAction::Stalled
            }
            _ => {
                self.restart_attempts += 1;
                info!(
                    "EngineAdapter: engine ended on its own, restart #{} in {}ms",
                    self.restart_attempts,
                    delay.as_millis()
                );
                EndAction::Restart(delay)
            }
        }
    }

    pub fn on_error(&mut self, code: &EngineErrorCode) -> ErrorAction {
        if self.stopped_intentionally {
            debug!("EngineAdapter: ignoring '{}' after a requested stop", code);
            return ErrorAction::Ignore;
        }

        match code {
            code if code.is_permission_denied() => {
                self.listening = false;
                self.stopped_intentionally = true;
                ErrorAction::Fatal("Microphone permission was denied.".to_string())
            }
            EngineErrorCode::AudioCapture | EngineErrorCode::Network
                if self.platform.is_constrained() =>
            {
                self.listening = false;
                ErrorAction::Stalled(format!(
                    "Speech recognition was interrupted ({}). Tap to resume.",
                    code
                ))
            }
            EngineErrorCode::Aborted => ErrorAction::Ignore,
            EngineErrorCode::NoSpeech => {
                ErrorAction::Warn("No speech was detected.".to_string())
            }
            other => ErrorAction::Warn(format!("Speech recognition error: {}", other)),
        }
    }

    /// A start command could not be delivered.
    pub fn on_start_failed(&mut self) {
        self.listening = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_takes_last_result() {
        let mut adapter = EngineAdapter::new(PlatformClass::Standard);
        let results = vec![
            RecognitionResult::final_result("the quick"),
            RecognitionResult::interim("the quick brown"),
        ];
        assert_eq!(adapter.on_results(0, &results), "the quick brown");
        assert_eq!(adapter.on_results(0, &[]), "");
    }

    #[test]
    fn test_constrained_accumulates_finals() {
        let mut adapter = EngineAdapter::new(PlatformClass::Constrained);
        let first = vec![RecognitionResult::interim("the qui")];
        assert_eq!(adapter.on_results(0, &first), " the qui");

        let second = vec![RecognitionResult::final_result("the quick")];
        assert_eq!(adapter.on_results(0, &second), "the quick");

        let third = vec![
            RecognitionResult::final_result("the quick"),
            RecognitionResult::interim(" brown"),
        ];
        assert_eq!(adapter.on_results(1, &third), "the quick  brown");

        adapter.reset_transcript();
        assert_eq!(adapter.on_results(0, &[]), "");
    }

    #[test]
    fn test_intentional_stop_does_not_restart() {
        let mut adapter = EngineAdapter::new(PlatformClass::Standard);
        adapter.prepare_start();
        adapter.on_started();
        adapter.prepare_stop();
        assert_eq!(adapter.on_end(), EndAction::Stopped);
        assert!(!adapter.is_listening());
    }

    #[test]
    fn test_standard_always_restarts() {
        let mut adapter = EngineAdapter::new(PlatformClass::Standard);
        adapter.prepare_start();
        for _ in 0..5 {
            assert_eq!(
                adapter.on_end(),
                EndAction::Restart(Duration::from_millis(100))
            );
        }
    }

    #[test]
    fn test_constrained_restarts_once_then_stalls() {
        let mut adapter = EngineAdapter::new(PlatformClass::Constrained);
        adapter.prepare_start();
        adapter.on_started();
        assert_eq!(
            adapter.on_end(),
            EndAction::Restart(Duration::from_millis(800))
        );
        // restart never produced a start
        assert_eq!(adapter.on_end(), EndAction::Stalled);

        // a successful start re-arms the single restart
        adapter.on_started();
        assert_eq!(
            adapter.on_end(),
            EndAction::Restart(Duration::from_millis(800))
        );
    }

    #[test]
    fn test_error_classification() {
        let mut adapter = EngineAdapter::new(PlatformClass::Constrained);
        adapter.prepare_start();
        assert!(matches!(
            adapter.on_error(&EngineErrorCode::NoSpeech),
            ErrorAction::Warn(_)
        ));
        assert!(matches!(
            adapter.on_error(&EngineErrorCode::Network),
            ErrorAction::Stalled(_)
        ));
        assert!(matches!(
            adapter.on_error(&EngineErrorCode::NotAllowed),
            ErrorAction::Fatal(_)
        ));
        // the fatal error counts as a stop; later errors are noise
        assert_eq!(
            adapter.on_error(&EngineErrorCode::Network),
            ErrorAction::Ignore
        );

        let mut standard = EngineAdapter::new(PlatformClass::Standard);
        standard.prepare_start();
        assert!(matches!(
            standard.on_error(&EngineErrorCode::Network),
            ErrorAction::Warn(_)
        ));
    }

    #[test]
    fn test_event_wire_format() {
        let event: EngineEvent = serde_json::from_str(
            r#"{"type":"results","data":{"result_index":0,"results":[{"transcript":"hi","is_final":true}]}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            EngineEvent::Results {
                result_index: 0,
                results: vec![RecognitionResult::final_result("hi")],
            }
        );

        let event: EngineEvent =
            serde_json::from_str(r#"{"type":"error","data":{"code":"not-allowed"}}"#).unwrap();
        assert_eq!(
            event,
            EngineEvent::Error {
                code: EngineErrorCode::NotAllowed
            }
        );

        let other = serde_json::to_string(&EngineErrorCode::Other("bad-grammar".into())).unwrap();
        assert_eq!(other, "\"bad-grammar\"");
    }
}
