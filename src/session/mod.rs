pub mod certification;
pub mod controller;
pub mod engine;
pub mod timers;
pub mod transcript;

pub use certification::{Certification, SessionOutcome};
pub use controller::{
    Completion, MatchedEntry, ReadingState, SessionConfig, SessionController, SessionEffect,
};
pub use engine::{
    EngineAdapter, EngineCommand, EngineErrorCode, EngineEvent, RecognitionResult, SpeechEngine,
};
pub use timers::{TimerKind, TimerScope};
pub use transcript::TranscriptState;
