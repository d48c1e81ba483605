//! Fuzzy alignment of a noisy transcript against a target passage.
//!
//! Leaf-first: the normalizer canonicalizes text, the similarity scorer
//! compares canonical strings, the watermark tracker follows reading progress
//! inside a passage and the decider turns all of it into a completion verdict.

pub mod decision;
pub mod difficulty;
pub mod normalizer;
pub mod profile;
pub mod similarity;
pub mod watermark;

pub use decision::{IncompleteReason, MatchDecider, MatchPath, MatchVerdict};
pub use difficulty::{DifficultyClassifier, NoDifficultWords, WordListClassifier};
pub use normalizer::{normalize, normalize_for};
pub use profile::{
    FixedPlatform, PlatformClass, PlatformClassifier, ThresholdProfile, UserAgentClassifier,
};
pub use similarity::similarity;
pub use watermark::{advance_watermark, highlight_chars};
