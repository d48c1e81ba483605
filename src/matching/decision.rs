//! The per-update "is this passage complete?" decision.

use super::difficulty::DifficultyClassifier;
use super::normalizer::normalize_for;
use super::profile::{PlatformClass, ThresholdProfile};
use super::similarity::{last_chars, similarity, tail_similarity};
use log::debug;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// The transcript window is this multiple of the passage length.
pub const LOOKBACK_FACTOR: f64 = 1.3;
/// Threshold points removed for passages with difficult vocabulary.
pub const DIFFICULT_RELAXATION: f64 = 20.0;
/// Tail verification applies to normalized passages longer than this.
pub const LONG_PASSAGE_CHARS: usize = 30;
/// Length of the tail compared during tail verification.
pub const TAIL_CHARS: usize = 15;
/// Minimum tail similarity on the constrained profile.
pub const STRICT_TAIL_SIMILARITY: f64 = 60.0;
/// Fraction of the passage the watermark must cover for smart completion.
pub const SMART_COMPLETION_RATIO: f64 = 0.85;
/// Minimum tail similarity for smart completion.
pub const SMART_TAIL_SIMILARITY: f64 = 50.0;
/// Points by which the windowed score must trail the watermark coverage
/// before reading is treated as segmented.
pub const SEGMENTED_READING_GAP: f64 = 20.0;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    /// Passage or transcript is empty.
    NoData,
    LowSimilarity,
    TooShort,
    /// Constrained engine matched a prefix but the ending was not read.
    WeakTail,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "path", content = "reason", rename_all = "snake_case")]
pub enum MatchPath {
    Strict,
    SmartCompletion,
    Incomplete(IncompleteReason),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct MatchVerdict {
    pub complete: bool,
    pub path: MatchPath,
    /// Similarity of the passage against the lookback window.
    pub similarity: f64,
    /// Threshold the similarity was held to, after any relaxation.
    pub threshold: f64,
}

impl MatchVerdict {
    fn incomplete(reason: IncompleteReason, similarity: f64, threshold: f64) -> Self {
        Self {
            complete: false,
            path: MatchPath::Incomplete(reason),
            similarity,
            threshold,
        }
    }
}

impl fmt::Display for MatchVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (similarity {:.1} / threshold {:.1})",
            self.path, self.similarity, self.threshold
        )
    }
}

/// Decides passage completion for one platform class and profile.
#[derive(Clone)]
pub struct MatchDecider {
    profile: ThresholdProfile,
    platform: PlatformClass,
    classifier: Arc<dyn DifficultyClassifier>,
}

impl MatchDecider {
    pub fn new(
        profile: ThresholdProfile,
        platform: PlatformClass,
        classifier: Arc<dyn DifficultyClassifier>,
    ) -> Self {
        Self {
            profile,
            platform,
            classifier,
        }
    }

    pub fn profile(&self) -> &ThresholdProfile {
        &self.profile
    }

    pub fn platform(&self) -> PlatformClass {
        self.platform
    }

    pub fn is_difficult(&self, text: &str) -> bool {
        self.classifier.contains_difficult_word(text)
    }

    /// Evaluate `passage_text` against the normalized transcript buffer.
    ///
    /// `watermark` is the current prefix watermark of the passage; it only
    /// feeds the smart-completion path.
    pub fn decide(
        &self,
        passage_text: &str,
        normalized_buffer: &str,
        watermark: usize,
    ) -> MatchVerdict {
        let passage = normalize_for(passage_text, self.platform);
        let base = self.profile.similarity_threshold;
        if passage.is_empty() || normalized_buffer.is_empty() {
            return MatchVerdict::incomplete(IncompleteReason::NoData, 0.0, base);
        }

        let passage_len = passage.chars().count();
        let window_size = (passage_len as f64 * LOOKBACK_FACTOR).floor() as usize;
        let window = last_chars(normalized_buffer, window_size);
        let window_len = window.chars().count();

        let score = similarity(&passage, &window);
        let ratio_ok = window_len as f64 >= passage_len as f64 * self.profile.min_length_ratio;
        let gap_ok = window_len > 0
            && passage_len.saturating_sub(window_len) <= self.profile.absolute_length_slack;

        let threshold = if self.classifier.contains_difficult_word(&passage) {
            base - DIFFICULT_RELAXATION
        } else {
            base
        };

        let verdict = if score >= threshold && (ratio_ok || gap_ok) {
            self.verify_tail(&passage, &window, score, threshold)
        } else if let Some(verdict) =
            self.smart_completion(&passage, &window, watermark, score, threshold)
        {
            verdict
        } else if score < threshold {
            MatchVerdict::incomplete(IncompleteReason::LowSimilarity, score, threshold)
        } else {
            MatchVerdict::incomplete(IncompleteReason::TooShort, score, threshold)
        };

        debug!(
            "MatchDecider: {} (window {}/{} chars, watermark {})",
            verdict, window_len, passage_len, watermark
        );
        verdict
    }

    /// Constrained engines report plausible prefixes early; on long passages
    /// the ending itself must have been read.
    fn verify_tail(&self, passage: &str, window: &str, score: f64, threshold: f64) -> MatchVerdict {
        if self.platform.is_constrained() && passage.chars().count() > LONG_PASSAGE_CHARS {
            let tail = tail_similarity(passage, window, TAIL_CHARS);
            if tail < STRICT_TAIL_SIMILARITY
                && !self
                    .classifier
                    .contains_difficult_word(&last_chars(passage, TAIL_CHARS))
            {
                debug!("MatchDecider: tail similarity {:.1} too low", tail);
                return MatchVerdict::incomplete(IncompleteReason::WeakTail, score, threshold);
            }
        }
        MatchVerdict {
            complete: true,
            path: MatchPath::Strict,
            similarity: score,
            threshold,
        }
    }

    fn smart_completion(
        &self,
        passage: &str,
        window: &str,
        watermark: usize,
        score: f64,
        threshold: f64,
    ) -> Option<MatchVerdict> {
        if self.platform.is_constrained() {
            return None;
        }
        let passage_len = passage.chars().count() as f64;
        let watermark = watermark as f64;
        if watermark < passage_len * SMART_COMPLETION_RATIO {
            return None;
        }
        let coverage = watermark / passage_len * 100.0;
        if coverage - score < SEGMENTED_READING_GAP {
            return None;
        }
        let tail = tail_similarity(passage, window, TAIL_CHARS);
        if tail < SMART_TAIL_SIMILARITY {
            return None;
        }
        Some(MatchVerdict {
            complete: true,
            path: MatchPath::SmartCompletion,
            similarity: score,
            threshold,
        })
    }
}

impl fmt::Debug for MatchDecider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchDecider")
            .field("profile", &self.profile)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::difficulty::{NoDifficultWords, WordListClassifier};
    use crate::matching::normalizer::normalize;

    fn standard() -> MatchDecider {
        MatchDecider::new(
            ThresholdProfile::STANDARD,
            PlatformClass::Standard,
            Arc::new(NoDifficultWords),
        )
    }

    fn constrained() -> MatchDecider {
        MatchDecider::new(
            ThresholdProfile::CONSTRAINED,
            PlatformClass::Constrained,
            Arc::new(NoDifficultWords),
        )
    }

    // 40 normalized characters
    const LONG: &str = "abcdefghij klmnopqrst uvwxyzabcd efghijklmn";

    #[test]
    fn test_exact_transcript_completes() {
        let verdict =
            standard().decide("the quick brown fox", &normalize("the quick brown fox"), 0);
        assert!(verdict.complete);
        assert_eq!(verdict.path, MatchPath::Strict);
        assert_eq!(verdict.similarity, 100.0);
    }

    #[test]
    fn test_short_window_is_incomplete() {
        let buffer: String = normalize(LONG).chars().take(24).collect();
        let verdict = standard().decide(LONG, &buffer, 0);
        assert!(!verdict.complete);
        assert_eq!(
            verdict.path,
            MatchPath::Incomplete(IncompleteReason::TooShort)
        );
    }

    #[test]
    fn test_difficult_passage_relaxes_threshold() {
        // 20 normalized chars, 12 substituted -> similarity 40
        let passage = "quixotic abcdefghijkl";
        let buffer = "quixoticzzzzzzzzzzzz";

        let relaxed = MatchDecider::new(
            ThresholdProfile::STANDARD,
            PlatformClass::Standard,
            Arc::new(WordListClassifier::new(["quixotic"])),
        );
        let verdict = relaxed.decide(passage, buffer, 0);
        assert!((verdict.similarity - 40.0).abs() < 1e-9);
        assert_eq!(verdict.threshold, 35.0);
        assert!(verdict.complete);

        let verdict = standard().decide(passage, buffer, 0);
        assert_eq!(
            verdict.path,
            MatchPath::Incomplete(IncompleteReason::LowSimilarity)
        );
    }

    #[test]
    fn test_lookback_window_excludes_stale_content() {
        // long run of unrelated earlier material, then the passage
        let buffer = format!("{}{}", "z".repeat(200), normalize("the quick brown fox"));
        let verdict = standard().decide("the quick brown fox", &buffer, 0);
        assert!(verdict.complete);
    }

    #[test]
    fn test_constrained_tail_verification() {
        let passage = normalize(LONG);
        let garbled: String = passage
            .chars()
            .take(30)
            .chain("0000000000".chars())
            .collect();

        let verdict = constrained().decide(LONG, &garbled, 0);
        assert_eq!(
            verdict.path,
            MatchPath::Incomplete(IncompleteReason::WeakTail)
        );

        let verdict = standard().decide(LONG, &garbled, 0);
        assert_eq!(verdict.path, MatchPath::Strict);
    }

    #[test]
    fn test_difficult_tail_skips_tail_verification() {
        let passage = normalize(LONG);
        let garbled: String = passage
            .chars()
            .take(30)
            .chain("0000000000".chars())
            .collect();
        let constrained_with = |word: &str| {
            MatchDecider::new(
                ThresholdProfile::CONSTRAINED,
                PlatformClass::Constrained,
                Arc::new(WordListClassifier::new([word])),
            )
        };

        // "efghijklmn" sits in the last 15 characters
        let verdict = constrained_with("efghijklmn").decide(LONG, &garbled, 0);
        assert!(verdict.complete);
        assert_eq!(verdict.path, MatchPath::Strict);

        // a difficult word elsewhere only relaxes the threshold
        let verdict = constrained_with("opqrst").decide(LONG, &garbled, 0);
        assert_eq!(verdict.threshold, 40.0);
        assert_eq!(
            verdict.path,
            MatchPath::Incomplete(IncompleteReason::WeakTail)
        );
    }

    #[test]
    fn test_constrained_profile_needs_full_length() {
        let buffer: String = normalize(LONG).chars().take(37).collect();
        assert!(standard().decide(LONG, &buffer, 0).complete);
        assert!(!constrained().decide(LONG, &buffer, 0).complete);
    }

    #[test]
    fn test_smart_completion_after_segmented_reading() {
        // the engine lost the beginning; the watermark already covers 90%
        let buffer: String = normalize(LONG).chars().skip(28).collect();
        let verdict = standard().decide(LONG, &buffer, 36);
        assert!(verdict.complete);
        assert_eq!(verdict.path, MatchPath::SmartCompletion);

        // without the watermark the same buffer is not enough
        assert!(!standard().decide(LONG, &buffer, 10).complete);
        // and the constrained profile never takes this path
        assert!(!constrained().decide(LONG, &buffer, 36).complete);
    }

    #[test]
    fn test_missing_data_is_incomplete() {
        let verdict = standard().decide("", "abc", 0);
        assert_eq!(
            verdict.path,
            MatchPath::Incomplete(IncompleteReason::NoData)
        );
        let verdict = standard().decide("abc", "", 0);
        assert_eq!(
            verdict.path,
            MatchPath::Incomplete(IncompleteReason::NoData)
        );
    }
}
