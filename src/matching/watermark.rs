//! Prefix watermark tracking for live highlighting.
//!
//! The watermark is "how many normalized characters of the active passage
//! have been read". It only ever moves forward while a passage is active, so
//! the highlight never rewinds on a noisy interim result.

use super::normalizer::{normalize_for, normalize_words, prefix_offsets};
use super::profile::PlatformClass;
use super::similarity::similarity;
use log::debug;

/// Leading transcript words tried as re-synchronization anchors.
pub const ANCHOR_WORDS: usize = 8;
/// How far past the previous watermark an anchor may start, in normalized chars.
pub const ANCHOR_SLACK: usize = 10;
/// Similarity a candidate span must reach to move the watermark.
pub const WATERMARK_SIMILARITY: f64 = 45.0;

/// Compute the new watermark for `passage_text` given the live transcript.
///
/// Always returns at least `previous` and at most the normalized passage length.
pub fn advance_watermark(
    passage_text: &str,
    transcript: &str,
    previous: usize,
    platform: PlatformClass,
) -> usize {
    let passage: Vec<char> = normalize_for(passage_text, platform).chars().collect();
    let words: Vec<Vec<char>> = normalize_words(transcript, platform)
        .into_iter()
        .map(|w| w.chars().collect())
        .collect();
    if passage.is_empty() || words.is_empty() {
        return previous;
    }

    let mut best = prefix_reach(&passage, 0, &words);

    let limit = previous.saturating_add(ANCHOR_SLACK);
    for (i, anchor) in words.iter().take(ANCHOR_WORDS).enumerate() {
        for start in occurrences(&passage, anchor)
            .into_iter()
            .take_while(|start| *start <= limit)
        {
            best = best.max(prefix_reach(&passage, start, &words[i..]));
        }
    }

    let candidate = best.min(passage.len());
    if candidate > previous {
        debug!(
            "Watermark advanced {} -> {} of {}",
            previous,
            candidate,
            passage.len()
        );
    }
    previous.max(candidate)
}

/// Reach of `words` read from `start`: the end of the spanned passage slice
/// when it matches well enough, otherwise 0.
fn prefix_reach(passage: &[char], start: usize, words: &[Vec<char>]) -> usize {
    let spoken: String = words.iter().flatten().collect();
    let spoken_len = spoken.chars().count();
    let span = spoken_len.min(passage.len().saturating_sub(start));
    if span == 0 {
        return 0;
    }
    let target: String = passage[start..start + span].iter().collect();
    if similarity(&target, &spoken) >= WATERMARK_SIMILARITY {
        start + span
    } else {
        0
    }
}

/// Start offsets of every occurrence of `needle` in `haystack`, ascending.
fn occurrences(haystack: &[char], needle: &[char]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(start, _)| start)
        .collect()
}

/// Map a watermark onto the raw passage text: the number of leading
/// characters (punctuation and spaces included) to highlight.
pub fn highlight_chars(passage_text: &str, watermark: usize, platform: PlatformClass) -> usize {
    let normalized_len = normalize_for(passage_text, platform).chars().count();
    if watermark == 0 || normalized_len == 0 {
        return 0;
    }
    if watermark >= normalized_len {
        return passage_text.chars().count();
    }

    match prefix_offsets(passage_text, platform).position(|len| len >= watermark) {
        Some(index) => index + 1,
        None => passage_text.chars().count(),
    }
}
