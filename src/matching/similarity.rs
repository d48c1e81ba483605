//! Edit-distance similarity between a target and a (possibly longer) candidate.

use strsim::levenshtein;

/// Score in `[0, 100]` of how well `candidate` reproduces `target`.
///
/// The candidate may carry extra trailing material (a rolling window still
/// holding part of the previous passage), so the insertions needed to account
/// for the length surplus are not counted against it.
pub fn similarity(target: &str, candidate: &str) -> f64 {
    let target_len = target.chars().count();
    if target_len == 0 {
        return 100.0;
    }
    let candidate_len = candidate.chars().count();
    if candidate_len == 0 {
        return 0.0;
    }

    let distance = levenshtein(target, candidate);
    let surplus = candidate_len.saturating_sub(target_len);
    let core_edits = distance.saturating_sub(surplus);

    let score = (target_len as f64 - core_edits as f64) / target_len as f64 * 100.0;
    score.clamp(0.0, 100.0)
}

/// Similarity of the last `tail` characters of both strings.
pub fn tail_similarity(target: &str, candidate: &str, tail: usize) -> f64 {
    similarity(&last_chars(target, tail), &last_chars(candidate, tail))
}

/// The trailing `count` characters of `text` (all of it when shorter).
pub fn last_chars(text: &str, count: usize) -> String {
    let len = text.chars().count();
    text.chars().skip(len.saturating_sub(count)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_100() {
        assert_eq!(similarity("thequickbrownfox", "thequickbrownfox"), 100.0);
    }

    #[test]
    fn test_empty_edges() {
        assert_eq!(similarity("", ""), 100.0);
        assert_eq!(similarity("", "anything"), 100.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_longer_candidate_not_penalized_for_surplus() {
        // "xxxx" prefix is surplus material from an earlier passage
        assert_eq!(similarity("abcd", "xxxxabcd"), 100.0);
    }

    #[test]
    fn test_partial_match_scores_proportionally() {
        // one substitution in ten characters
        let score = similarity("abcdefghij", "abcdefghiz");
        assert!((score - 90.0).abs() < 1e-9);
        // half of the target missing
        let score = similarity("abcdefghij", "abcde");
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_clamped() {
        let score = similarity("ab", "zzzzzzzzzzzzzzzzzzzzzzzzzz");
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_hangul_counts_syllables() {
        // two of four syllables wrong
        let score = similarity("태초에하", "태초가나");
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_tail_similarity() {
        assert_eq!(last_chars("abcdef", 3), "def");
        assert_eq!(last_chars("ab", 5), "ab");
        assert_eq!(tail_similarity("xxxxxdef", "yyyyydef", 3), 100.0);
    }
}
