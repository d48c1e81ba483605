//! Canonicalization of recognized and target text.
//!
//! Two strings that differ only in the ways recognition engines typically
//! garble them (spacing, punctuation, case, spelled-out versus digit numerals)
//! normalize to the same string.

use super::profile::PlatformClass;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Upper bound on reduction passes. A pass never grows the text, and in
/// practice the second pass is already a fixed point.
const MAX_PASSES: usize = 8;

/// Classifier words the engines regularly split off or mishear after a number.
static MISRECOGNITIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"202\s*[호요]", "이백요"),
        (r"200\s*[호요]", "이백요"),
        (r"22\s*[호요]", "이십이요"),
        (r"20\s*[호요]", "이십요"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

const NUMERAL_WORDS: &[(char, &str)] = &[
    ('일', "1"),
    ('이', "2"),
    ('삼', "3"),
    ('사', "4"),
    ('오', "5"),
    ('육', "6"),
    ('칠', "7"),
    ('팔', "8"),
    ('구', "9"),
    ('십', "10"),
    ('백', "100"),
    ('천', "1000"),
    ('만', "10000"),
];

/// Place-value compositions, most significant unit first.
static HUNDREDS_TENS_ONES: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([0-9]+)100([0-9]+)10([0-9]+)").ok());
static HUNDREDS_ONES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([0-9]+)100([0-9]+)").ok());
static HUNDREDS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([0-9]+)100").ok());
static TENS_ONES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([0-9]+)10([0-9]+)").ok());
static TENS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([0-9]+)10").ok());

static SPACED_CLASSIFIER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([0-9]+)\s+([장절])").ok());
static SPACED_DIGITS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([0-9]+)\s+([0-9]+)").ok());

/// Normalize text as produced by a standard engine.
pub fn normalize(text: &str) -> String {
    normalize_for(text, PlatformClass::Standard)
}

/// Normalize text for the given platform class.
///
/// Idempotent: the single reduction pass is repeated until the output no
/// longer changes.
pub fn normalize_for(text: &str, platform: PlatformClass) -> String {
    let mut current = normalize_pass(text, platform);
    for _ in 1..MAX_PASSES {
        let next = normalize_pass(&current, platform);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Normalize each whitespace-separated word of `text`, dropping words that
/// normalize to nothing.
pub fn normalize_words(text: &str, platform: PlatformClass) -> Vec<String> {
    text.split_whitespace()
        .map(|word| normalize_for(word, platform))
        .filter(|word| !word.is_empty())
        .collect()
}

/// Normalized length of each prefix of `text`, one entry per raw character.
///
/// Entry `i` covers the raw characters `0..=i`. Numeral rewriting can make a
/// single raw character several normalized ones, so the table is computed
/// from the prefixes themselves rather than by counting kept characters.
pub fn prefix_offsets(text: &str, platform: PlatformClass) -> impl Iterator<Item = usize> + '_ {
    text.char_indices().map(move |(start, c)| {
        normalize_for(&text[..start + c.len_utf8()], platform)
            .chars()
            .count()
    })
}

fn is_kept_char(c: char) -> bool {
    c.is_alphanumeric()
}

fn normalize_pass(text: &str, platform: PlatformClass) -> String {
    let mut processed: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    for (pattern, replacement) in MISRECOGNITIONS.iter() {
        processed = pattern.replace_all(&processed, *replacement).into_owned();
    }

    processed = numeral_words_to_digits(&processed);
    processed = compose_place_values(&processed);

    if platform.is_constrained() {
        processed = collapse_numeral_spacing(&processed);
    }

    processed
        .to_lowercase()
        .chars()
        .filter(|c| is_kept_char(*c))
        .collect()
}

fn numeral_words_to_digits(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match NUMERAL_WORDS.iter().find(|(word, _)| *word == c) {
            Some((_, digits)) => out.push_str(digits),
            None => out.push(c),
        }
    }
    out
}

fn compose_place_values(text: &str) -> String {
    let mut out = text.to_string();
    out = reduce(&HUNDREDS_TENS_ONES, &out, |n| {
        n[0].checked_mul(100)?
            .checked_add(n[1].checked_mul(10)?)?
            .checked_add(n[2])
    });
    out = reduce(&HUNDREDS_ONES, &out, |n| {
        n[0].checked_mul(100)?.checked_add(n[1])
    });
    out = reduce(&HUNDREDS, &out, |n| n[0].checked_mul(100));
    out = reduce(&TENS_ONES, &out, |n| {
        n[0].checked_mul(10)?.checked_add(n[1])
    });
    out = reduce(&TENS, &out, |n| n[0].checked_mul(10));
    out
}

/// Replace every match of `pattern` with the value computed from its numeric
/// groups. Matches whose numbers do not fit are left as they are.
fn reduce(
    pattern: &Lazy<Option<Regex>>,
    text: &str,
    combine: fn(&[u64]) -> Option<u64>,
) -> String {
    let Some(re) = Lazy::force(pattern).as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        let numbers: Option<Vec<u64>> = caps
            .iter()
            .skip(1)
            .map(|group| group.and_then(|m| m.as_str().parse::<u64>().ok()))
            .collect();
        numbers
            .and_then(|n| combine(&n))
            .map(|value| value.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

fn collapse_numeral_spacing(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(re) = Lazy::force(&SPACED_CLASSIFIER).as_ref() {
        out = re.replace_all(&out, "$1$2").into_owned();
    }
    if let Some(re) = Lazy::force(&SPACED_DIGITS).as_ref() {
        out = re.replace_all(&out, "$1$2").into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_punctuation_whitespace_and_case() {
        assert_eq!(normalize("The Quick, brown  fox!"), "thequickbrownfox");
        assert_eq!(
            normalize("태초에 하나님이\u{3000}천지를."),
            normalize("태초에하나님이천지를")
        );
    }

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(normalize("a\u{0000}b\u{0007}c"), "abc");
    }

    #[test]
    fn test_korean_numerals_compose() {
        // 이백이십삼 -> 2 100 2 10 3 -> 223
        assert_eq!(normalize("이백이십삼"), "223");
        assert_eq!(normalize("삼십"), "30");
        assert_eq!(normalize("이백"), "200");
    }

    #[test]
    fn test_digits_and_words_agree() {
        assert_eq!(normalize("이십이 절"), normalize("22절"));
        assert_eq!(normalize("제 이백 장"), normalize("제 200 장"));
    }

    #[test]
    fn test_misrecognized_classifier_collapses() {
        assert_eq!(normalize("202 호"), normalize("이백요"));
        assert_eq!(normalize("22요"), normalize("이십이요"));
    }

    #[test]
    fn test_constrained_spacing_collapse() {
        let spaced = normalize_for("3 장 16 절", PlatformClass::Constrained);
        assert_eq!(
            spaced,
            normalize_for("3장 16절", PlatformClass::Constrained)
        );
    }

    #[test]
    fn test_oversized_numbers_left_alone() {
        let huge = "99999999999999999999100";
        assert_eq!(normalize(huge), huge);
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "",
            "   ",
            "The quick brown fox.",
            "이백이십삼 장 2 10 3",
            "202 호 그리고 22요",
            "1010 2010 110 1100",
            "태초에 하나님이 천지를 창조하시니라",
            "İstanbul ÀÉÎ",
            "3 장 16 절, 아멘!",
            "\u{0000}\t\n mixed 십 2 백",
        ];
        for platform in [PlatformClass::Standard, PlatformClass::Constrained] {
            for sample in samples {
                let once = normalize_for(sample, platform);
                assert_eq!(normalize_for(&once, platform), once, "sample {:?}", sample);
            }
        }
    }

    #[test]
    fn test_prefix_offsets_follow_numerals() {
        let offsets: Vec<usize> = prefix_offsets("제 이백 장", PlatformClass::Standard).collect();
        assert_eq!(offsets, vec![1, 1, 2, 4, 4, 5]);
    }

    #[test]
    fn test_normalize_words_drops_empty() {
        let words = normalize_words("hello , world", PlatformClass::Standard);
        assert_eq!(words, vec!["hello".to_string(), "world".to_string()]);
    }
}
