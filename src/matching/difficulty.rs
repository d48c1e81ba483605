use super::normalizer::normalize;
use log::debug;

/// Words speech engines reliably mis-transcribe: archaic verb forms and
/// uncommon proper names.
pub const DEFAULT_DIFFICULT_WORDS: &[&str] = &[
    // Archaic forms
    "가라사대",
    "하시매",
    "하셨으니",
    "하시니라",
    "하여금",
    "하심이",
    "거늘",
    "이었으되",
    "이었으니",
    // Proper names
    "므두셀라",
    "느부갓네살",
    "여호사밧",
    "스룹바벨",
    "아닥사스다",
    "아히멜렉",
    "여로보암",
    "르호보암",
    "므낫세",
    "에브라임",
    "바알세붑",
    "멜기세덱",
    "두발가인",
    "하맛",
    "브엘세바",
];

/// Decides whether a text contains vocabulary that engines mishear.
pub trait DifficultyClassifier: Send + Sync {
    fn contains_difficult_word(&self, text: &str) -> bool;
}

/// Static lookup against a curated word list.
///
/// Both the list and the checked text are normalized, so a word matches
/// regardless of spacing, punctuation or numeral spelling.
#[derive(Debug, Clone)]
pub struct WordListClassifier {
    words: Vec<String>,
}

impl WordListClassifier {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words: Vec<String> = words
            .into_iter()
            .map(|w| normalize(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        words.sort();
        words.dedup();
        debug!("WordListClassifier loaded {} words", words.len());
        Self { words }
    }

    /// The curated list plus any extra words (typically from settings).
    pub fn with_extra_words(extra: &[String]) -> Self {
        Self::new(
            DEFAULT_DIFFICULT_WORDS
                .iter()
                .map(|w| w.to_string())
                .chain(extra.iter().cloned()),
        )
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for WordListClassifier {
    fn default() -> Self {
        Self::with_extra_words(&[])
    }
}

impl DifficultyClassifier for WordListClassifier {
    fn contains_difficult_word(&self, text: &str) -> bool {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return false;
        }
        self.words
            .iter()
            .any(|word| normalized.contains(word.as_str()))
    }
}

/// A classifier that never flags anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDifficultWords;

impl DifficultyClassifier for NoDifficultWords {
    fn contains_difficult_word(&self, _text: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_list_flags_archaic_forms() {
        let classifier = WordListClassifier::default();
        assert!(classifier.contains_difficult_word("예수께서 가라사대 나를 따르라"));
        assert!(!classifier.contains_difficult_word("태초에 하나님이 천지를 창조하시니라"));
    }

    #[test]
    fn test_match_ignores_spacing_and_numerals() {
        // 아닥사스다 contains a numeral syllable; both sides normalize the same way
        let classifier = WordListClassifier::default();
        assert!(classifier.contains_difficult_word("아닥 사스다 왕 제이십년에"));
    }

    #[test]
    fn test_extra_words() {
        let classifier = WordListClassifier::with_extra_words(&["quixotic".to_string()]);
        assert!(classifier.contains_difficult_word("A Quixotic quest"));
        assert_eq!(classifier.len(), DEFAULT_DIFFICULT_WORDS.len() + 1);
    }

    #[test]
    fn test_empty_text_is_not_difficult() {
        assert!(!WordListClassifier::default().contains_difficult_word("  ,. "));
        assert!(!NoDifficultWords.contains_difficult_word("가라사대"));
    }
}
