use crate::matching::{advance_watermark, normalize_for, PlatformClass};
use serde::Serialize;

/// The live transcript for the active passage.
///
/// `raw` is replaced wholesale on every engine update. The watermark is
/// monotonic until [`TranscriptState::reset`], which happens exactly on passage
/// transition and retry.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptState {
    raw: String,
    normalized: String,
    watermark: usize,
}

impl TranscriptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    /// Replace the buffer and advance the watermark against `passage_text`.
    /// Returns true when the watermark moved.
    pub fn update(&mut self, raw: String, passage_text: &str, platform: PlatformClass) -> bool {
        self.normalized = normalize_for(&raw, platform);
        self.raw = raw;
        let next = advance_watermark(passage_text, &self.raw, self.watermark, platform);
        let moved = next != self.watermark;
        self.watermark = next;
        moved
    }

    pub fn reset(&mut self) {
        self.raw.clear();
        self.normalized.clear();
        self.watermark = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_replaces_buffer_and_keeps_watermark() {
        let mut state = TranscriptState::new();
        assert!(state.update(
            "the quick".into(),
            "the quick brown fox",
            PlatformClass::Standard,
        ));
        assert_eq!(state.normalized(), "thequick");
        assert_eq!(state.watermark(), 8);

        // a shorter interim hypothesis replaces the buffer but not the progress
        assert!(!state.update(
            "the".into(),
            "the quick brown fox",
            PlatformClass::Standard,
        ));
        assert_eq!(state.raw(), "the");
        assert_eq!(state.watermark(), 8);

        state.reset();
        assert_eq!(state, TranscriptState::default());
    }
}
