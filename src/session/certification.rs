//! The summary handed to the reader when a session ends.

use crate::passages::{Passage, PassageKey};
use crate::persistence::SessionRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every selected passage was read.
    Completed,
    /// The reader stopped after reading at least one passage.
    Stopped,
    NothingRead,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Certification {
    pub outcome: SessionOutcome,
    pub first: Option<PassageKey>,
    pub last: Option<PassageKey>,
    /// Passages read in this session, excluding the initial skip.
    pub passages_read: usize,
    pub message: String,
}

impl Certification {
    /// Summarize a session over `targets` that started at `skip_offset` and
    /// ended with `completed_count` passages behind it.
    pub fn for_session(targets: &[Passage], skip_offset: usize, completed_count: usize) -> Self {
        let completed_count = completed_count.min(targets.len());
        let passages_read = completed_count.saturating_sub(skip_offset);
        if passages_read == 0 {
            return Self {
                outcome: SessionOutcome::NothingRead,
                first: None,
                last: None,
                passages_read: 0,
                message: "No passages were read in this session.".to_string(),
            };
        }

        let first = targets[skip_offset].key.clone();
        let last = targets[completed_count - 1].key.clone();
        let (outcome, message) = if completed_count == targets.len() {
            (
                SessionOutcome::Completed,
                format!("{} ~ {} ({} passages) read!", first, last, passages_read),
            )
        } else {
            (
                SessionOutcome::Stopped,
                format!(
                    "{} ~ {} ({} passages) read. The session was stopped early.",
                    first, last, passages_read
                ),
            )
        };

        Self {
            outcome,
            first: Some(first),
            last: Some(last),
            passages_read,
            message,
        }
    }

    /// History entry for this certification; `None` when nothing was read.
    pub fn to_record(&self, date: DateTime<Utc>) -> Option<SessionRecord> {
        let (first, last) = (self.first.as_ref()?, self.last.as_ref()?);
        Some(SessionRecord {
            date,
            book: first.book.clone(),
            start_chapter: first.chapter,
            start_verse: first.verse,
            end_chapter: last.chapter,
            end_verse: last.verse,
            passages_read: self.passages_read,
        })
    }
}
