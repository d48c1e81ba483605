//! Reading progress and the stores it is persisted to.

use crate::error::StoreError;
use crate::passages::{Passage, PassageKey};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Whose progress is stored. `group: None` is a personal journey.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user: String,
    #[serde(default)]
    pub group: Option<i64>,
}

impl Identity {
    pub fn personal(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: None,
        }
    }

    pub fn in_group(user: impl Into<String>, group: i64) -> Self {
        Self {
            user: user.into(),
            group: Some(group),
        }
    }
}

/// One finished (or stopped) reading session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub date: DateTime<Utc>,
    pub book: String,
    pub start_chapter: u32,
    pub start_verse: u32,
    pub end_chapter: u32,
    pub end_verse: u32,
    pub passages_read: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct UserProgress {
    #[serde(default)]
    pub last_position: Option<PassageKey>,
    /// `"book:chapter"` keys of chapters whose final passage has been read.
    #[serde(default)]
    pub completed_chapters: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<SessionRecord>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProgress {
    /// Move the bookmark to `passage`, completing its chapter when it is the
    /// chapter's last passage.
    pub fn record_passage(&mut self, passage: &Passage, now: DateTime<Utc>) {
        self.last_position = Some(passage.key.clone());
        if passage.ends_chapter {
            self.completed_chapters.insert(passage.key.chapter_key());
        }
        self.updated_at = Some(now);
    }

    pub fn add_session(&mut self, record: SessionRecord) {
        self.updated_at = Some(record.date);
        self.history.push(record);
    }

    pub fn has_completed_chapter(&self, book: &str, chapter: u32) -> bool {
        self.completed_chapters
            .contains(&format!("{}:{}", book, chapter))
    }
}

/// Persistence of per-identity progress. `save_progress` is an idempotent upsert.
pub trait ProgressStore: Send + Sync {
    /// Stored progress, or the empty default when nothing was saved yet.
    fn load_progress(&self, identity: &Identity) -> Result<UserProgress, StoreError>;

    fn save_progress(
        &self,
        identity: &Identity,
        progress: &UserProgress,
    ) -> Result<(), StoreError>;
}

/// One JSON file per identity under a directory. Writes go to a temporary
/// file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, identity: &Identity) -> PathBuf {
        let user: String = identity
            .user
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = match identity.group {
            Some(group) => format!("{}.group-{}.json", user, group),
            None => format!("{}.json", user),
        };
        self.dir.join(name)
    }
}

impl ProgressStore for JsonFileStore {
    fn load_progress(&self, identity: &Identity) -> Result<UserProgress, StoreError> {
        let path = self.path_for(identity);
        if !path.exists() {
            debug!("No progress stored at {}", path.display());
            return Ok(UserProgress::default());
        }
        let raw = fs::read_to_string(&path).map_err(|e| StoreError::io("reading progress", e))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::json("decoding progress", e))
    }

    fn save_progress(
        &self,
        identity: &Identity,
        progress: &UserProgress,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::io("creating store directory", e))?;
        let path = self.path_for(identity);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(progress)
            .map_err(|e| StoreError::json("encoding progress", e))?;
        fs::write(&tmp, json).map_err(|e| StoreError::io("writing progress", e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io("replacing progress file", e))?;

        info!(
            "Saved progress for '{}' to {}",
            identity.user,
            path.display()
        );
        Ok(())
    }
}

/// In-process store, used by the replay command and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Identity, UserProgress>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|count| *count).unwrap_or(0)
    }
}

impl ProgressStore for MemoryStore {
    fn load_progress(&self, identity: &Identity) -> Result<UserProgress, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(identity).cloned().unwrap_or_default())
    }

    fn save_progress(
        &self,
        identity: &Identity,
        progress: &UserProgress,
    ) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(identity.clone(), progress.clone());
        *self.saves.lock().map_err(|_| StoreError::Poisoned)? += 1;
        Ok(())
    }
}
