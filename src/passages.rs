//! Passage identity and the static text the passages come from.

use crate::error::SourceError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

/// Composite key of a passage: book, chapter and verse.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassageKey {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
}

impl PassageKey {
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Self {
        Self {
            book: book.into(),
            chapter,
            verse,
        }
    }

    /// Key of the chapter this passage belongs to, `"book:chapter"`.
    pub fn chapter_key(&self) -> String {
        format!("{}:{}", self.book, self.chapter)
    }
}

impl fmt::Display for PassageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)
    }
}

/// One unit of text the reader must read aloud. Immutable once loaded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub key: PassageKey,
    pub text: String,
    /// True when this is the last passage of its chapter.
    #[serde(default)]
    pub ends_chapter: bool,
}

impl Passage {
    pub fn new(key: PassageKey, text: impl Into<String>) -> Self {
        Self {
            key,
            text: text.into(),
            ends_chapter: false,
        }
    }

    pub fn ending_chapter(mut self) -> Self {
        self.ends_chapter = true;
        self
    }
}

/// Lookup of ordered passages from a static dataset.
pub trait PassageSource {
    /// Every passage of `book` whose chapter is within `chapters`, in reading order.
    fn range(&self, book: &str, chapters: RangeInclusive<u32>) -> Result<Vec<Passage>, SourceError>;

    /// Where to resume after `last_read`: the next verse, rolling over to the
    /// next chapter and then the next book. `None` once everything has been read
    /// or when `last_read` names an unknown book.
    fn next_reading_start(&self, last_read: Option<&PassageKey>) -> Option<PassageKey>;
}

#[derive(Debug, Clone)]
struct Chapter {
    number: u32,
    verses: Vec<(u32, String)>,
}

#[derive(Debug, Clone)]
struct Book {
    name: String,
    chapters: Vec<Chapter>,
}

/// A `{ book: { chapter: { verse: text } } }` document.
///
/// Books keep document order; chapters and verses are ordered numerically.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalText {
    books: Vec<Book>,
}

impl HierarchicalText {
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let root: Map<String, Value> = serde_json::from_str(json)?;
        let mut books = Vec::with_capacity(root.len());

        for (name, chapters) in root {
            let chapters = as_object(&name, chapters)?;
            let mut parsed = Vec::with_capacity(chapters.len());
            for (label, verses) in chapters {
                let number = parse_label(&label)?;
                let verses = as_object(&format!("{} {}", name, label), verses)?;
                let mut parsed_verses = Vec::with_capacity(verses.len());
                for (label, text) in verses {
                    let verse = parse_label(&label)?;
                    match text {
                        Value::String(text) => parsed_verses.push((verse, text)),
                        other => {
                            return Err(SourceError::Malformed(format!(
                                "{} {}:{} is {} instead of text",
                                name,
                                number,
                                verse,
                                value_kind(&other)
                            )))
                        }
                    }
                }
                parsed_verses.sort_by_key(|(verse, _)| *verse);
                parsed.push(Chapter {
                    number,
                    verses: parsed_verses,
                });
            }
            parsed.sort_by_key(|chapter| chapter.number);
            books.push(Book {
                name,
                chapters: parsed,
            });
        }

        debug!("Loaded passage text with {} books", books.len());
        Ok(Self { books })
    }

    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn book_names(&self) -> impl Iterator<Item = &str> {
        self.books.iter().map(|book| book.name.as_str())
    }

    fn book(&self, name: &str) -> Option<(usize, &Book)> {
        self.books
            .iter()
            .enumerate()
            .find(|(_, book)| book.name == name)
    }

    fn first_key_of(&self, book_index: usize) -> Option<PassageKey> {
        let book = self.books.get(book_index)?;
        let chapter = book.chapters.iter().find(|c| !c.verses.is_empty())?;
        let (verse, _) = chapter.verses.first()?;
        Some(PassageKey::new(book.name.clone(), chapter.number, *verse))
    }
}

impl PassageSource for HierarchicalText {
    fn range(
        &self,
        book: &str,
        chapters: RangeInclusive<u32>,
    ) -> Result<Vec<Passage>, SourceError> {
        let (_, found) = self
            .book(book)
            .ok_or_else(|| SourceError::UnknownBook(book.to_string()))?;

        let mut passages = Vec::new();
        for chapter in &found.chapters {
            if !chapters.contains(&chapter.number) {
                continue;
            }
            let last = chapter.verses.len().saturating_sub(1);
            for (i, (verse, text)) in chapter.verses.iter().enumerate() {
                passages.push(Passage {
                    key: PassageKey::new(found.name.clone(), chapter.number, *verse),
                    text: text.clone(),
                    ends_chapter: i == last,
                });
            }
        }
        Ok(passages)
    }

    fn next_reading_start(&self, last_read: Option<&PassageKey>) -> Option<PassageKey> {
        let Some(last) = last_read else {
            return (0..self.books.len()).find_map(|i| self.first_key_of(i));
        };

        let (book_index, book) = self.book(&last.book)?;
        let Some(chapter_index) = book.chapters.iter().position(|c| c.number == last.chapter) else {
            warn!(
                "Chapter {} not found in {}; resuming from its first chapter",
                last.chapter, last.book
            );
            return self.first_key_of(book_index);
        };

        let chapter = &book.chapters[chapter_index];
        if let Some((verse, _)) = chapter.verses.iter().find(|(verse, _)| *verse > last.verse) {
            return Some(PassageKey::new(book.name.clone(), chapter.number, *verse));
        }
        if let Some(next) = book.chapters[chapter_index + 1..]
            .iter()
            .find(|c| !c.verses.is_empty())
        {
            let (verse, _) = next.verses.first()?;
            return Some(PassageKey::new(book.name.clone(), next.number, *verse));
        }
        (book_index + 1..self.books.len()).find_map(|i| self.first_key_of(i))
    }
}

fn as_object(context: &str, value: Value) -> Result<Map<String, Value>, SourceError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SourceError::Malformed(format!(
            "{} is {} instead of an object",
            context,
            value_kind(&other)
        ))),
    }
}

fn parse_label(label: &str) -> Result<u32, SourceError> {
    label
        .trim()
        .parse::<u32>()
        .map_err(|_| SourceError::BadLabel(label.to_string()))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
