//! Learned-rules store.
//!
//! Rejection feedback often repeats across tasks. Lessons extracted from it
//! are kept in a durable JSON file, deduplicated by the same normalized
//! fingerprint the 3-strike tracking uses, and injected into later coder
//! prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use super::signals;
use crate::error::Result;

/// One learned rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    /// Fingerprint of the normalized lesson text.
    pub fingerprint: String,
    /// The lesson itself (first line of the source feedback).
    pub text: String,
    /// How many times this lesson has been re-learned.
    pub count: u32,
    pub created_at: DateTime<Utc>,
}

/// Durable, deduplicating lesson store.
#[derive(Debug, Clone)]
pub struct LessonStore {
    path: PathBuf,
}

impl LessonStore {
    /// Create a store backed by the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Vec<Lesson> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    fn store(&self, lessons: &[Lesson]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(lessons)?)?;
        Ok(())
    }

    /// Record a lesson from rejection feedback.
    ///
    /// The first non-empty line is the lesson text. Returns `true` when a
    /// new lesson was added, `false` when an existing one was refreshed.
    pub fn record(&self, feedback: &str) -> Result<bool> {
        let Some(text) = feedback.lines().find(|l| !l.trim().is_empty()) else {
            return Ok(false);
        };
        let text = text.trim();
        let fingerprint = signals::fingerprint(text);

        let mut lessons = self.load();
        if let Some(existing) = lessons.iter_mut().find(|l| l.fingerprint == fingerprint) {
            existing.count += 1;
            debug!("Refreshed lesson (count {}): {}", existing.count, text);
            self.store(&lessons)?;
            return Ok(false);
        }

        lessons.push(Lesson {
            fingerprint,
            text: text.to_string(),
            count: 1,
            created_at: Utc::now(),
        });
        debug!("Recorded new lesson: {text}");
        self.store(&lessons)?;
        Ok(true)
    }

    /// The most recently added lessons, newest last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Lesson> {
        let lessons = self.load();
        let skip = lessons.len().saturating_sub(limit);
        lessons.into_iter().skip(skip).collect()
    }

    /// Render recent lessons as a prompt block; empty string when none.
    #[must_use]
    pub fn prompt_block(&self, limit: usize) -> String {
        let lessons = self.recent(limit);
        if lessons.is_empty() {
            return String::new();
        }
        let mut out = String::from("Lessons from earlier rejections:\n");
        for lesson in lessons {
            out.push_str(&format!("- {}\n", lesson.text));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (LessonStore, TempDir) {
        let temp = TempDir::new().unwrap();
        (LessonStore::new(temp.path().join("lessons.json")), temp)
    }

    #[test]
    fn test_record_new_lesson() {
        let (store, _temp) = store();
        assert!(store.record("Always run the full test suite.").unwrap());
        assert_eq!(store.recent(10).len(), 1);
    }

    #[test]
    fn test_dedup_by_fingerprint() {
        let (store, _temp) = store();
        assert!(store.record("Always run the full test suite.").unwrap());
        // Same normalized text, different whitespace/case
        assert!(!store.record("always  run the full TEST suite.").unwrap());

        let lessons = store.recent(10);
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].count, 2);
    }

    #[test]
    fn test_empty_feedback_records_nothing() {
        let (store, _temp) = store();
        assert!(!store.record("\n\n  \n").unwrap());
        assert!(store.recent(10).is_empty());
    }

    #[test]
    fn test_first_line_is_the_lesson() {
        let (store, _temp) = store();
        store
            .record("Missing error handling.\nDetails: foo panics on None.")
            .unwrap();
        assert_eq!(store.recent(1)[0].text, "Missing error handling.");
    }

    #[test]
    fn test_prompt_block() {
        let (store, _temp) = store();
        assert!(store.prompt_block(5).is_empty());

        store.record("Check the console for errors.").unwrap();
        let block = store.prompt_block(5);
        assert!(block.contains("Lessons from earlier rejections"));
        assert!(block.contains("- Check the console for errors."));
    }

    #[test]
    fn test_recent_limits() {
        let (store, _temp) = store();
        for i in 0..5 {
            store.record(&format!("lesson number {i}")).unwrap();
        }
        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].text, "lesson number 4");
    }
}
