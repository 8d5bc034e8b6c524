use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::raw_store;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Crawled,
    Translated,
    Formatted,
    Exported,
    Error,
}

impl ChapterStatus {
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Crawled => Some(1),
            Self::Translated => Some(2),
            Self::Formatted => Some(3),
            Self::Exported => Some(4),
            Self::Error => None,
        }
    }

    /// True for `translated` and every later stage.
    pub fn is_translated(self) -> bool {
        self.rank().is_some_and(|rank| rank >= 2)
    }

    /// Whether `self -> next` is a legal transition without `force`.
    ///
    /// Forward moves advance exactly one stage; `error` is reachable from any
    /// non-terminal state.
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (Some(_), None) => self != Self::Exported,
            (Some(from), Some(to)) => to == from + 1,
            (None, _) => false,
        }
    }
}

impl std::fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Crawled => "crawled",
            Self::Translated => "translated",
            Self::Formatted => "formatted",
            Self::Exported => "exported",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub index: u32,
    pub id: String,
    pub source_url: String,
    #[serde(default)]
    pub title_source: String,
    #[serde(default)]
    pub title_target: Option<String>,
    pub status: ChapterStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub crawled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub translated_at: Option<DateTime<Utc>>,
}

impl Chapter {
    pub fn new(index: u32, id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            source_url: source_url.into(),
            title_source: String::new(),
            title_target: None,
            status: ChapterStatus::Pending,
            error_message: None,
            crawled_at: None,
            translated_at: None,
        }
    }
}

/// CSS selectors the crawler uses for this book's source site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookPatterns {
    /// Matches every chapter link on the index page. Empty means "guess".
    #[serde(default)]
    pub chapter_selector: String,
    #[serde(default = "default_content_selector")]
    pub content_selector: String,
    #[serde(default = "default_title_selector")]
    pub title_selector: String,
    #[serde(default = "default_elements_to_remove")]
    pub elements_to_remove: Vec<String>,
}

fn default_content_selector() -> String {
    "#content".to_owned()
}

fn default_title_selector() -> String {
    "h1".to_owned()
}

fn default_elements_to_remove() -> Vec<String> {
    ["script", "style", ".toplink", "table"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

impl Default for BookPatterns {
    fn default() -> Self {
        Self {
            chapter_selector: String::new(),
            content_selector: default_content_selector(),
            title_selector: default_title_selector(),
            elements_to_remove: default_elements_to_remove(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookProgress {
    pub source_url: String,
    #[serde(default)]
    pub title_source: String,
    #[serde(default)]
    pub title_target: String,
    #[serde(default)]
    pub author_source: String,
    #[serde(default)]
    pub author_target: String,
    #[serde(default = "default_encoding")]
    pub content_encoding: String,
    #[serde(default)]
    pub patterns: BookPatterns,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_encoding() -> String {
    "utf-8".to_owned()
}

impl BookProgress {
    pub fn new(source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source_url: source_url.into(),
            title_source: String::new(),
            title_target: String::new(),
            author_source: String::new(),
            author_target: String::new(),
            content_encoding: default_encoding(),
            patterns: BookPatterns::default(),
            chapters: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Loads `book.json`. `None` means the book has never been initialised.
    pub async fn load(book_dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = book_dir.join(raw_store::BOOK_JSON);
        raw_store::read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    /// Rewrites the whole aggregate atomically and bumps `updated_at`.
    pub async fn save(&mut self, book_dir: &Path) -> anyhow::Result<()> {
        self.touch();
        let path = book_dir.join(raw_store::BOOK_JSON);
        raw_store::write_json_atomic(&path, self)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }

    /// `updated_at` never moves backwards, even if the clock does.
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    pub fn chapter(&self, index: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.index == index)
    }

    pub fn chapter_mut(&mut self, index: u32) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.index == index)
    }

    pub fn chapters_with_status(&self, status: ChapterStatus) -> Vec<&Chapter> {
        self.chapters.iter().filter(|c| c.status == status).collect()
    }

    /// Mutates one chapter in memory. Fails, leaving the chapter untouched,
    /// if the index is unknown or `status` is not a legal next state.
    ///
    /// Callers go through [`ProgressStore`] so the change is persisted under
    /// the progress lock. Forced resets bypass this and assign `status`
    /// directly.
    pub fn apply_status(
        &mut self,
        index: u32,
        status: ChapterStatus,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        let chapter = self
            .chapter_mut(index)
            .ok_or_else(|| anyhow::anyhow!("unknown chapter index: {index}"))?;
        if !chapter.status.can_advance_to(status) {
            anyhow::bail!(
                "chapter {index}: illegal status transition {} -> {status}",
                chapter.status
            );
        }
        chapter.status = status;
        chapter.error_message = error;
        match status {
            ChapterStatus::Crawled => chapter.crawled_at = Some(Utc::now()),
            ChapterStatus::Translated => chapter.translated_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }
}

/// Single writer for a book's progress: every mutation happens while holding
/// the lock and is followed by a full save.
#[derive(Debug)]
pub struct ProgressStore {
    book_dir: std::path::PathBuf,
    inner: tokio::sync::Mutex<BookProgress>,
}

impl ProgressStore {
    pub fn new(book_dir: impl Into<std::path::PathBuf>, progress: BookProgress) -> Self {
        Self {
            book_dir: book_dir.into(),
            inner: tokio::sync::Mutex::new(progress),
        }
    }

    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    pub async fn update_chapter_status(
        &self,
        index: u32,
        status: ChapterStatus,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        let mut progress = self.inner.lock().await;
        progress.apply_status(index, status, error)?;
        progress.save(&self.book_dir).await
    }

    /// Runs `f` against the whole aggregate and persists the result. Nothing
    /// is written if `f` fails.
    pub async fn update<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut BookProgress) -> anyhow::Result<()>,
    {
        let mut progress = self.inner.lock().await;
        f(&mut progress)?;
        progress.save(&self.book_dir).await
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let mut progress = self.inner.lock().await;
        progress.save(&self.book_dir).await
    }

    pub async fn snapshot(&self) -> BookProgress {
        self.inner.lock().await.clone()
    }

    pub async fn chapter(&self, index: u32) -> Option<Chapter> {
        self.inner.lock().await.chapter(index).cloned()
    }
}

/// Parses `"1-5,10,15-20"` into sorted indices within `1..=max_chapter`.
pub fn parse_chapter_range(ranges: &str, max_chapter: u32) -> anyhow::Result<Vec<u32>> {
    if ranges.trim().is_empty() {
        return Ok((1..=max_chapter).collect());
    }

    let mut result = BTreeSet::new();
    for part in ranges.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start
                .trim()
                .parse()
                .with_context(|| format!("invalid range start in {part:?}"))?;
            let end: u32 = end
                .trim()
                .parse()
                .with_context(|| format!("invalid range end in {part:?}"))?;
            let start = start.max(1);
            let end = end.min(max_chapter);
            result.extend(start..=end);
        } else {
            let idx: u32 = part
                .parse()
                .with_context(|| format!("invalid chapter index {part:?}"))?;
            if (1..=max_chapter).contains(&idx) {
                result.insert(idx);
            }
        }
    }
    Ok(result.into_iter().collect())
}
