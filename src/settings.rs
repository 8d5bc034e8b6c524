use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::RunOptions;
use crate::progress::{BookProgress, ChapterStatus};
use crate::raw_store;

/// What the last run of a book was asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub style: String,
    pub workers: Option<usize>,
    pub chapters: Option<String>,
    pub crawl_only: bool,
    pub translate_only: bool,
    pub no_glossary: bool,
    pub last_run_at: DateTime<Utc>,
}

impl PipelineSettings {
    pub fn from_options(options: &RunOptions) -> Self {
        Self {
            style: options.style.clone(),
            workers: options.workers,
            chapters: options.chapters.clone(),
            crawl_only: options.crawl_only,
            translate_only: options.translate_only,
            no_glossary: !options.auto_glossary,
            last_run_at: Utc::now(),
        }
    }

    pub async fn load(book_dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = book_dir.join(raw_store::SETTINGS_JSON);
        raw_store::read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    pub async fn save(&self, book_dir: &Path) -> anyhow::Result<()> {
        let path = book_dir.join(raw_store::SETTINGS_JSON);
        raw_store::write_json_atomic(&path, self)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumableBook {
    pub book_dir: PathBuf,
    pub title: String,
    pub title_target: String,
    pub total_chapters: usize,
    pub crawled: usize,
    pub translated: usize,
    pub errors: usize,
    pub updated_at: DateTime<Utc>,
    pub last_settings: Option<PipelineSettings>,
}

/// Books under `books_dir` with at least one chapter not yet translated,
/// most recently touched first.
pub async fn list_resumable_books(books_dir: &Path) -> anyhow::Result<Vec<ResumableBook>> {
    let mut entries = match tokio::fs::read_dir(books_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read dir: {}", books_dir.display()));
        }
    };

    let mut books = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read dir entry: {}", books_dir.display()))?
    {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let progress = match BookProgress::load(&dir).await {
            Ok(Some(progress)) => progress,
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %format!("{err:#}"), "skip unreadable book");
                continue;
            }
        };

        let total = progress.chapters.len();
        let translated = progress
            .chapters
            .iter()
            .filter(|c| c.status.is_translated())
            .count();
        if total == 0 || translated == total {
            continue;
        }
        let crawled = progress
            .chapters
            .iter()
            .filter(|c| c.status != ChapterStatus::Pending && c.status != ChapterStatus::Error)
            .count();
        let errors = progress.chapters_with_status(ChapterStatus::Error).len();
        let last_settings = PipelineSettings::load(&dir).await.unwrap_or_default();

        books.push(ResumableBook {
            book_dir: dir,
            title: progress.title_source,
            title_target: progress.title_target,
            total_chapters: total,
            crawled,
            translated,
            errors,
            updated_at: progress.updated_at,
            last_settings,
        });
    }
    books.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(books)
}
