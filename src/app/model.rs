use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::LlmEngine;
use crate::pipeline::{PipelineResult, RunOptions};
use crate::progress::{BookProgress, ChapterStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub total_chapters: usize,
    pub crawled: usize,
    pub translated: usize,
    pub errors: usize,
}

impl JobProgress {
    pub fn from_book(progress: &BookProgress) -> Self {
        let chapters = &progress.chapters;
        Self {
            total_chapters: chapters.len(),
            crawled: chapters
                .iter()
                .filter(|c| !matches!(c.status, ChapterStatus::Pending | ChapterStatus::Error))
                .count(),
            translated: chapters.iter().filter(|c| c.status.is_translated()).count(),
            errors: chapters
                .iter()
                .filter(|c| c.status == ChapterStatus::Error)
                .count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: String,
    pub status: JobStatus,
    pub book_dir: PathBuf,
    pub request: CreateJobRequest,
    pub progress: JobProgress,
    pub result: Option<PipelineResult>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateJobRequest {
    /// Existing book directory. Derived from the url under the books dir
    /// when absent.
    #[serde(default)]
    pub book_dir: Option<PathBuf>,

    #[serde(flatten)]
    pub options: RunOptions,

    /// Glossary CSV merged into the book's glossary before the run.
    #[serde(default)]
    pub glossary_csv: Option<PathBuf>,

    #[serde(default = "CreateJobRequest::default_engine")]
    pub engine: LlmEngine,
}

impl CreateJobRequest {
    pub fn default_engine() -> LlmEngine {
        LlmEngine::Openai
    }
}
