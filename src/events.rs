//! In-process event fan-out for pipeline progress.
//!
//! Delivery is best effort: `emit` never waits, and a subscriber that falls
//! behind loses the oldest events instead of slowing the pipeline down.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPhase {
    Translating,
    Combining,
    Polishing,
    Done,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    JobStarted {
        book_dir: String,
        total_chapters: usize,
    },
    ChapterCrawled {
        index: u32,
        title: String,
    },
    ChapterTranslated {
        index: u32,
        title: String,
    },
    ChapterFailed {
        index: u32,
        phase: String,
        error: String,
    },
    ChunkProgress {
        index: u32,
        phase: ChunkPhase,
        completed: usize,
        total: usize,
    },
    GlossaryUpdated {
        added: usize,
        total: usize,
    },
    Progress {
        crawled: usize,
        translated: usize,
        total: usize,
    },
    JobCompleted {
        all_done: bool,
        crawled: usize,
        translated: usize,
    },
    JobCancelled,
    JobFailed {
        error: String,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::ChapterCrawled { .. } => "chapter_crawled",
            Self::ChapterTranslated { .. } => "chapter_translated",
            Self::ChapterFailed { .. } => "chapter_failed",
            Self::ChunkProgress { .. } => "chunk_progress",
            Self::GlossaryUpdated { .. } => "glossary_updated",
            Self::Progress { .. } => "progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobCancelled => "job_cancelled",
            Self::JobFailed { .. } => "job_failed",
        }
    }

    /// Events after which a job's progress snapshot is worth refreshing.
    pub fn touches_chapter(&self) -> bool {
        matches!(
            self,
            Self::ChapterCrawled { .. } | Self::ChapterTranslated { .. } | Self::ChapterFailed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// Wire shape used by presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl From<&JobEvent> for EventEnvelope {
    fn from(value: &JobEvent) -> Self {
        let data = serde_json::to_value(&value.event)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        Self {
            kind: value.event.kind().to_owned(),
            job_id: value.job_id.clone(),
            timestamp: value.timestamp,
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, job_id: Option<&str>, event: PipelineEvent) {
        tracing::debug!(kind = event.kind(), job_id, "event");
        // No receivers is not an error.
        let _ = self.tx.send(JobEvent {
            job_id: job_id.map(str::to_owned),
            timestamp: Utc::now(),
            event,
        });
    }

    /// Handle that stamps every event with `job_id`.
    pub fn scoped(&self, job_id: Option<String>) -> EventSink {
        EventSink {
            bus: self.clone(),
            job_id,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct EventSink {
    bus: EventBus,
    job_id: Option<String>,
}

impl EventSink {
    /// A sink nobody listens to.
    pub fn detached() -> Self {
        EventBus::with_capacity(1).scoped(None)
    }

    pub fn emit(&self, event: PipelineEvent) {
        self.bus.emit(self.job_id.as_deref(), event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.bus.subscribe()
    }
}
